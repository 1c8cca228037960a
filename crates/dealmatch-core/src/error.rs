//! Error taxonomy shared by every dealmatch crate.
//!
//! Backend-specific errors (SQLite, HTTP) are boxed into [`Error::Store`] at
//! the service boundary so callers only ever match on this enum.

use std::{fmt::Display, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input; the caller can correct it and retry.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  /// The entity exists but the caller may not touch it.
  #[error("not permitted: {0}")]
  Authorization(String),

  #[error("invalid state: {0}")]
  InvalidState(String),

  #[error("invalid signature: {0}")]
  InvalidSignature(String),

  /// The text-completion capability exceeded its bound. Recovered locally.
  #[error("upstream timed out after {0:?}")]
  UpstreamTimeout(Duration),

  /// A billing event that was already applied. Absorbed into success.
  #[error("billing event {0} already applied")]
  DuplicateEvent(String),

  #[error("an active subscription is required")]
  EntitlementRequired,

  /// A pair lease could not be obtained before the wait deadline.
  #[error("busy: {0}")]
  Busy(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  pub fn not_found(entity: &'static str, id: impl Display) -> Self {
    Self::NotFound { entity, id: id.to_string() }
  }

  /// Whether the operation may succeed if the caller simply tries again.
  ///
  /// Only transient backend failures qualify; every other variant is a
  /// permanent answer about the request itself.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Store(_) | Self::Busy(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_backend_failures_are_retryable() {
    let io = std::io::Error::other("disk full");
    assert!(Error::store(io).is_retryable());
    assert!(Error::Busy("pair".into()).is_retryable());
    assert!(!Error::InvalidSignature("bad".into()).is_retryable());
    assert!(!Error::not_found("user", "u1").is_retryable());
    assert!(!Error::Authorization("nope".into()).is_retryable());
  }

  #[test]
  fn not_found_names_the_entity() {
    let err = Error::not_found("listing", "abc");
    assert_eq!(err.to_string(), "listing not found: abc");
  }
}
