//! Error type for `dealmatch-augment`.
//!
//! None of these reach an end user: every failure is logged and replaced by
//! a deterministic fallback.

use dealmatch_core::completion::CompletionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Completion(#[from] CompletionError),

  /// Carries [`dealmatch_core::Error::UpstreamTimeout`].
  #[error(transparent)]
  Core(#[from] dealmatch_core::Error),

  #[error("response does not match the structure schema: {0}")]
  Schema(String),
}

impl Error {
  /// Only a schema violation is worth a second, stricter prompt. Transport
  /// failures and timeouts go straight to the fallback.
  pub fn warrants_strict_retry(&self) -> bool { matches!(self, Self::Schema(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
