//! Error types for the billing event codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("missing signature header")]
  MissingSignature,

  #[error("malformed signature header: {0}")]
  MalformedSignature(String),

  #[error("signature timestamp {timestamp} is outside the {tolerance_secs}s tolerance")]
  OutsideTolerance { timestamp: i64, tolerance_secs: u64 },

  #[error("no signature matched the payload")]
  SignatureMismatch,

  #[error("invalid webhook secret: {0}")]
  InvalidSecret(String),

  #[error("malformed event: {0}")]
  MalformedEvent(String),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for dealmatch_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::MissingSignature
      | Error::MalformedSignature(_)
      | Error::OutsideTolerance { .. }
      | Error::SignatureMismatch
      | Error::InvalidSecret(_) => Self::InvalidSignature(e.to_string()),
      Error::MalformedEvent(_) | Error::Json(_) => Self::Validation(e.to_string()),
    }
  }
}
