//! Error type for `dealmatch-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] dealmatch_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A row that violates an invariant the schema should have enforced.
  #[error("corrupt row: {0}")]
  Corrupt(String),

  #[error("lease ttl out of range: {0:?}")]
  LeaseTtl(std::time::Duration),

  /// An edit tried to swap a listing's payload for the other mode.
  #[error("listing {0} cannot change mode")]
  ModeChange(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
