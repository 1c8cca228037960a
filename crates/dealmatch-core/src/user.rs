//! Users as seen by the core: an opaque id handed over by the identity
//! provider plus a little profile data.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identity issued by the external identity provider. Never parsed, only
/// compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
  pub fn new(raw: impl Into<String>) -> Result<Self> {
    let raw = raw.into();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return Err(Error::Validation("user id must not be empty".into()));
    }
    Ok(Self(trimmed.to_owned()))
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub user_id:      UserId,
  pub email:        Option<String>,
  pub display_name: Option<String>,
  pub created_at:   DateTime<Utc>,
}

impl User {
  /// Name used when addressing the user in generated documents.
  pub fn label(&self) -> &str {
    self
      .display_name
      .as_deref()
      .or(self.email.as_deref())
      .unwrap_or(self.user_id.as_str())
  }
}

/// Input to [`crate::store::MarketStore::upsert_user`]. `None` fields never
/// overwrite stored values.
#[derive(Debug, Clone)]
pub struct NewUser {
  pub user_id:      UserId,
  pub email:        Option<String>,
  pub display_name: Option<String>,
}
