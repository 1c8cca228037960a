//! Listings: the HAVE and WANT sides of the marketplace.
//!
//! A listing owns exactly one payload: an [`Asset`] when it offers something,
//! a [`Want`] when it seeks something. The invariant is carried by the type;
//! there is no way to build a listing holding both or neither.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, terms::Terms, user::UserId};

// ─── Enumerations ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListingMode {
  Have,
  Want,
}

impl ListingMode {
  pub fn opposite(self) -> Self {
    match self {
      Self::Have => Self::Want,
      Self::Want => Self::Have,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListingStatus {
  #[default]
  Active,
  Paused,
  Closed,
}

// ─── Payloads ────────────────────────────────────────────────────────────────

/// What a HAVE listing offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
  pub title:           String,
  #[serde(default)]
  pub description:     String,
  /// Category or type, e.g. "multifamily", "equipment".
  #[serde(default)]
  pub category:        Option<String>,
  #[serde(default)]
  pub estimated_value: Option<f64>,
  #[serde(default)]
  pub terms:           Terms,
}

/// What a WANT listing seeks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Want {
  pub title:        String,
  #[serde(default)]
  pub description:  String,
  #[serde(default)]
  pub category:     Option<String>,
  #[serde(default)]
  pub target_value: Option<f64>,
  #[serde(default)]
  pub terms:        Terms,
}

/// The single payload of a listing; the variant determines the mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "payload", rename_all = "UPPERCASE")]
pub enum ListingPayload {
  Have(Asset),
  Want(Want),
}

impl ListingPayload {
  pub fn mode(&self) -> ListingMode {
    match self {
      Self::Have(_) => ListingMode::Have,
      Self::Want(_) => ListingMode::Want,
    }
  }

  pub fn title(&self) -> &str {
    match self {
      Self::Have(a) => &a.title,
      Self::Want(w) => &w.title,
    }
  }

  pub fn description(&self) -> &str {
    match self {
      Self::Have(a) => &a.description,
      Self::Want(w) => &w.description,
    }
  }

  pub fn category(&self) -> Option<&str> {
    match self {
      Self::Have(a) => a.category.as_deref(),
      Self::Want(w) => w.category.as_deref(),
    }
  }

  /// Estimated value of an asset, or target value of a want.
  pub fn value(&self) -> Option<f64> {
    match self {
      Self::Have(a) => a.estimated_value,
      Self::Want(w) => w.target_value,
    }
  }

  pub fn terms(&self) -> &Terms {
    match self {
      Self::Have(a) => &a.terms,
      Self::Want(w) => &w.terms,
    }
  }

  /// Minimal checks the matching pipeline relies on.
  pub fn validate(&self) -> Result<()> {
    if self.title().trim().is_empty() {
      return Err(Error::Validation("listing title must not be empty".into()));
    }
    if let Some(value) = self.value()
      && (!value.is_finite() || value < 0.0)
    {
      return Err(Error::Validation(format!(
        "listing value must be a non-negative number, got {value}"
      )));
    }
    Ok(())
  }
}

// ─── Listing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
  pub listing_id: Uuid,
  pub owner_id:   UserId,
  pub status:     ListingStatus,
  #[serde(flatten)]
  pub payload:    ListingPayload,
  pub created_at: DateTime<Utc>,
  /// Bumped on every owner edit; used to detect stale matches.
  pub updated_at: DateTime<Utc>,
}

impl Listing {
  pub fn mode(&self) -> ListingMode { self.payload.mode() }

  pub fn is_owned_by(&self, user: &UserId) -> bool { &self.owner_id == user }

  pub fn as_asset(&self) -> Option<&Asset> {
    match &self.payload {
      ListingPayload::Have(a) => Some(a),
      ListingPayload::Want(_) => None,
    }
  }

  pub fn as_want(&self) -> Option<&Want> {
    match &self.payload {
      ListingPayload::Want(w) => Some(w),
      ListingPayload::Have(_) => None,
    }
  }
}

/// Input to [`crate::store::MarketStore::create_listing`]. Timestamps and the
/// id are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewListing {
  pub owner_id: UserId,
  pub status:   ListingStatus,
  pub payload:  ListingPayload,
}

/// Owner edit. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingPatch {
  pub status:  Option<ListingStatus>,
  pub payload: Option<ListingPayload>,
}

impl ListingPatch {
  pub fn is_empty(&self) -> bool { self.status.is_none() && self.payload.is_none() }
}

/// Filter for [`crate::store::MarketStore::list_listings`].
#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
  pub owner_id: Option<UserId>,
  pub mode:     Option<ListingMode>,
  pub status:   Option<ListingStatus>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn asset(title: &str, value: Option<f64>) -> ListingPayload {
    ListingPayload::Have(Asset {
      title:           title.into(),
      description:     String::new(),
      category:        None,
      estimated_value: value,
      terms:           Terms::default(),
    })
  }

  #[test]
  fn payload_serialises_with_mode_tag() {
    let json = serde_json::to_value(asset("Duplex", Some(1.0))).unwrap();
    assert_eq!(json["mode"], "HAVE");
    assert_eq!(json["payload"]["title"], "Duplex");
  }

  #[test]
  fn validate_rejects_blank_title_and_negative_value() {
    assert!(matches!(asset("  ", None).validate(), Err(Error::Validation(_))));
    assert!(matches!(
      asset("Duplex", Some(-1.0)).validate(),
      Err(Error::Validation(_))
    ));
    assert!(asset("Duplex", Some(10.0)).validate().is_ok());
  }

  #[test]
  fn opposite_mode() {
    assert_eq!(ListingMode::Have.opposite(), ListingMode::Want);
    assert_eq!(ListingMode::Want.opposite(), ListingMode::Have);
  }
}
