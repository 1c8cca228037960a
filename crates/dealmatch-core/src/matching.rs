//! Matches between a HAVE and a WANT listing, and the deal structures the AI
//! suggests for them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, scoring::FeatureBreakdown};

// ─── Pair key ────────────────────────────────────────────────────────────────

/// An unordered pair of listing ids, stored smaller-id first.
///
/// `(A, B)` and `(B, A)` produce the same key, so every lookup and write keyed
/// on it is order independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
  low:  Uuid,
  high: Uuid,
}

impl PairKey {
  /// Returns `None` when both ids are the same listing.
  pub fn new(a: Uuid, b: Uuid) -> Option<Self> {
    match a.cmp(&b) {
      std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
      std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
      std::cmp::Ordering::Equal => None,
    }
  }

  pub fn low(&self) -> Uuid { self.low }

  pub fn high(&self) -> Uuid { self.high }

  pub fn contains(&self, id: Uuid) -> bool { self.low == id || self.high == id }
}

impl fmt::Display for PairKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.low, self.high)
  }
}

// ─── Suggested structure ─────────────────────────────────────────────────────

/// One candidate deal shape, e.g. a wrap note or a joint venture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedStructure {
  pub name:         String,
  pub how_it_works: String,
  pub key_terms:    Vec<String>,
  pub risks:        Vec<String>,
  pub next_steps:   Vec<String>,
}

impl SuggestedStructure {
  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::Validation("structure name must not be empty".into()));
    }
    if self.how_it_works.trim().is_empty() {
      return Err(Error::Validation(format!(
        "structure {:?} is missing its how-it-works narrative",
        self.name
      )));
    }
    Ok(())
  }
}

// ─── Match ───────────────────────────────────────────────────────────────────

/// A scored, annotated pairing. At most one exists per [`PairKey`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
  pub match_id:          Uuid,
  /// Smaller listing id of the pair.
  pub listing_a:         Uuid,
  pub listing_b:         Uuid,
  pub have_listing_id:   Uuid,
  pub want_listing_id:   Uuid,
  pub score:             f64,
  pub breakdown:         FeatureBreakdown,
  pub rationale:         String,
  pub structures:        Vec<SuggestedStructure>,
  /// Hash of the structural inputs the match was computed from.
  pub inputs_hash:       String,
  /// Set when a listing in the pair was edited after computation.
  pub stale:             bool,
  /// Creation time of the newer of the two listings; used for ranking.
  pub newest_listing_at: DateTime<Utc>,
  /// When this version of the match was computed.
  pub created_at:        DateTime<Utc>,
}

impl Match {
  pub fn pair(&self) -> Option<PairKey> { PairKey::new(self.listing_a, self.listing_b) }

  /// Whether the cached computation can be served as-is.
  pub fn is_fresh(
    &self,
    inputs_hash: &str,
    have_updated_at: DateTime<Utc>,
    want_updated_at: DateTime<Utc>,
  ) -> bool {
    !self.stale
      && self.inputs_hash == inputs_hash
      && have_updated_at <= self.created_at
      && want_updated_at <= self.created_at
  }
}

/// Input to [`crate::store::MarketStore::upsert_match`]. The store keeps the
/// existing `match_id` for the pair if there is one and sets `created_at`.
#[derive(Debug, Clone)]
pub struct NewMatch {
  pub pair:              PairKey,
  pub have_listing_id:   Uuid,
  pub want_listing_id:   Uuid,
  pub score:             f64,
  pub breakdown:         FeatureBreakdown,
  pub rationale:         String,
  pub structures:        Vec<SuggestedStructure>,
  pub inputs_hash:       String,
  pub newest_listing_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;

  #[test]
  fn pair_key_is_order_independent() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    assert_eq!(PairKey::new(a, b), PairKey::new(b, a));
    let key = PairKey::new(a, b).unwrap();
    assert!(key.low() < key.high());
    assert!(key.contains(a) && key.contains(b));
  }

  #[test]
  fn pair_key_rejects_self_pairing() {
    let a = Uuid::new_v4();
    assert!(PairKey::new(a, a).is_none());
  }

  #[test]
  fn structure_validation_requires_name_and_narrative() {
    let mut s = SuggestedStructure {
      name:         "Wrap note".into(),
      how_it_works: "Seller carries a note wrapping the existing loan.".into(),
      key_terms:    vec![],
      risks:        vec![],
      next_steps:   vec![],
    };
    assert!(s.validate().is_ok());
    s.how_it_works = " ".into();
    assert!(s.validate().is_err());
  }

  #[test]
  fn freshness_tracks_edits_and_staleness() {
    let created = Utc::now();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let pair = PairKey::new(a, b).unwrap();
    let m = Match {
      match_id:          Uuid::new_v4(),
      listing_a:         pair.low(),
      listing_b:         pair.high(),
      have_listing_id:   a,
      want_listing_id:   b,
      score:             0.4,
      breakdown:         FeatureBreakdown::default(),
      rationale:         String::new(),
      structures:        vec![],
      inputs_hash:       "h1".into(),
      stale:             false,
      newest_listing_at: created,
      created_at:        created,
    };
    let before = created - Duration::seconds(5);
    assert!(m.is_fresh("h1", before, before));
    assert!(!m.is_fresh("h2", before, before));
    assert!(!m.is_fresh("h1", created + Duration::seconds(1), before));
    assert!(!Match { stale: true, ..m }.is_fresh("h1", before, before));
  }
}
