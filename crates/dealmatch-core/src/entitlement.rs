//! Subscription entitlements, written only by the billing synchronizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitlementStatus {
  #[default]
  None,
  Trialing,
  Active,
  PastDue,
  Canceled,
}

impl EntitlementStatus {
  /// Whether the status lets a user create listings, matches and drafts.
  pub fn is_entitled(self) -> bool { matches!(self, Self::Trialing | Self::Active) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEntitlement {
  pub user_id:              UserId,
  pub plan:                 Option<String>,
  /// Billing-processor customer id, bound at checkout.
  pub customer_id:          Option<String>,
  pub subscription_id:      Option<String>,
  pub status:               EntitlementStatus,
  pub current_period_start: Option<DateTime<Utc>>,
  pub current_period_end:   Option<DateTime<Utc>>,
  /// Id of the most recently applied billing event.
  pub last_event_id:        Option<String>,
  /// Billing-side timestamp of that event; later arrivals older than this
  /// are ignored.
  pub last_event_at:        Option<DateTime<Utc>>,
  pub updated_at:           DateTime<Utc>,
}

impl SubscriptionEntitlement {
  /// The record a user has before any billing event was applied.
  pub fn none(user_id: UserId, now: DateTime<Utc>) -> Self {
    Self {
      user_id,
      plan: None,
      customer_id: None,
      subscription_id: None,
      status: EntitlementStatus::None,
      current_period_start: None,
      current_period_end: None,
      last_event_id: None,
      last_event_at: None,
      updated_at: now,
    }
  }

  pub fn is_entitled(&self) -> bool { self.status.is_entitled() }
}

/// One billing event mapped onto the entitlement record. `None` fields keep
/// the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementUpdate {
  pub user_id:         UserId,
  pub event_id:        String,
  pub event_at:        DateTime<Utc>,
  pub status:          Option<EntitlementStatus>,
  pub plan:            Option<String>,
  pub customer_id:     Option<String>,
  pub subscription_id: Option<String>,
  pub period_start:    Option<DateTime<Utc>>,
  pub period_end:      Option<DateTime<Utc>>,
  /// Whether the event may create a missing record. Only a completed
  /// checkout does; every other event applies to an existing one.
  pub opens_record:    bool,
}

/// Result of [`crate::store::MarketStore::apply_entitlement_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
  Applied(SubscriptionEntitlement),
  /// The event id was seen before; nothing changed.
  Duplicate,
  /// The event is older than the stored state; recorded but not applied.
  Stale,
  /// The user has no record and the event may not open one; recorded but
  /// not applied.
  Unopened,
}
