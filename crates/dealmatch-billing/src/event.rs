//! Typed decoding of billing events and their mapping onto entitlement
//! updates.
//!
//! Events follow the common processor envelope:
//!
//! ```json
//! {"id": "evt_…", "type": "customer.subscription.updated", "created": 1700000000,
//!  "data": {"object": { … }}}
//! ```

use std::collections::HashMap;

use chrono::{DateTime, TimeZone as _, Utc};
use dealmatch_core::{entitlement::EntitlementStatus, user::UserId};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  CheckoutCompleted,
  SubscriptionCreated,
  SubscriptionUpdated,
  SubscriptionDeleted,
  InvoicePaid,
  InvoiceFailed,
  Unknown,
}

impl EventKind {
  pub fn parse(raw: &str) -> Self {
    match raw {
      "checkout.session.completed" => Self::CheckoutCompleted,
      "customer.subscription.created" => Self::SubscriptionCreated,
      "customer.subscription.updated" => Self::SubscriptionUpdated,
      "customer.subscription.deleted" => Self::SubscriptionDeleted,
      "invoice.paid" | "invoice.payment_succeeded" => Self::InvoicePaid,
      "invoice.payment_failed" => Self::InvoiceFailed,
      _ => Self::Unknown,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingEvent {
  pub id:      String,
  #[serde(rename = "type")]
  pub kind:    String,
  /// Billing-side creation time, unix seconds.
  pub created: i64,
  pub data:    EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
  pub object: Value,
}

// ─── Object payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CheckoutSession {
  customer:            Option<String>,
  subscription:        Option<String>,
  client_reference_id: Option<String>,
  #[serde(default)]
  metadata:            HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PlanRef {
  id:       String,
  nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Subscription {
  id:                   String,
  customer:             Option<String>,
  status:               String,
  current_period_start: Option<i64>,
  current_period_end:   Option<i64>,
  plan:                 Option<PlanRef>,
  #[serde(default)]
  metadata:             HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Invoice {
  customer:     Option<String>,
  subscription: Option<String>,
  period_start: Option<i64>,
  period_end:   Option<i64>,
  #[serde(default)]
  metadata:     HashMap<String, String>,
}

// ─── Mapping ─────────────────────────────────────────────────────────────────

/// How an event identifies its user. Both forms come from the signed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
  /// Our own user id, attached at checkout creation.
  Direct(UserId),
  /// A processor customer id bound to a user by an earlier checkout.
  Customer(String),
}

/// The `(status, plan, period)` tuple an event maps to, plus identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapped {
  pub user:            UserRef,
  pub status:          Option<EntitlementStatus>,
  pub plan:            Option<String>,
  pub customer_id:     Option<String>,
  pub subscription_id: Option<String>,
  pub period_start:    Option<DateTime<Utc>>,
  pub period_end:      Option<DateTime<Utc>>,
  /// Set for checkout only: the record is created at checkout time.
  pub opens_record:    bool,
}

/// Decode the raw request body.
pub fn decode(payload: &[u8]) -> Result<BillingEvent> {
  let event: BillingEvent = serde_json::from_slice(payload)?;
  if event.id.trim().is_empty() {
    return Err(Error::MalformedEvent("event id is empty".into()));
  }
  Ok(event)
}

fn ts(secs: Option<i64>) -> Option<DateTime<Utc>> {
  secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

fn direct(raw: Option<&String>) -> Option<UserRef> {
  raw.and_then(|id| UserId::new(id.as_str()).ok()).map(UserRef::Direct)
}

fn user_ref(metadata: &HashMap<String, String>, customer: Option<&String>) -> Result<UserRef> {
  direct(metadata.get("user_id"))
    .or_else(|| customer.cloned().map(UserRef::Customer))
    .ok_or_else(|| Error::MalformedEvent("event carries no user or customer reference".into()))
}

/// Map a processor subscription status onto ours.
pub fn subscription_status(raw: &str) -> Option<EntitlementStatus> {
  match raw {
    "trialing" => Some(EntitlementStatus::Trialing),
    "active" => Some(EntitlementStatus::Active),
    "past_due" | "unpaid" | "incomplete" => Some(EntitlementStatus::PastDue),
    "canceled" | "incomplete_expired" => Some(EntitlementStatus::Canceled),
    _ => None,
  }
}

impl BillingEvent {
  pub fn event_kind(&self) -> EventKind { EventKind::parse(&self.kind) }

  pub fn created_at(&self) -> Result<DateTime<Utc>> {
    ts(Some(self.created))
      .ok_or_else(|| Error::MalformedEvent(format!("bad created timestamp {}", self.created)))
  }

  fn object<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_value(self.data.object.clone())
      .map_err(|e| Error::MalformedEvent(format!("{} object: {e}", self.kind)))
  }

  /// Map the event to an entitlement change. `Ok(None)` for kinds that are
  /// acknowledged without effect.
  pub fn mapping(&self) -> Result<Option<Mapped>> {
    let mapped = match self.event_kind() {
      EventKind::Unknown => return Ok(None),

      EventKind::CheckoutCompleted => {
        let s: CheckoutSession = self.object()?;
        let user = direct(s.client_reference_id.as_ref())
          .or_else(|| direct(s.metadata.get("user_id")))
          .ok_or_else(|| Error::MalformedEvent("checkout session has no user reference".into()))?;
        Mapped {
          user,
          status: Some(EntitlementStatus::Active),
          plan: s.metadata.get("plan").cloned(),
          customer_id: s.customer,
          subscription_id: s.subscription,
          period_start: None,
          period_end: None,
          opens_record: true,
        }
      }

      kind @ (EventKind::SubscriptionCreated
      | EventKind::SubscriptionUpdated
      | EventKind::SubscriptionDeleted) => {
        let s: Subscription = self.object()?;
        let status = if kind == EventKind::SubscriptionDeleted {
          Some(EntitlementStatus::Canceled)
        } else {
          subscription_status(&s.status)
        };
        let plan = s
          .metadata
          .get("plan")
          .cloned()
          .or_else(|| s.plan.map(|p| p.nickname.unwrap_or(p.id)));
        Mapped {
          user: user_ref(&s.metadata, s.customer.as_ref())?,
          status,
          plan,
          customer_id: s.customer,
          subscription_id: Some(s.id),
          period_start: ts(s.current_period_start),
          period_end: ts(s.current_period_end),
          opens_record: false,
        }
      }

      kind @ (EventKind::InvoicePaid | EventKind::InvoiceFailed) => {
        let inv: Invoice = self.object()?;
        let paid = kind == EventKind::InvoicePaid;
        Mapped {
          user: user_ref(&inv.metadata, inv.customer.as_ref())?,
          status: Some(if paid { EntitlementStatus::Active } else { EntitlementStatus::PastDue }),
          plan: None,
          customer_id: inv.customer,
          subscription_id: inv.subscription,
          period_start: if paid { ts(inv.period_start) } else { None },
          period_end: if paid { ts(inv.period_end) } else { None },
          opens_record: false,
        }
      }
    };
    Ok(Some(mapped))
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn event(kind: &str, object: Value) -> BillingEvent {
    let raw = json!({"id": "evt_1", "type": kind, "created": 1_700_000_000, "data": {"object": object}});
    decode(raw.to_string().as_bytes()).unwrap()
  }

  #[test]
  fn checkout_binds_customer_to_user() {
    let e = event(
      "checkout.session.completed",
      json!({"customer": "cus_1", "subscription": "sub_1", "client_reference_id": "user-1",
             "metadata": {"plan": "pro"}}),
    );
    let m = e.mapping().unwrap().unwrap();
    assert_eq!(m.user, UserRef::Direct(UserId::new("user-1").unwrap()));
    assert_eq!(m.status, Some(EntitlementStatus::Active));
    assert_eq!(m.customer_id.as_deref(), Some("cus_1"));
    assert_eq!(m.plan.as_deref(), Some("pro"));
    assert!(m.opens_record);
  }

  #[test]
  fn checkout_without_user_is_malformed() {
    let e = event("checkout.session.completed", json!({"customer": "cus_1"}));
    assert!(matches!(e.mapping(), Err(Error::MalformedEvent(_))));
  }

  #[test]
  fn subscription_update_maps_status_period_and_plan() {
    let e = event(
      "customer.subscription.updated",
      json!({"id": "sub_1", "customer": "cus_1", "status": "past_due",
             "current_period_start": 1_700_000_000, "current_period_end": 1_702_592_000,
             "plan": {"id": "price_123", "nickname": "pro"}}),
    );
    let m = e.mapping().unwrap().unwrap();
    assert_eq!(m.user, UserRef::Customer("cus_1".into()));
    assert_eq!(m.status, Some(EntitlementStatus::PastDue));
    assert_eq!(m.plan.as_deref(), Some("pro"));
    assert_eq!(m.period_end.unwrap().timestamp(), 1_702_592_000);
    assert!(!m.opens_record);
  }

  #[test]
  fn subscription_deleted_cancels_regardless_of_status() {
    let e = event(
      "customer.subscription.deleted",
      json!({"id": "sub_1", "customer": "cus_1", "status": "active",
             "metadata": {"user_id": "user-1"}}),
    );
    let m = e.mapping().unwrap().unwrap();
    assert_eq!(m.status, Some(EntitlementStatus::Canceled));
    assert_eq!(m.user, UserRef::Direct(UserId::new("user-1").unwrap()));
  }

  #[test]
  fn invoice_failed_is_past_due() {
    let e = event("invoice.payment_failed", json!({"customer": "cus_1", "subscription": "sub_1"}));
    let m = e.mapping().unwrap().unwrap();
    assert_eq!(m.status, Some(EntitlementStatus::PastDue));
    assert!(m.period_start.is_none());
  }

  #[test]
  fn unknown_kind_maps_to_nothing() {
    let e = event("customer.tax_id.created", json!({"whatever": true}));
    assert_eq!(e.event_kind(), EventKind::Unknown);
    assert!(e.mapping().unwrap().is_none());
  }

  #[test]
  fn decode_rejects_non_events() {
    assert!(decode(b"not json").is_err());
    assert!(decode(br#"{"id": "", "type": "x", "created": 1, "data": {"object": {}}}"#).is_err());
  }
}
