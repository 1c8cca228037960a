//! [`EntitlementSynchronizer`]: applies signed billing events to the
//! entitlement store exactly once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dealmatch_core::{
  entitlement::{ApplyOutcome, EntitlementStatus, EntitlementUpdate},
  store::MarketStore,
  user::UserId,
  Error,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  event::{self, UserRef},
  signature::SignatureVerifier,
};

/// What happened to one webhook delivery. Every variant is a success from
/// the processor's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProcessingResult {
  Applied { event_id: String, user_id: UserId, status: EntitlementStatus },
  Duplicate { event_id: String },
  /// Older than the stored state; recorded but not applied.
  Stale { event_id: String },
  /// A kind that carries no entitlement change.
  Ignored { event_id: String, kind: String },
  /// The user has not checked out yet, so there is no record to change.
  Unopened { event_id: String, user_id: UserId },
}

pub struct EntitlementSynchronizer<S> {
  store:    Arc<S>,
  verifier: SignatureVerifier,
}

impl<S> Clone for EntitlementSynchronizer<S> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), verifier: self.verifier.clone() }
  }
}

impl<S: MarketStore> EntitlementSynchronizer<S> {
  pub fn new(store: Arc<S>, verifier: SignatureVerifier) -> Self { Self { store, verifier } }

  /// Verify, decode and apply one delivery.
  ///
  /// Redeliveries of an applied event succeed without effect. Store failures
  /// come back as [`Error::Store`] so the processor retries.
  pub async fn handle(
    &self,
    payload: &[u8],
    signature: Option<&str>,
  ) -> dealmatch_core::Result<ProcessingResult> {
    self.handle_at(payload, signature, Utc::now()).await
  }

  pub async fn handle_at(
    &self,
    payload: &[u8],
    signature: Option<&str>,
    now: DateTime<Utc>,
  ) -> dealmatch_core::Result<ProcessingResult> {
    if let Err(e) = self.verifier.verify(payload, signature, now) {
      warn!(error = %e, "rejecting billing webhook");
      return Err(e.into());
    }

    let event = event::decode(payload)?;
    let event_id = event.id.clone();

    match self.apply(&event).await {
      Err(Error::DuplicateEvent(id)) => {
        debug!(event_id = %id, "billing event already applied");
        Ok(ProcessingResult::Duplicate { event_id: id })
      }
      Err(e) => {
        warn!(event_id = %event_id, kind = %event.kind, error = %e, "billing event failed");
        Err(e)
      }
      Ok(result) => Ok(result),
    }
  }

  async fn apply(&self, event: &event::BillingEvent) -> dealmatch_core::Result<ProcessingResult> {
    let Some(mapped) = event.mapping()? else {
      debug!(event_id = %event.id, kind = %event.kind, "ignoring billing event kind");
      return Ok(ProcessingResult::Ignored { event_id: event.id.clone(), kind: event.kind.clone() });
    };

    let user_id = self.resolve(&mapped.user).await?;
    let update = EntitlementUpdate {
      user_id:         user_id.clone(),
      event_id:        event.id.clone(),
      event_at:        event.created_at()?,
      status:          mapped.status,
      plan:            mapped.plan,
      customer_id:     mapped.customer_id,
      subscription_id: mapped.subscription_id,
      period_start:    mapped.period_start,
      period_end:      mapped.period_end,
      opens_record:    mapped.opens_record,
    };

    let outcome = self
      .store
      .apply_entitlement_update(update)
      .await
      .map_err(Error::store)?;

    match outcome {
      ApplyOutcome::Applied(ent) => {
        info!(
          event_id = %event.id,
          user_id = %ent.user_id,
          status = ?ent.status,
          "entitlement updated"
        );
        Ok(ProcessingResult::Applied {
          event_id: event.id.clone(),
          user_id:  ent.user_id,
          status:   ent.status,
        })
      }
      ApplyOutcome::Duplicate => Err(Error::DuplicateEvent(event.id.clone())),
      ApplyOutcome::Stale => {
        info!(event_id = %event.id, user_id = %user_id, "billing event older than stored state");
        Ok(ProcessingResult::Stale { event_id: event.id.clone() })
      }
      ApplyOutcome::Unopened => {
        warn!(
          event_id = %event.id,
          user_id = %user_id,
          kind = %event.kind,
          "billing event for a user without a checkout; not applied"
        );
        Ok(ProcessingResult::Unopened { event_id: event.id.clone(), user_id })
      }
    }
  }

  async fn resolve(&self, user: &UserRef) -> dealmatch_core::Result<UserId> {
    match user {
      UserRef::Direct(id) => self
        .store
        .get_user(id.clone())
        .await
        .map_err(Error::store)?
        .map(|u| u.user_id)
        .ok_or_else(|| Error::not_found("user", id)),
      UserRef::Customer(customer) => self
        .store
        .find_user_by_customer(customer.clone())
        .await
        .map_err(Error::store)?
        .ok_or_else(|| Error::not_found("billing customer", customer)),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
  };

  use chrono::TimeZone as _;
  use dealmatch_core::{
    agreement::{AgreementChanges, AgreementDraft, AgreementStatus, NewAgreement},
    entitlement::SubscriptionEntitlement,
    listing::{Listing, ListingPatch, ListingQuery, NewListing},
    matching::{Match, NewMatch, PairKey},
    user::{NewUser, User},
  };
  use dealmatch_store_sqlite::SqliteStore;
  use serde_json::json;
  use uuid::Uuid;

  use super::*;

  const SECRET: &str = "whsec_test";
  const NOW: i64 = 1_700_000_000;

  async fn setup() -> (Arc<SqliteStore>, EntitlementSynchronizer<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    store
      .upsert_user(NewUser {
        user_id:      UserId::new("user-1").unwrap(),
        email:        Some("alice@example.com".into()),
        display_name: None,
      })
      .await
      .unwrap();
    let verifier = SignatureVerifier::new(SECRET, Duration::from_secs(300));
    (store.clone(), EntitlementSynchronizer::new(store, verifier))
  }

  fn body(id: &str, kind: &str, created: i64, object: serde_json::Value) -> Vec<u8> {
    json!({"id": id, "type": kind, "created": created, "data": {"object": object}})
      .to_string()
      .into_bytes()
  }

  async fn deliver<S: MarketStore>(
    sync: &EntitlementSynchronizer<S>,
    payload: &[u8],
  ) -> dealmatch_core::Result<ProcessingResult> {
    let header = SignatureVerifier::new(SECRET, Duration::from_secs(300))
      .sign(payload, NOW)
      .unwrap();
    let now = Utc.timestamp_opt(NOW, 0).unwrap();
    sync.handle_at(payload, Some(&header), now).await
  }

  fn checkout(id: &str, created: i64) -> Vec<u8> {
    body(
      id,
      "checkout.session.completed",
      created,
      json!({"customer": "cus_1", "subscription": "sub_1", "client_reference_id": "user-1",
             "metadata": {"plan": "pro"}}),
    )
  }

  #[tokio::test]
  async fn checkout_then_redelivery_applies_once() {
    let (store, sync) = setup().await;
    let payload = checkout("evt_1", NOW - 10);

    let first = deliver(&sync, &payload).await.unwrap();
    assert_eq!(first, ProcessingResult::Applied {
      event_id: "evt_1".into(),
      user_id:  UserId::new("user-1").unwrap(),
      status:   EntitlementStatus::Active,
    });

    let again = deliver(&sync, &payload).await.unwrap();
    assert_eq!(again, ProcessingResult::Duplicate { event_id: "evt_1".into() });

    let ent = store
      .get_entitlement(UserId::new("user-1").unwrap())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(ent.status, EntitlementStatus::Active);
    assert_eq!(ent.customer_id.as_deref(), Some("cus_1"));
    assert_eq!(ent.last_event_id.as_deref(), Some("evt_1"));
  }

  #[tokio::test]
  async fn older_event_arriving_late_is_not_applied() {
    let (store, sync) = setup().await;
    deliver(&sync, &checkout("evt_1", NOW - 100)).await.unwrap();

    let canceled = body(
      "evt_3",
      "customer.subscription.deleted",
      NOW - 10,
      json!({"id": "sub_1", "customer": "cus_1", "status": "canceled"}),
    );
    deliver(&sync, &canceled).await.unwrap();

    let late_update = body(
      "evt_2",
      "customer.subscription.updated",
      NOW - 50,
      json!({"id": "sub_1", "customer": "cus_1", "status": "active"}),
    );
    let result = deliver(&sync, &late_update).await.unwrap();
    assert_eq!(result, ProcessingResult::Stale { event_id: "evt_2".into() });

    let ent = store
      .get_entitlement(UserId::new("user-1").unwrap())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(ent.status, EntitlementStatus::Canceled);
    assert_eq!(ent.last_event_id.as_deref(), Some("evt_3"));
  }

  #[tokio::test]
  async fn failed_invoice_resolves_user_through_customer_id() {
    let (store, sync) = setup().await;
    deliver(&sync, &checkout("evt_1", NOW - 100)).await.unwrap();

    let failed = body(
      "evt_2",
      "invoice.payment_failed",
      NOW - 10,
      json!({"customer": "cus_1", "subscription": "sub_1"}),
    );
    deliver(&sync, &failed).await.unwrap();

    let ent = store
      .get_entitlement(UserId::new("user-1").unwrap())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(ent.status, EntitlementStatus::PastDue);
    assert!(!ent.is_entitled());
    // Fields the invoice does not carry are kept.
    assert_eq!(ent.plan.as_deref(), Some("pro"));
  }

  #[tokio::test]
  async fn unknown_kind_is_acknowledged() {
    let (_, sync) = setup().await;
    let payload = body("evt_9", "customer.tax_id.created", NOW, json!({}));
    let result = deliver(&sync, &payload).await.unwrap();
    assert!(matches!(result, ProcessingResult::Ignored { ref kind, .. } if kind == "customer.tax_id.created"));
  }

  #[tokio::test]
  async fn bad_signature_is_rejected_before_decoding() {
    let (store, sync) = setup().await;
    let payload = checkout("evt_1", NOW);
    let now = Utc.timestamp_opt(NOW, 0).unwrap();

    let forged = format!("t={NOW},v1={}", "ab".repeat(32));
    let result = sync.handle_at(&payload, Some(&forged), now).await;
    assert!(matches!(result, Err(Error::InvalidSignature(_))));

    let result = sync.handle_at(&payload, None, now).await;
    assert!(matches!(result, Err(Error::InvalidSignature(_))));

    let ent = store.get_entitlement(UserId::new("user-1").unwrap()).await.unwrap();
    assert!(ent.is_none());
  }

  #[tokio::test]
  async fn unknown_user_or_customer_is_not_found() {
    let (_, sync) = setup().await;

    let stranger = body(
      "evt_1",
      "checkout.session.completed",
      NOW,
      json!({"customer": "cus_9", "client_reference_id": "nobody"}),
    );
    assert!(matches!(deliver(&sync, &stranger).await, Err(Error::NotFound { entity: "user", .. })));

    let orphan = body("evt_2", "invoice.paid", NOW, json!({"customer": "cus_9"}));
    assert!(matches!(
      deliver(&sync, &orphan).await,
      Err(Error::NotFound { entity: "billing customer", .. })
    ));
  }

  #[tokio::test]
  async fn subscription_event_before_checkout_opens_nothing() {
    let (store, sync) = setup().await;
    let updated = body(
      "evt_1",
      "customer.subscription.updated",
      NOW - 50,
      json!({"id": "sub_1", "customer": "cus_1", "status": "active",
             "metadata": {"user_id": "user-1"}}),
    );
    let result = deliver(&sync, &updated).await.unwrap();
    assert_eq!(result, ProcessingResult::Unopened {
      event_id: "evt_1".into(),
      user_id:  UserId::new("user-1").unwrap(),
    });
    assert!(store.get_entitlement(UserId::new("user-1").unwrap()).await.unwrap().is_none());

    let applied = deliver(&sync, &checkout("evt_2", NOW - 10)).await.unwrap();
    assert!(matches!(applied, ProcessingResult::Applied { .. }));
  }

  /// Delegates to SQLite but can make the entitlement write fail.
  struct FlakyStore {
    inner:       Arc<SqliteStore>,
    fail_writes: AtomicBool,
  }

  impl MarketStore for FlakyStore {
    type Error = dealmatch_store_sqlite::Error;

    async fn upsert_user(&self, user: NewUser) -> Result<User, Self::Error> {
      self.inner.upsert_user(user).await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, Self::Error> {
      self.inner.get_user(id).await
    }

    async fn create_listing(&self, input: NewListing) -> Result<Listing, Self::Error> {
      self.inner.create_listing(input).await
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>, Self::Error> {
      self.inner.get_listing(id).await
    }

    async fn list_listings(&self, query: ListingQuery) -> Result<Vec<Listing>, Self::Error> {
      self.inner.list_listings(query).await
    }

    async fn update_listing(
      &self,
      id: Uuid,
      patch: ListingPatch,
    ) -> Result<Option<Listing>, Self::Error> {
      self.inner.update_listing(id, patch).await
    }

    async fn delete_listing(&self, id: Uuid) -> Result<bool, Self::Error> {
      self.inner.delete_listing(id).await
    }

    async fn get_match(&self, id: Uuid) -> Result<Option<Match>, Self::Error> {
      self.inner.get_match(id).await
    }

    async fn find_match(&self, pair: PairKey) -> Result<Option<Match>, Self::Error> {
      self.inner.find_match(pair).await
    }

    async fn upsert_match(&self, input: NewMatch) -> Result<Match, Self::Error> {
      self.inner.upsert_match(input).await
    }

    async fn list_matches_for_user(&self, user: UserId) -> Result<Vec<Match>, Self::Error> {
      self.inner.list_matches_for_user(user).await
    }

    async fn try_acquire_pair_lease(
      &self,
      pair: PairKey,
      holder: Uuid,
      ttl: Duration,
    ) -> Result<bool, Self::Error> {
      self.inner.try_acquire_pair_lease(pair, holder, ttl).await
    }

    async fn release_pair_lease(&self, pair: PairKey, holder: Uuid) -> Result<(), Self::Error> {
      self.inner.release_pair_lease(pair, holder).await
    }

    async fn create_agreement(&self, input: NewAgreement) -> Result<AgreementDraft, Self::Error> {
      self.inner.create_agreement(input).await
    }

    async fn get_agreement(&self, id: Uuid) -> Result<Option<AgreementDraft>, Self::Error> {
      self.inner.get_agreement(id).await
    }

    async fn list_agreements_for_match(
      &self,
      match_id: Uuid,
    ) -> Result<Vec<AgreementDraft>, Self::Error> {
      self.inner.list_agreements_for_match(match_id).await
    }

    async fn update_agreement(
      &self,
      id: Uuid,
      expected: AgreementStatus,
      changes: AgreementChanges,
    ) -> Result<Option<AgreementDraft>, Self::Error> {
      self.inner.update_agreement(id, expected, changes).await
    }

    async fn delete_agreement(&self, id: Uuid) -> Result<bool, Self::Error> {
      self.inner.delete_agreement(id).await
    }

    async fn get_entitlement(
      &self,
      user: UserId,
    ) -> Result<Option<SubscriptionEntitlement>, Self::Error> {
      self.inner.get_entitlement(user).await
    }

    async fn find_user_by_customer(
      &self,
      customer_id: String,
    ) -> Result<Option<UserId>, Self::Error> {
      self.inner.find_user_by_customer(customer_id).await
    }

    async fn apply_entitlement_update(
      &self,
      update: EntitlementUpdate,
    ) -> Result<ApplyOutcome, Self::Error> {
      if self.fail_writes.load(Ordering::SeqCst) {
        return Err(tokio_rusqlite::Error::ConnectionClosed.into());
      }
      self.inner.apply_entitlement_update(update).await
    }
  }

  #[tokio::test]
  async fn store_failure_is_retryable_and_leaves_the_event_unrecorded() {
    let (inner, _) = setup().await;
    let flaky = Arc::new(FlakyStore { inner: inner.clone(), fail_writes: AtomicBool::new(true) });
    let verifier = SignatureVerifier::new(SECRET, Duration::from_secs(300));
    let sync = EntitlementSynchronizer::new(flaky.clone(), verifier);
    let payload = checkout("evt_1", NOW - 10);

    let err = deliver(&sync, &payload).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(inner.get_entitlement(UserId::new("user-1").unwrap()).await.unwrap().is_none());

    // The processor's redelivery goes through once the store recovers.
    flaky.fail_writes.store(false, Ordering::SeqCst);
    let retried = deliver(&sync, &payload).await.unwrap();
    assert!(matches!(retried, ProcessingResult::Applied { .. }));
  }

  #[tokio::test]
  async fn malformed_body_is_a_validation_error() {
    let (_, sync) = setup().await;
    let result = deliver(&sync, b"{\"nope\": true}").await;
    assert!(matches!(result, Err(Error::Validation(_))));
  }
}
