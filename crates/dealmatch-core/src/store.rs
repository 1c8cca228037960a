//! The `MarketStore` trait: the relational store the pipeline coordinates
//! through.
//!
//! Implemented by storage backends (e.g. `dealmatch-store-sqlite`). Services
//! hold no entity state across requests; every freshness check, lease and
//! dedup decision is made against the store.

use std::{future::Future, time::Duration};

use uuid::Uuid;

use crate::{
  agreement::{AgreementChanges, AgreementDraft, AgreementStatus, NewAgreement},
  entitlement::{ApplyOutcome, EntitlementUpdate, SubscriptionEntitlement},
  listing::{Listing, ListingPatch, ListingQuery, NewListing},
  matching::{Match, NewMatch, PairKey},
  user::{NewUser, User, UserId},
};

/// All methods return `Send` futures so the trait can be used from axum
/// handlers on a multi-threaded runtime.
pub trait MarketStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Create the user on first sight; afterwards only fill in profile
  /// fields that are provided.
  fn upsert_user(
    &self,
    user: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_user(
    &self,
    id: UserId,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  // ── Listings ──────────────────────────────────────────────────────────

  fn create_listing(
    &self,
    input: NewListing,
  ) -> impl Future<Output = Result<Listing, Self::Error>> + Send + '_;

  fn get_listing(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Listing>, Self::Error>> + Send + '_;

  fn list_listings(
    &self,
    query: ListingQuery,
  ) -> impl Future<Output = Result<Vec<Listing>, Self::Error>> + Send + '_;

  /// Apply an owner edit and bump `updated_at`.
  ///
  /// In the same transaction, every match referencing the listing is marked
  /// stale and its suggested structures are discarded. Returns `None` if the
  /// listing does not exist.
  fn update_listing(
    &self,
    id: Uuid,
    patch: ListingPatch,
  ) -> impl Future<Output = Result<Option<Listing>, Self::Error>> + Send + '_;

  /// Delete a listing together with its payload, its matches and their
  /// agreement drafts. Returns `false` if it did not exist.
  fn delete_listing(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Matches ───────────────────────────────────────────────────────────

  fn get_match(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Match>, Self::Error>> + Send + '_;

  fn find_match(
    &self,
    pair: PairKey,
  ) -> impl Future<Output = Result<Option<Match>, Self::Error>> + Send + '_;

  /// Insert the match for `input.pair`, or replace the computed fields of the
  /// existing one in place (its id is kept, structures are replaced, never
  /// appended). Clears the stale flag.
  fn upsert_match(
    &self,
    input: NewMatch,
  ) -> impl Future<Output = Result<Match, Self::Error>> + Send + '_;

  /// Every match in which `user` owns one of the two listings.
  fn list_matches_for_user(
    &self,
    user: UserId,
  ) -> impl Future<Output = Result<Vec<Match>, Self::Error>> + Send + '_;

  /// Take the advisory computation lease for `pair`.
  ///
  /// Succeeds if no lease exists, the existing one has expired, or `holder`
  /// already owns it, in which case the expiry moves forward by `ttl`.
  /// Returns `false` while another holder's lease is live.
  fn try_acquire_pair_lease(
    &self,
    pair: PairKey,
    holder: Uuid,
    ttl: Duration,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Release a lease held by `holder`; a no-op otherwise.
  fn release_pair_lease(
    &self,
    pair: PairKey,
    holder: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Agreement drafts ──────────────────────────────────────────────────

  fn create_agreement(
    &self,
    input: NewAgreement,
  ) -> impl Future<Output = Result<AgreementDraft, Self::Error>> + Send + '_;

  fn get_agreement(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<AgreementDraft>, Self::Error>> + Send + '_;

  fn list_agreements_for_match(
    &self,
    match_id: Uuid,
  ) -> impl Future<Output = Result<Vec<AgreementDraft>, Self::Error>> + Send + '_;

  /// Compare-and-set edit: applied only while the stored status still equals
  /// `expected`. Returns `None` if the draft is gone or its status moved.
  fn update_agreement(
    &self,
    id: Uuid,
    expected: AgreementStatus,
    changes: AgreementChanges,
  ) -> impl Future<Output = Result<Option<AgreementDraft>, Self::Error>> + Send + '_;

  fn delete_agreement(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Entitlements ──────────────────────────────────────────────────────

  fn get_entitlement(
    &self,
    user: UserId,
  ) -> impl Future<Output = Result<Option<SubscriptionEntitlement>, Self::Error>> + Send + '_;

  /// Resolve a billing customer id bound at checkout back to its user.
  fn find_user_by_customer(
    &self,
    customer_id: String,
  ) -> impl Future<Output = Result<Option<UserId>, Self::Error>> + Send + '_;

  /// Atomically record `update.event_id` as processed and, unless it is a
  /// duplicate or older than the stored state, upsert the entitlement.
  fn apply_entitlement_update(
    &self,
    update: EntitlementUpdate,
  ) -> impl Future<Output = Result<ApplyOutcome, Self::Error>> + Send + '_;
}
