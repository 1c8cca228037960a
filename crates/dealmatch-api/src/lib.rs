//! JSON REST API for dealmatch.
//!
//! Hosts the match repository and agreement workflow services and exposes
//! them, together with the billing webhook, as an axum [`Router`] backed by
//! any [`MarketStore`] and [`TextCompleter`]. Authentication is delegated to
//! an upstream identity provider that forwards a verified user id header.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let state = dealmatch_api::AppState::new(store, completer, config);
//! axum::serve(listener, dealmatch_api::router(state)).await?;
//! ```

pub mod agreements;
pub mod error;
pub mod gate;
pub mod identity;
pub mod listings;
pub mod match_repo;
pub mod matches;
pub mod me;
pub mod webhooks;
pub mod workflow;

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  http::HeaderName,
  routing::{get, post},
};
use dealmatch_augment::{AugmentConfig, Augmenter};
use dealmatch_billing::{EntitlementSynchronizer, SignatureVerifier};
use dealmatch_core::{completion::TextCompleter, store::MarketStore};

pub use error::ApiError;
pub use match_repo::{MatchConfig, MatchRepository};
pub use workflow::AgreementWorkflow;

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ApiConfig {
  /// Header carrying the user id verified by the identity provider.
  pub identity_header:     HeaderName,
  /// Whether listing, match and draft creation require an entitlement.
  pub require_entitlement: bool,
  pub augment:             AugmentConfig,
  pub matching:            MatchConfig,
  pub webhook_secret:      String,
  pub webhook_tolerance:   Duration,
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, C> {
  pub store:      Arc<S>,
  pub matches:    Arc<MatchRepository<S, C>>,
  pub agreements: Arc<AgreementWorkflow<S, C>>,
  pub billing:    Arc<EntitlementSynchronizer<S>>,
  pub config:     Arc<ApiConfig>,
}

impl<S, C> Clone for AppState<S, C> {
  fn clone(&self) -> Self {
    Self {
      store:      self.store.clone(),
      matches:    self.matches.clone(),
      agreements: self.agreements.clone(),
      billing:    self.billing.clone(),
      config:     self.config.clone(),
    }
  }
}

impl<S: MarketStore, C: TextCompleter> AppState<S, C> {
  pub fn new(store: Arc<S>, completer: C, config: ApiConfig) -> Self {
    let augmenter = Arc::new(Augmenter::new(completer, config.augment));
    let verifier =
      SignatureVerifier::new(config.webhook_secret.clone(), config.webhook_tolerance);

    Self {
      matches: Arc::new(MatchRepository::new(
        store.clone(),
        augmenter.clone(),
        config.matching,
      )),
      agreements: Arc::new(AgreementWorkflow::new(store.clone(), augmenter)),
      billing: Arc::new(EntitlementSynchronizer::new(store.clone(), verifier)),
      store,
      config: Arc::new(config),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
pub fn router<S, C>(state: AppState<S, C>) -> Router<()>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  Router::new()
    .route("/health", get(me::health))
    // Listings
    .route("/listings", get(listings::list::<S, C>).post(listings::create::<S, C>))
    .route(
      "/listings/{id}",
      get(listings::get_one::<S, C>)
        .patch(listings::update::<S, C>)
        .delete(listings::delete_one::<S, C>),
    )
    .route("/listings/{id}/candidates", get(listings::candidates::<S, C>))
    // Matches
    .route("/matches", get(matches::list::<S, C>).post(matches::compute::<S, C>))
    .route("/matches/{id}", get(matches::get_one::<S, C>))
    .route("/matches/{id}/agreements", get(agreements::list_for_match::<S, C>))
    // Agreements
    .route("/agreements", post(agreements::create::<S, C>))
    .route(
      "/agreements/{id}",
      get(agreements::get_one::<S, C>)
        .patch(agreements::update::<S, C>)
        .delete(agreements::delete_one::<S, C>),
    )
    // Account and billing
    .route("/me/entitlement", get(me::entitlement::<S, C>))
    .route("/webhooks/billing", post(webhooks::billing::<S, C>))
    .with_state(state)
}
