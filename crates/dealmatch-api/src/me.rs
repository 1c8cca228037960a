//! Liveness and the caller's own account state.

use axum::{Json, extract::State};
use chrono::Utc;
use dealmatch_core::{
  Error,
  completion::TextCompleter,
  entitlement::SubscriptionEntitlement,
  store::MarketStore,
};
use serde_json::{Value, json};

use crate::{AppState, error::ApiError, identity::Caller};

/// `GET /health`
pub async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

/// `GET /me/entitlement`: the stored record, or a `NONE` default.
pub async fn entitlement<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
) -> Result<Json<SubscriptionEntitlement>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  let stored = state
    .store
    .get_entitlement(caller.id().clone())
    .await
    .map_err(Error::store)?;
  Ok(Json(
    stored.unwrap_or_else(|| SubscriptionEntitlement::none(caller.id().clone(), Utc::now())),
  ))
}
