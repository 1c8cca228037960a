//! Handlers for `/matches` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/matches` | Body: `{"listing_a": id, "listing_b": id}`; cached or computed |
//! | `GET`  | `/matches` | The caller's matches, best first |
//! | `GET`  | `/matches/{id}` | Participants only |

use axum::{
  Json,
  extract::{Path, State},
};
use dealmatch_core::{completion::TextCompleter, matching::Match, store::MarketStore};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError, gate, identity::Caller};

#[derive(Debug, Deserialize)]
pub struct ComputeBody {
  pub listing_a: Uuid,
  pub listing_b: Uuid,
}

/// `POST /matches`
pub async fn compute<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Json(body): Json<ComputeBody>,
) -> Result<Json<Match>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  gate::require_entitled(state.store.as_ref(), state.config.require_entitlement, caller.id())
    .await?;
  let m = state
    .matches
    .get_or_create(caller.id(), body.listing_a, body.listing_b)
    .await?;
  Ok(Json(m))
}

/// `GET /matches`
pub async fn list<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
) -> Result<Json<Vec<Match>>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  Ok(Json(state.matches.list_for_user(caller.id()).await?))
}

/// `GET /matches/{id}`
pub async fn get_one<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<Match>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  Ok(Json(state.matches.get(caller.id(), id).await?))
}
