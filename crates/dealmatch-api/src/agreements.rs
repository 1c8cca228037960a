//! Handlers for agreement draft endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/agreements` | Body: [`CreateDraft`]; returns 201; entitlement required |
//! | `GET`    | `/agreements/{id}` | Participants only |
//! | `PATCH`  | `/agreements/{id}` | Creator only; body `{"title","content","status"}` |
//! | `DELETE` | `/agreements/{id}` | Creator only; non-terminal drafts |
//! | `GET`    | `/matches/{id}/agreements` | Participants only |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use dealmatch_core::{
  agreement::{AgreementChanges, AgreementDraft},
  completion::TextCompleter,
  store::MarketStore,
};
use uuid::Uuid;

use crate::{AppState, error::ApiError, gate, identity::Caller, workflow::CreateDraft};

/// `POST /agreements`
pub async fn create<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Json(body): Json<CreateDraft>,
) -> Result<impl IntoResponse, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  gate::require_entitled(state.store.as_ref(), state.config.require_entitlement, caller.id())
    .await?;
  let draft = state.agreements.create(caller.id(), body).await?;
  Ok((StatusCode::CREATED, Json(draft)))
}

/// `GET /agreements/{id}`
pub async fn get_one<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<AgreementDraft>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  Ok(Json(state.agreements.get(caller.id(), id).await?))
}

/// `PATCH /agreements/{id}`
pub async fn update<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  Json(changes): Json<AgreementChanges>,
) -> Result<Json<AgreementDraft>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  Ok(Json(state.agreements.update(caller.id(), id, changes).await?))
}

/// `DELETE /agreements/{id}`
pub async fn delete_one<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  state.agreements.delete(caller.id(), id).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `GET /matches/{id}/agreements`
pub async fn list_for_match<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Path(match_id): Path<Uuid>,
) -> Result<Json<Vec<AgreementDraft>>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  Ok(Json(state.agreements.list_for_match(caller.id(), match_id).await?))
}
