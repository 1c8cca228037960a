//! Handlers for `/listings` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/listings` | Optional `?owner_id=`, `?mode=HAVE\|WANT`, `?status=` |
//! | `POST`   | `/listings` | Body: `{"mode":"HAVE","payload":{…}}`; entitlement required |
//! | `GET`    | `/listings/{id}` | 404 if not found |
//! | `PATCH`  | `/listings/{id}` | Owner only; invalidates the listing's matches |
//! | `DELETE` | `/listings/{id}` | Owner only; cascades to matches and drafts |
//! | `GET`    | `/listings/{id}/candidates` | Owner only; ranked opposite-mode listings |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use dealmatch_core::{
  Error,
  completion::TextCompleter,
  listing::{Listing, ListingMode, ListingPatch, ListingPayload, ListingQuery, ListingStatus, NewListing},
  store::MarketStore,
  user::UserId,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{AppState, error::ApiError, gate, identity::Caller, match_repo::Candidate};

async fn load<S: MarketStore>(store: &S, id: Uuid) -> Result<Listing, Error> {
  store
    .get_listing(id)
    .await
    .map_err(Error::store)?
    .ok_or_else(|| Error::not_found("listing", id))
}

fn require_owner(listing: &Listing, caller: &Caller) -> Result<(), Error> {
  if listing.is_owned_by(caller.id()) {
    Ok(())
  } else {
    Err(Error::Authorization(format!(
      "only the owner may modify listing {}",
      listing.listing_id
    )))
  }
}

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub owner_id: Option<UserId>,
  pub mode:     Option<ListingMode>,
  pub status:   Option<ListingStatus>,
}

/// `GET /listings[?owner_id=..][&mode=..][&status=..]`
pub async fn list<S, C>(
  State(state): State<AppState<S, C>>,
  _caller: Caller,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Listing>>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  let listings = state
    .store
    .list_listings(ListingQuery {
      owner_id: params.owner_id,
      mode:     params.mode,
      status:   params.status,
    })
    .await
    .map_err(Error::store)?;
  Ok(Json(listings))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  #[serde(default)]
  pub status:  ListingStatus,
  #[serde(flatten)]
  pub payload: ListingPayload,
}

/// `POST /listings`
pub async fn create<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  gate::require_entitled(state.store.as_ref(), state.config.require_entitlement, caller.id())
    .await?;
  body.payload.validate()?;

  let listing = state
    .store
    .create_listing(NewListing {
      owner_id: caller.id().clone(),
      status:   body.status,
      payload:  body.payload,
    })
    .await
    .map_err(Error::store)?;

  info!(listing_id = %listing.listing_id, user_id = %caller.id(), mode = ?listing.mode(), "listing created");
  Ok((StatusCode::CREATED, Json(listing)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /listings/{id}`
pub async fn get_one<S, C>(
  State(state): State<AppState<S, C>>,
  _caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<Listing>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  Ok(Json(load(state.store.as_ref(), id).await?))
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// `PATCH /listings/{id}` with `{"status": "PAUSED"}` and/or a payload of
/// the listing's existing mode.
pub async fn update<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Path(id): Path<Uuid>,
  Json(patch): Json<ListingPatch>,
) -> Result<Json<Listing>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  if patch.is_empty() {
    return Err(Error::Validation("nothing to update".into()).into());
  }
  let current = load(state.store.as_ref(), id).await?;
  require_owner(&current, &caller)?;

  if let Some(payload) = &patch.payload {
    if payload.mode() != current.mode() {
      return Err(
        Error::Validation(format!("listing {id} is {:?}; its mode cannot change", current.mode()))
          .into(),
      );
    }
    payload.validate()?;
  }

  let listing = state
    .store
    .update_listing(id, patch)
    .await
    .map_err(Error::store)?
    .ok_or_else(|| Error::not_found("listing", id))?;

  info!(listing_id = %id, "listing updated; its matches are now stale");
  Ok(Json(listing))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /listings/{id}`
pub async fn delete_one<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  let current = load(state.store.as_ref(), id).await?;
  require_owner(&current, &caller)?;

  if !state.store.delete_listing(id).await.map_err(Error::store)? {
    return Err(Error::not_found("listing", id).into());
  }
  info!(listing_id = %id, "listing deleted");
  Ok(StatusCode::NO_CONTENT)
}

// ─── Candidates ───────────────────────────────────────────────────────────────

/// `GET /listings/{id}/candidates`
pub async fn candidates<S, C>(
  State(state): State<AppState<S, C>>,
  caller: Caller,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Candidate>>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  Ok(Json(state.matches.candidates(caller.id(), id).await?))
}
