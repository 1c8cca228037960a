//! `POST /webhooks/billing`: signed billing processor deliveries.
//!
//! Authenticated by the signature header, not by the identity provider.
//! Verification failures and unknown users answer 4xx so the processor
//! gives up; store failures answer 5xx so it redelivers.

use axum::{
  Json,
  body::Bytes,
  extract::State,
  http::HeaderMap,
};
use dealmatch_billing::{ProcessingResult, SIGNATURE_HEADER};
use dealmatch_core::{completion::TextCompleter, store::MarketStore};

use crate::{AppState, error::ApiError};

pub async fn billing<S, C>(
  State(state): State<AppState<S, C>>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Json<ProcessingResult>, ApiError>
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
  Ok(Json(state.billing.handle(&body, signature).await?))
}
