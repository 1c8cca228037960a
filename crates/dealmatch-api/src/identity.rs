//! Verified-identity extractor.
//!
//! The identity provider sits in front of the API and forwards the verified
//! user id in a configurable header (default `x-user-id`). Optional profile
//! headers fill in the user record on first sight.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, request::Parts},
};
use dealmatch_core::{
  Error,
  completion::TextCompleter,
  store::MarketStore,
  user::{NewUser, User, UserId},
};

use crate::{AppState, error::ApiError};

pub const EMAIL_HEADER: &str = "x-user-email";
pub const NAME_HEADER: &str = "x-user-name";

/// The authenticated user behind a request, created on first access.
#[derive(Debug, Clone)]
pub struct Caller(pub User);

impl Caller {
  pub fn id(&self) -> &UserId { &self.0.user_id }
}

fn header(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<String> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_owned)
}

impl<S, C> FromRequestParts<AppState<S, C>> for Caller
where
  S: MarketStore + 'static,
  C: TextCompleter + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S, C>,
  ) -> Result<Self, Self::Rejection> {
    let raw = header(&parts.headers, &state.config.identity_header)
      .ok_or(ApiError::Unauthenticated)?;
    let user_id = UserId::new(raw).map_err(|_| ApiError::Unauthenticated)?;
    let email = header(&parts.headers, EMAIL_HEADER);
    let display_name = header(&parts.headers, NAME_HEADER);

    let existing = state
      .store
      .get_user(user_id.clone())
      .await
      .map_err(Error::store)?;

    // Skip the write when the profile headers add nothing new.
    if let Some(user) = existing
      && email.as_ref().is_none_or(|e| user.email.as_ref() == Some(e))
      && display_name.as_ref().is_none_or(|n| user.display_name.as_ref() == Some(n))
    {
      return Ok(Caller(user));
    }

    let user = state
      .store
      .upsert_user(NewUser { user_id, email, display_name })
      .await
      .map_err(Error::store)?;
    Ok(Caller(user))
  }
}
