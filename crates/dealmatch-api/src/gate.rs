//! The subscription gate in front of listing, match and draft creation.

use dealmatch_core::{Error, Result, store::MarketStore, user::UserId};
use tracing::debug;

/// Fail with [`Error::EntitlementRequired`] unless `user` is trialing or
/// active. A no-op when `enforce` is off.
pub async fn require_entitled<S: MarketStore>(
  store: &S,
  enforce: bool,
  user: &UserId,
) -> Result<()> {
  if !enforce {
    return Ok(());
  }
  let entitled = store
    .get_entitlement(user.clone())
    .await
    .map_err(Error::store)?
    .is_some_and(|e| e.is_entitled());
  if entitled {
    Ok(())
  } else {
    debug!(user_id = %user, "entitlement gate refused request");
    Err(Error::EntitlementRequired)
  }
}
