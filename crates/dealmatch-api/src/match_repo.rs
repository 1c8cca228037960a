//! [`MatchRepository`]: at most one Match per unordered listing pair, and
//! at most one in-flight computation per pair.
//!
//! Every request reads freshness from the store; nothing is memoised in
//! process. Concurrent requests for an uncomputed pair race for a lease row
//! in the store. The winner scores, augments and upserts, renewing its lease
//! until it is done; the losers poll until the winner's row appears.

use std::{sync::Arc, time::Duration};

use dealmatch_augment::Augmenter;
use dealmatch_core::{
  Error, Result,
  completion::TextCompleter,
  listing::{Asset, Listing, ListingMode, ListingPayload, ListingQuery, ListingStatus, Want},
  matching::{Match, NewMatch, PairKey},
  scoring::{self, FeatureBreakdown, RankKey},
  store::MarketStore,
  user::UserId,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
  /// Lifetime of a computation lease. The holder renews it every third of
  /// this while it computes.
  pub lease_ttl:     Duration,
  pub poll_interval: Duration,
  /// How long a request waits on another holder before giving up.
  pub wait_timeout:  Duration,
}

impl Default for MatchConfig {
  fn default() -> Self {
    Self {
      lease_ttl:     Duration::from_secs(60),
      poll_interval: Duration::from_millis(100),
      wait_timeout:  Duration::from_secs(60),
    }
  }
}

/// A HAVE and a WANT listing, whatever order they were requested in.
struct Sides {
  have:  Listing,
  want:  Listing,
  asset: Asset,
  need:  Want,
}

impl Sides {
  fn new(a: Listing, b: Listing) -> Result<Self> {
    let (have, want) = match (a.mode(), b.mode()) {
      (ListingMode::Have, ListingMode::Want) => (a, b),
      (ListingMode::Want, ListingMode::Have) => (b, a),
      _ => {
        return Err(Error::Validation(
          "a match pairs one HAVE listing with one WANT listing".into(),
        ));
      }
    };
    match (&have.payload, &want.payload) {
      (ListingPayload::Have(asset), ListingPayload::Want(need)) => Ok(Self {
        asset: asset.clone(),
        need: need.clone(),
        have,
        want,
      }),
      _ => Err(Error::Validation("listing payload does not match its mode".into())),
    }
  }

  fn owned_by(&self, user: &UserId) -> bool {
    self.have.is_owned_by(user) || self.want.is_owned_by(user)
  }

  /// Digest of every input the scorer and the augmenter read.
  fn inputs_hash(&self) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&self.asset).map_err(Error::store)?);
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(&self.need).map_err(Error::store)?);
    Ok(hex::encode(hasher.finalize()))
  }

  fn is_fresh(&self, m: &Match, hash: &str) -> bool {
    m.is_fresh(hash, self.have.updated_at, self.want.updated_at)
  }
}

/// A scored listing from [`MatchRepository::candidates`].
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
  pub listing:   Listing,
  pub score:     f64,
  pub breakdown: FeatureBreakdown,
}

pub struct MatchRepository<S, C> {
  store:     Arc<S>,
  augmenter: Arc<Augmenter<C>>,
  config:    MatchConfig,
}

impl<S: MarketStore, C: TextCompleter> MatchRepository<S, C> {
  pub fn new(store: Arc<S>, augmenter: Arc<Augmenter<C>>, config: MatchConfig) -> Self {
    Self { store, augmenter, config }
  }

  async fn listing(&self, id: Uuid) -> Result<Listing> {
    self
      .store
      .get_listing(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("listing", id))
  }

  async fn cached(&self, pair: PairKey, sides: &Sides, hash: &str) -> Result<Option<Match>> {
    let found = self.store.find_match(pair).await.map_err(Error::store)?;
    Ok(found.filter(|m| sides.is_fresh(m, hash)))
  }

  /// Return the Match for the pair `(a, b)`, computing it if there is none
  /// or the stored one is out of date. `caller` must own one of the two
  /// listings.
  pub async fn get_or_create(&self, caller: &UserId, a: Uuid, b: Uuid) -> Result<Match> {
    let pair = PairKey::new(a, b)
      .ok_or_else(|| Error::Validation("a listing cannot be matched with itself".into()))?;

    let sides = Sides::new(self.listing(pair.low()).await?, self.listing(pair.high()).await?)?;
    if !sides.owned_by(caller) {
      return Err(Error::Authorization(
        "matches can only be requested by the owner of one of the listings".into(),
      ));
    }

    let hash = sides.inputs_hash()?;
    if let Some(m) = self.cached(pair, &sides, &hash).await? {
      debug!(match_id = %m.match_id, %pair, "match cache hit");
      return Ok(m);
    }

    let holder = Uuid::new_v4();
    let deadline = Instant::now() + self.config.wait_timeout;
    loop {
      let acquired = self
        .store
        .try_acquire_pair_lease(pair, holder, self.config.lease_ttl)
        .await
        .map_err(Error::store)?;

      if acquired {
        let result = self.compute_holding(pair, holder, &sides, &hash).await;
        if let Err(e) = self.store.release_pair_lease(pair, holder).await {
          // The lease expires on its own; the computed match stands.
          warn!(%pair, error = %e, "failed to release pair lease");
        }
        return result;
      }

      if Instant::now() >= deadline {
        return Err(Error::Busy(format!("match for {pair} is still being computed")));
      }
      debug!(%pair, "pair lease held elsewhere; waiting");
      tokio::time::sleep(self.config.poll_interval).await;

      if let Some(m) = self.cached(pair, &sides, &hash).await? {
        debug!(match_id = %m.match_id, %pair, "picked up match computed by lease holder");
        return Ok(m);
      }
    }
  }

  /// Run [`Self::compute_locked`] while keeping `holder`'s lease alive, so a
  /// slow completion cannot hand the pair to a second computation.
  async fn compute_holding(
    &self,
    pair: PairKey,
    holder: Uuid,
    sides: &Sides,
    hash: &str,
  ) -> Result<Match> {
    let compute = self.compute_locked(pair, sides, hash);
    tokio::pin!(compute);

    let period = (self.config.lease_ttl / 3).max(Duration::from_millis(1));
    let mut renew = tokio::time::interval_at(Instant::now() + period, period);
    loop {
      tokio::select! {
        result = &mut compute => return result,
        _ = renew.tick() => {
          match self.store.try_acquire_pair_lease(pair, holder, self.config.lease_ttl).await {
            Ok(true) => debug!(%pair, "pair lease renewed"),
            Ok(false) => warn!(%pair, "pair lease taken over while computing"),
            Err(e) => warn!(%pair, error = %e, "failed to renew pair lease"),
          }
        }
      }
    }
  }

  /// Score, augment and persist. Runs only while holding the pair lease.
  async fn compute_locked(&self, pair: PairKey, sides: &Sides, hash: &str) -> Result<Match> {
    // The previous holder may have finished between our miss and our lease.
    if let Some(m) = self.cached(pair, sides, hash).await? {
      return Ok(m);
    }

    let card = scoring::score(&sides.asset, &sides.need);
    let augmentation = self.augmenter.augment(&sides.asset, &sides.need, &card).await;

    let stored = self
      .store
      .upsert_match(NewMatch {
        pair,
        have_listing_id: sides.have.listing_id,
        want_listing_id: sides.want.listing_id,
        score: card.score,
        breakdown: card.breakdown,
        rationale: augmentation.rationale,
        structures: augmentation.structures,
        inputs_hash: hash.to_owned(),
        newest_listing_at: sides.have.created_at.max(sides.want.created_at),
      })
      .await;

    let stored = match stored {
      Ok(m) => m,
      Err(e) => {
        // A listing deleted mid-computation fails the foreign key.
        self.listing(sides.have.listing_id).await?;
        self.listing(sides.want.listing_id).await?;
        return Err(Error::store(e));
      }
    };

    info!(
      match_id = %stored.match_id,
      %pair,
      score = stored.score,
      degraded = augmentation.degraded,
      "match computed"
    );
    Ok(stored)
  }

  /// Fetch one match; only the owners of its listings may see it.
  pub async fn get(&self, caller: &UserId, id: Uuid) -> Result<Match> {
    let m = self
      .store
      .get_match(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("match", id))?;
    if !participants(self.store.as_ref(), &m).await?.contains(caller) {
      return Err(Error::Authorization("only the match participants may view it".into()));
    }
    Ok(m)
  }

  /// Every match involving one of `user`'s listings, best first.
  pub async fn list_for_user(&self, user: &UserId) -> Result<Vec<Match>> {
    let mut matches = self
      .store
      .list_matches_for_user(user.clone())
      .await
      .map_err(Error::store)?;
    matches.sort_by(|a, b| scoring::compare_rank(&rank_key(a), &rank_key(b)));
    Ok(matches)
  }

  /// Score `listing_id` against every active opposite-mode listing of other
  /// users. Scorer only; nothing is persisted and no completion is made.
  pub async fn candidates(&self, caller: &UserId, listing_id: Uuid) -> Result<Vec<Candidate>> {
    let listing = self.listing(listing_id).await?;
    if !listing.is_owned_by(caller) {
      return Err(Error::Authorization("only the owner may list candidates".into()));
    }

    let others = self
      .store
      .list_listings(ListingQuery {
        owner_id: None,
        mode:     Some(listing.mode().opposite()),
        status:   Some(ListingStatus::Active),
      })
      .await
      .map_err(Error::store)?;

    let mut ranked: Vec<(RankKey, Candidate)> = others
      .into_iter()
      .filter(|other| other.owner_id != listing.owner_id)
      .filter_map(|other| {
        let card = scoring::score_listings(&listing, &other)?;
        let key = RankKey {
          score:             card.score,
          populated:         card.breakdown.populated(),
          newest_listing_at: listing.created_at.max(other.created_at),
        };
        Some((key, Candidate { listing: other, score: card.score, breakdown: card.breakdown }))
      })
      .collect();

    ranked.sort_by(|(a, _), (b, _)| scoring::compare_rank(a, b));
    Ok(ranked.into_iter().map(|(_, c)| c).collect())
  }
}

fn rank_key(m: &Match) -> RankKey {
  RankKey {
    score:             m.score,
    populated:         m.breakdown.populated(),
    newest_listing_at: m.newest_listing_at,
  }
}

/// Owners of the two listings of `m`, HAVE side first.
pub async fn participants<S: MarketStore>(store: &S, m: &Match) -> Result<[UserId; 2]> {
  let mut owners = Vec::with_capacity(2);
  for id in [m.have_listing_id, m.want_listing_id] {
    let listing = store
      .get_listing(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("listing", id))?;
    owners.push(listing.owner_id);
  }
  let [have, want]: [UserId; 2] = owners
    .try_into()
    .map_err(|_| Error::InvalidState("match does not reference two listings".into()))?;
  Ok([have, want])
}

#[cfg(test)]
mod tests {
  use dealmatch_augment::{AugmentConfig, testing::ScriptedCompleter};
  use dealmatch_core::{
    listing::{ListingPatch, NewListing},
    terms::{Benefit, DebtTerms, Terms, Urgency},
    user::NewUser,
  };
  use dealmatch_store_sqlite::SqliteStore;

  use super::*;

  struct Fixture {
    store:     Arc<SqliteStore>,
    completer: ScriptedCompleter,
    repo:      Arc<MatchRepository<SqliteStore, ScriptedCompleter>>,
    alice:     UserId,
    bob:       UserId,
  }

  async fn fixture(completer: ScriptedCompleter) -> Fixture {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let alice = UserId::new("alice").unwrap();
    let bob = UserId::new("bob").unwrap();
    for id in [&alice, &bob] {
      store
        .upsert_user(NewUser { user_id: id.clone(), email: None, display_name: None })
        .await
        .unwrap();
    }
    let augmenter = Arc::new(Augmenter::new(completer.clone(), AugmentConfig::default()));
    let config = MatchConfig {
      lease_ttl:     Duration::from_secs(5),
      poll_interval: Duration::from_millis(5),
      wait_timeout:  Duration::from_secs(5),
    };
    let repo = Arc::new(MatchRepository::new(store.clone(), augmenter, config));
    Fixture { store, completer, repo, alice, bob }
  }

  fn multifamily() -> ListingPayload {
    ListingPayload::Have(Asset {
      title:           "Multifamily portfolio".into(),
      description:     "Three fourplexes".into(),
      category:        Some("multifamily".into()),
      estimated_value: Some(2_200_000.0),
      terms:           Terms {
        noi: Some(165_000.0),
        debt: Some(DebtTerms { balance: Some(1_400_000.0), assumable: true, rate_percent: None }),
        urgency: Some(Urgency::High),
        benefits_sought: vec![Benefit::TaxDeferral],
        benefits_offered: vec![Benefit::DebtAssumption],
        ..Terms::default()
      },
    })
  }

  fn single_family() -> ListingPayload {
    ListingPayload::Want(Want {
      title:        "Single-family, sub-to".into(),
      description:  String::new(),
      category:     Some("single family".into()),
      target_value: Some(350_000.0),
      terms:        Terms {
        urgency: Some(Urgency::High),
        benefits_sought: vec![Benefit::DebtAssumption],
        ..Terms::default()
      },
    })
  }

  async fn listing(store: &SqliteStore, owner: &UserId, payload: ListingPayload) -> Listing {
    store
      .create_listing(NewListing { owner_id: owner.clone(), status: ListingStatus::Active, payload })
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn pair_order_does_not_matter_and_second_call_is_cached() {
    let f = fixture(ScriptedCompleter::well_behaved()).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let want = listing(&f.store, &f.bob, single_family()).await;

    let first = f.repo.get_or_create(&f.alice, have.listing_id, want.listing_id).await.unwrap();
    let second = f.repo.get_or_create(&f.bob, want.listing_id, have.listing_id).await.unwrap();

    assert_eq!(first.match_id, second.match_id);
    assert_eq!(first.have_listing_id, have.listing_id);
    assert!(first.score > 0.5, "score {}", first.score);
    assert!(!first.rationale.is_empty());
    assert!(!first.structures.is_empty());
    // One rationale and one structures completion, no more.
    assert_eq!(f.completer.calls(), 2);
  }

  #[tokio::test]
  async fn editing_a_listing_forces_recomputation_in_place() {
    let f = fixture(ScriptedCompleter::well_behaved()).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let want = listing(&f.store, &f.bob, single_family()).await;
    let first = f.repo.get_or_create(&f.alice, have.listing_id, want.listing_id).await.unwrap();

    let ListingPayload::Want(mut edited) = single_family() else { unreachable!() };
    edited.target_value = Some(500_000.0);
    f.store
      .update_listing(want.listing_id, ListingPatch {
        status:  None,
        payload: Some(ListingPayload::Want(edited)),
      })
      .await
      .unwrap();

    let stale = f.store.get_match(first.match_id).await.unwrap().unwrap();
    assert!(stale.stale);
    assert!(stale.structures.is_empty());

    let again = f.repo.get_or_create(&f.alice, have.listing_id, want.listing_id).await.unwrap();
    assert_eq!(again.match_id, first.match_id);
    assert!(!again.stale);
    assert!(!again.structures.is_empty());
    assert_ne!(again.inputs_hash, first.inputs_hash);
    assert_eq!(f.completer.calls(), 4);
  }

  #[tokio::test]
  async fn concurrent_requests_compute_once() {
    let completer = ScriptedCompleter::well_behaved().with_delay(Duration::from_millis(50));
    let f = fixture(completer).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let want = listing(&f.store, &f.bob, single_family()).await;

    let (a, b) = tokio::join!(
      f.repo.get_or_create(&f.alice, have.listing_id, want.listing_id),
      f.repo.get_or_create(&f.bob, want.listing_id, have.listing_id),
    );
    assert_eq!(a.unwrap().match_id, b.unwrap().match_id);
    assert_eq!(f.completer.calls(), 2);
  }

  #[tokio::test]
  async fn waiting_past_the_deadline_is_busy() {
    let f = fixture(ScriptedCompleter::well_behaved()).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let want = listing(&f.store, &f.bob, single_family()).await;
    let pair = PairKey::new(have.listing_id, want.listing_id).unwrap();

    // Someone else holds the lease and never finishes.
    f.store
      .try_acquire_pair_lease(pair, Uuid::new_v4(), Duration::from_secs(60))
      .await
      .unwrap();

    let augmenter = Arc::new(Augmenter::new(f.completer.clone(), AugmentConfig::default()));
    let impatient = MatchRepository::new(f.store.clone(), augmenter, MatchConfig {
      lease_ttl:     Duration::from_secs(5),
      poll_interval: Duration::from_millis(5),
      wait_timeout:  Duration::from_millis(30),
    });
    let result = impatient.get_or_create(&f.alice, have.listing_id, want.listing_id).await;
    assert!(matches!(result, Err(Error::Busy(_))));
    assert_eq!(f.completer.calls(), 0);
  }

  #[tokio::test]
  async fn slow_computation_keeps_its_lease() {
    let completer = ScriptedCompleter::well_behaved().with_delay(Duration::from_millis(300));
    let f = fixture(completer).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let want = listing(&f.store, &f.bob, single_family()).await;

    // The lease is shorter than a single completion.
    let augment = AugmentConfig { timeout: Duration::from_secs(1), max_tokens: 800 };
    let augmenter = Arc::new(Augmenter::new(f.completer.clone(), augment));
    let repo = MatchRepository::new(f.store.clone(), augmenter, MatchConfig {
      lease_ttl:     Duration::from_millis(200),
      poll_interval: Duration::from_millis(5),
      wait_timeout:  Duration::from_secs(5),
    });

    let (a, b) = tokio::join!(
      repo.get_or_create(&f.alice, have.listing_id, want.listing_id),
      async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        repo.get_or_create(&f.bob, want.listing_id, have.listing_id).await
      },
    );
    assert_eq!(a.unwrap().match_id, b.unwrap().match_id);
    assert_eq!(f.completer.calls(), 2);
  }

  #[tokio::test]
  async fn listing_deleted_mid_computation_is_not_found() {
    let completer = ScriptedCompleter::well_behaved().with_delay(Duration::from_millis(200));
    let f = fixture(completer).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let want = listing(&f.store, &f.bob, single_family()).await;

    let (result, deleted) = tokio::join!(
      f.repo.get_or_create(&f.alice, have.listing_id, want.listing_id),
      async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.store.delete_listing(want.listing_id).await
      },
    );
    assert!(deleted.unwrap());
    let err = result.unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "listing", .. }), "{err:?}");
    assert!(!err.is_retryable());
    assert!(f.store.list_matches_for_user(f.alice.clone()).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn invalid_pairs_are_rejected() {
    let f = fixture(ScriptedCompleter::well_behaved()).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let other_have = listing(&f.store, &f.bob, multifamily()).await;
    let want = listing(&f.store, &f.bob, single_family()).await;

    let same = f.repo.get_or_create(&f.alice, have.listing_id, have.listing_id).await;
    assert!(matches!(same, Err(Error::Validation(_))));

    let same_mode = f.repo.get_or_create(&f.alice, have.listing_id, other_have.listing_id).await;
    assert!(matches!(same_mode, Err(Error::Validation(_))));

    let missing = f.repo.get_or_create(&f.alice, have.listing_id, Uuid::new_v4()).await;
    assert!(matches!(missing, Err(Error::NotFound { entity: "listing", .. })));

    let carol = UserId::new("carol").unwrap();
    let outsider = f.repo.get_or_create(&carol, have.listing_id, want.listing_id).await;
    assert!(matches!(outsider, Err(Error::Authorization(_))));

    assert!(f.store.list_matches_for_user(f.alice.clone()).await.unwrap().is_empty());
    assert_eq!(f.completer.calls(), 0);
  }

  #[tokio::test]
  async fn candidates_are_ranked_and_exclude_own_listings() {
    let f = fixture(ScriptedCompleter::well_behaved()).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let good = listing(&f.store, &f.bob, single_family()).await;
    let weak = listing(
      &f.store,
      &f.bob,
      ListingPayload::Want(Want {
        title:        "Anything".into(),
        description:  String::new(),
        category:     None,
        target_value: None,
        terms:        Terms::default(),
      }),
    )
    .await;
    listing(&f.store, &f.alice, single_family()).await;

    let ranked = f.repo.candidates(&f.alice, have.listing_id).await.unwrap();
    let ids: Vec<Uuid> = ranked.iter().map(|c| c.listing.listing_id).collect();
    assert_eq!(ids, vec![good.listing_id, weak.listing_id]);
    assert_eq!(ranked[1].score, scoring::BASELINE_SCORE);
    assert_eq!(f.completer.calls(), 0);

    let not_owner = f.repo.candidates(&f.bob, have.listing_id).await;
    assert!(matches!(not_owner, Err(Error::Authorization(_))));
  }

  #[tokio::test]
  async fn matches_are_visible_to_participants_only() {
    let f = fixture(ScriptedCompleter::well_behaved()).await;
    let have = listing(&f.store, &f.alice, multifamily()).await;
    let want = listing(&f.store, &f.bob, single_family()).await;
    let m = f.repo.get_or_create(&f.alice, have.listing_id, want.listing_id).await.unwrap();

    assert!(f.repo.get(&f.bob, m.match_id).await.is_ok());
    let carol = UserId::new("carol").unwrap();
    assert!(matches!(f.repo.get(&carol, m.match_id).await, Err(Error::Authorization(_))));
    assert!(matches!(
      f.repo.get(&carol, Uuid::new_v4()).await,
      Err(Error::NotFound { entity: "match", .. })
    ));

    assert_eq!(f.repo.list_for_user(&f.bob).await.unwrap().len(), 1);
    assert!(f.repo.list_for_user(&carol).await.unwrap().is_empty());
  }
}
