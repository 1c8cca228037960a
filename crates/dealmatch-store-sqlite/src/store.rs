//! [`SqliteStore`]: the SQLite implementation of [`MarketStore`].

use std::{path::Path, time::Duration};

use chrono::TimeDelta;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use dealmatch_core::{
  agreement::{AgreementChanges, AgreementDraft, AgreementStatus, NewAgreement},
  entitlement::{ApplyOutcome, EntitlementUpdate, SubscriptionEntitlement},
  listing::{Listing, ListingPatch, ListingPayload, ListingQuery, NewListing},
  matching::{Match, NewMatch, PairKey},
  store::MarketStore,
  user::{NewUser, User, UserId},
};

use crate::{
  encode::{
    encode_agreement_status, encode_dt, encode_entitlement_status, encode_listing_status,
    encode_mode, encode_uuid, now, RawAgreement, RawEntitlement, RawListing, RawMatch,
    RawUser,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A marketplace store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted. All writes
/// go through one connection, so each `call` closure is serialised against
/// every other one.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fetch_listing(&self, id_str: String) -> Result<Option<Listing>> {
    let raw: Option<RawListing> = self
      .conn
      .call(move |conn| Ok(select_listing(conn, &id_str)?))
      .await?;

    raw.map(RawListing::into_listing).transpose()
  }

  async fn fetch_agreement(&self, id_str: String) -> Result<Option<AgreementDraft>> {
    let raw: Option<RawAgreement> = self
      .conn
      .call(move |conn| Ok(select_agreement(conn, &id_str)?))
      .await?;

    raw.map(RawAgreement::into_agreement).transpose()
  }
}

// ─── Row helpers (run inside `call` closures) ────────────────────────────────

fn select_listing(
  conn: &rusqlite::Connection,
  id_str: &str,
) -> rusqlite::Result<Option<RawListing>> {
  conn
    .query_row(
      &format!("{} WHERE l.listing_id = ?1", RawListing::SELECT),
      rusqlite::params![id_str],
      RawListing::from_row,
    )
    .optional()
}

fn select_match_by_pair(
  conn: &rusqlite::Connection,
  low: &str,
  high: &str,
) -> rusqlite::Result<Option<RawMatch>> {
  conn
    .query_row(
      &format!(
        "SELECT {} FROM matches m WHERE m.listing_a = ?1 AND m.listing_b = ?2",
        RawMatch::COLUMNS
      ),
      rusqlite::params![low, high],
      RawMatch::from_row,
    )
    .optional()
}

fn select_agreement(
  conn: &rusqlite::Connection,
  id_str: &str,
) -> rusqlite::Result<Option<RawAgreement>> {
  conn
    .query_row(
      &format!(
        "SELECT {} FROM agreements WHERE agreement_id = ?1",
        RawAgreement::COLUMNS
      ),
      rusqlite::params![id_str],
      RawAgreement::from_row,
    )
    .optional()
}

fn select_entitlement(
  conn: &rusqlite::Connection,
  user: &str,
) -> rusqlite::Result<Option<RawEntitlement>> {
  conn
    .query_row(
      &format!(
        "SELECT {} FROM entitlements WHERE user_id = ?1",
        RawEntitlement::COLUMNS
      ),
      rusqlite::params![user],
      RawEntitlement::from_row,
    )
    .optional()
}

/// Column values for one row of `assets` or `wants`.
struct PayloadRow {
  mode:        &'static str,
  title:       String,
  description: String,
  category:    Option<String>,
  value:       Option<f64>,
  terms_json:  String,
}

impl PayloadRow {
  fn encode(payload: &ListingPayload) -> Result<Self> {
    Ok(Self {
      mode:        encode_mode(payload.mode()),
      title:       payload.title().to_owned(),
      description: payload.description().to_owned(),
      category:    payload.category().map(str::to_owned),
      value:       payload.value(),
      terms_json:  serde_json::to_string(payload.terms())?,
    })
  }

  fn insert(&self, conn: &rusqlite::Connection, id_str: &str) -> rusqlite::Result<()> {
    let sql = match self.mode {
      "HAVE" => {
        "INSERT INTO assets (listing_id, title, description, category, estimated_value, terms_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
      }
      _ => {
        "INSERT INTO wants (listing_id, title, description, category, target_value, terms_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
      }
    };
    conn.execute(
      sql,
      rusqlite::params![
        id_str,
        self.title,
        self.description,
        self.category,
        self.value,
        self.terms_json,
      ],
    )?;
    Ok(())
  }

  fn update(&self, conn: &rusqlite::Connection, id_str: &str) -> rusqlite::Result<()> {
    let sql = match self.mode {
      "HAVE" => {
        "UPDATE assets SET title = ?2, description = ?3, category = ?4,
                estimated_value = ?5, terms_json = ?6
          WHERE listing_id = ?1"
      }
      _ => {
        "UPDATE wants SET title = ?2, description = ?3, category = ?4,
                target_value = ?5, terms_json = ?6
          WHERE listing_id = ?1"
      }
    };
    conn.execute(
      sql,
      rusqlite::params![
        id_str,
        self.title,
        self.description,
        self.category,
        self.value,
        self.terms_json,
      ],
    )?;
    Ok(())
  }
}

enum ListingEdit {
  Missing,
  ModeChange,
  Updated { raw: RawListing, invalidated: usize },
}

enum EntitlementWrite {
  Duplicate,
  Stale,
  Unopened,
  Applied(RawEntitlement),
}

// ─── MarketStore impl ────────────────────────────────────────────────────────

impl MarketStore for SqliteStore {
  type Error = Error;

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn upsert_user(&self, user: NewUser) -> Result<User> {
    let id_str = user.user_id.as_str().to_owned();
    let at_str = encode_dt(now());

    let raw: RawUser = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (user_id, email, display_name, created_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (user_id) DO UPDATE SET
             email        = COALESCE(excluded.email, users.email),
             display_name = COALESCE(excluded.display_name, users.display_name)",
          rusqlite::params![id_str, user.email, user.display_name, at_str],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {} FROM users WHERE user_id = ?1", RawUser::COLUMNS),
          rusqlite::params![id_str],
          RawUser::from_row,
        )?)
      })
      .await?;

    raw.into_user()
  }

  async fn get_user(&self, id: UserId) -> Result<Option<User>> {
    let id_str = id.as_str().to_owned();

    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM users WHERE user_id = ?1", RawUser::COLUMNS),
            rusqlite::params![id_str],
            RawUser::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  // ── Listings ──────────────────────────────────────────────────────────────

  async fn create_listing(&self, input: NewListing) -> Result<Listing> {
    let at = now();
    let listing = Listing {
      listing_id: Uuid::new_v4(),
      owner_id:   input.owner_id,
      status:     input.status,
      payload:    input.payload,
      created_at: at,
      updated_at: at,
    };

    let id_str     = encode_uuid(listing.listing_id);
    let owner_str  = listing.owner_id.as_str().to_owned();
    let status_str = encode_listing_status(listing.status);
    let at_str     = encode_dt(at);
    let row        = PayloadRow::encode(&listing.payload)?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO listings (listing_id, owner_id, mode, status, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
          rusqlite::params![id_str, owner_str, row.mode, status_str, at_str],
        )?;
        row.insert(&tx, &id_str)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(listing)
  }

  async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>> {
    self.fetch_listing(encode_uuid(id)).await
  }

  async fn list_listings(&self, query: ListingQuery) -> Result<Vec<Listing>> {
    let owner_str  = query.owner_id.map(|o| o.as_str().to_owned());
    let mode_str   = query.mode.map(encode_mode);
    let status_str = query.status.map(encode_listing_status);

    let raws: Vec<RawListing> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "{}
           WHERE (?1 IS NULL OR l.owner_id = ?1)
             AND (?2 IS NULL OR l.mode = ?2)
             AND (?3 IS NULL OR l.status = ?3)
           ORDER BY l.created_at DESC",
          RawListing::SELECT
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![owner_str, mode_str, status_str],
            RawListing::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawListing::into_listing).collect()
  }

  async fn update_listing(&self, id: Uuid, patch: ListingPatch) -> Result<Option<Listing>> {
    let id_str     = encode_uuid(id);
    let status_str = patch.status.map(encode_listing_status);
    let row        = patch.payload.as_ref().map(PayloadRow::encode).transpose()?;
    let at_str     = encode_dt(now());

    let edit = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let mode: Option<String> = tx
          .query_row(
            "SELECT mode FROM listings WHERE listing_id = ?1",
            rusqlite::params![id_str],
            |r| r.get(0),
          )
          .optional()?;
        let Some(mode) = mode else {
          return Ok(ListingEdit::Missing);
        };
        if let Some(row) = &row
          && row.mode != mode
        {
          return Ok(ListingEdit::ModeChange);
        }

        tx.execute(
          "UPDATE listings SET status = COALESCE(?2, status), updated_at = ?3
           WHERE listing_id = ?1",
          rusqlite::params![id_str, status_str, at_str],
        )?;
        if let Some(row) = &row {
          row.update(&tx, &id_str)?;
        }

        // Every edit invalidates the cached matches and their structures.
        let invalidated = tx.execute(
          "UPDATE matches SET stale = 1, structures_json = '[]'
           WHERE listing_a = ?1 OR listing_b = ?1",
          rusqlite::params![id_str],
        )?;

        let raw = select_listing(&tx, &id_str)?;
        tx.commit()?;
        Ok(match raw {
          Some(raw) => ListingEdit::Updated { raw, invalidated },
          None => ListingEdit::Missing,
        })
      })
      .await?;

    match edit {
      ListingEdit::Missing => Ok(None),
      ListingEdit::ModeChange => Err(Error::ModeChange(id)),
      ListingEdit::Updated { raw, invalidated } => {
        tracing::debug!(listing_id = %id, invalidated, "listing updated");
        raw.into_listing().map(Some)
      }
    }
  }

  async fn delete_listing(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM listings WHERE listing_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    Ok(deleted > 0)
  }

  // ── Matches ───────────────────────────────────────────────────────────────

  async fn get_match(&self, id: Uuid) -> Result<Option<Match>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawMatch> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {} FROM matches m WHERE m.match_id = ?1", RawMatch::COLUMNS),
            rusqlite::params![id_str],
            RawMatch::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawMatch::into_match).transpose()
  }

  async fn find_match(&self, pair: PairKey) -> Result<Option<Match>> {
    let low  = encode_uuid(pair.low());
    let high = encode_uuid(pair.high());

    let raw: Option<RawMatch> = self
      .conn
      .call(move |conn| Ok(select_match_by_pair(conn, &low, &high)?))
      .await?;

    raw.map(RawMatch::into_match).transpose()
  }

  async fn upsert_match(&self, input: NewMatch) -> Result<Match> {
    let id_str          = encode_uuid(Uuid::new_v4());
    let low             = encode_uuid(input.pair.low());
    let high            = encode_uuid(input.pair.high());
    let have_str        = encode_uuid(input.have_listing_id);
    let want_str        = encode_uuid(input.want_listing_id);
    let breakdown_json  = serde_json::to_string(&input.breakdown)?;
    let structures_json = serde_json::to_string(&input.structures)?;
    let newest_str      = encode_dt(input.newest_listing_at);
    let at_str          = encode_dt(now());
    let score           = input.score;
    let rationale       = input.rationale;
    let inputs_hash     = input.inputs_hash;

    let raw: Option<RawMatch> = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO matches (
             match_id, listing_a, listing_b, have_listing_id, want_listing_id,
             score, breakdown_json, rationale, structures_json, inputs_hash,
             stale, newest_listing_at, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12)
           ON CONFLICT (listing_a, listing_b) DO UPDATE SET
             have_listing_id   = excluded.have_listing_id,
             want_listing_id   = excluded.want_listing_id,
             score             = excluded.score,
             breakdown_json    = excluded.breakdown_json,
             rationale         = excluded.rationale,
             structures_json   = excluded.structures_json,
             inputs_hash       = excluded.inputs_hash,
             stale             = 0,
             newest_listing_at = excluded.newest_listing_at,
             created_at        = excluded.created_at",
          rusqlite::params![
            id_str,
            low,
            high,
            have_str,
            want_str,
            score,
            breakdown_json,
            rationale,
            structures_json,
            inputs_hash,
            newest_str,
            at_str,
          ],
        )?;
        Ok(select_match_by_pair(conn, &low, &high)?)
      })
      .await?;

    raw
      .ok_or_else(|| Error::Corrupt(format!("match for {} vanished after upsert", input.pair)))?
      .into_match()
  }

  async fn list_matches_for_user(&self, user: UserId) -> Result<Vec<Match>> {
    let user_str = user.as_str().to_owned();

    let raws: Vec<RawMatch> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM matches m
             JOIN listings la ON la.listing_id = m.listing_a
             JOIN listings lb ON lb.listing_id = m.listing_b
            WHERE la.owner_id = ?1 OR lb.owner_id = ?1",
          RawMatch::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user_str], RawMatch::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMatch::into_match).collect()
  }

  async fn try_acquire_pair_lease(
    &self,
    pair: PairKey,
    holder: Uuid,
    ttl: Duration,
  ) -> Result<bool> {
    let at = now();
    let expires_at = TimeDelta::from_std(ttl)
      .ok()
      .and_then(|d| at.checked_add_signed(d))
      .ok_or(Error::LeaseTtl(ttl))?;

    let low        = encode_uuid(pair.low());
    let high       = encode_uuid(pair.high());
    let holder_str = encode_uuid(holder);
    let now_str    = encode_dt(at);
    let exp_str    = encode_dt(expires_at);

    // The conflict branch only fires for an expired lease or our own.
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT INTO match_leases (listing_a, listing_b, holder, expires_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (listing_a, listing_b) DO UPDATE SET
             holder     = excluded.holder,
             expires_at = excluded.expires_at
           WHERE match_leases.expires_at <= ?5
              OR match_leases.holder = excluded.holder",
          rusqlite::params![low, high, holder_str, exp_str, now_str],
        )?)
      })
      .await?;

    Ok(changed > 0)
  }

  async fn release_pair_lease(&self, pair: PairKey, holder: Uuid) -> Result<()> {
    let low        = encode_uuid(pair.low());
    let high       = encode_uuid(pair.high());
    let holder_str = encode_uuid(holder);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM match_leases
            WHERE listing_a = ?1 AND listing_b = ?2 AND holder = ?3",
          rusqlite::params![low, high, holder_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Agreement drafts ──────────────────────────────────────────────────────

  async fn create_agreement(&self, input: NewAgreement) -> Result<AgreementDraft> {
    let at = now();
    let draft = AgreementDraft {
      agreement_id: Uuid::new_v4(),
      match_id:     input.match_id,
      creator_id:   input.creator_id,
      title:        input.title,
      content:      input.content,
      status:       AgreementStatus::Draft,
      structure:    input.structure,
      created_at:   at,
      updated_at:   at,
    };

    let id_str         = encode_uuid(draft.agreement_id);
    let match_str      = encode_uuid(draft.match_id);
    let creator_str    = draft.creator_id.as_str().to_owned();
    let title          = draft.title.clone();
    let content        = draft.content.clone();
    let status_str     = encode_agreement_status(draft.status);
    let structure_json = serde_json::to_string(&draft.structure)?;
    let at_str         = encode_dt(at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO agreements (
             agreement_id, match_id, creator_id, title, content,
             status, structure_json, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
          rusqlite::params![
            id_str,
            match_str,
            creator_str,
            title,
            content,
            status_str,
            structure_json,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(draft)
  }

  async fn get_agreement(&self, id: Uuid) -> Result<Option<AgreementDraft>> {
    self.fetch_agreement(encode_uuid(id)).await
  }

  async fn list_agreements_for_match(&self, match_id: Uuid) -> Result<Vec<AgreementDraft>> {
    let match_str = encode_uuid(match_id);

    let raws: Vec<RawAgreement> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM agreements WHERE match_id = ?1 ORDER BY created_at",
          RawAgreement::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![match_str], RawAgreement::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAgreement::into_agreement).collect()
  }

  async fn update_agreement(
    &self,
    id: Uuid,
    expected: AgreementStatus,
    changes: AgreementChanges,
  ) -> Result<Option<AgreementDraft>> {
    let id_str       = encode_uuid(id);
    let expected_str = encode_agreement_status(expected);
    let status_str   = changes.status.map(encode_agreement_status);
    let at_str       = encode_dt(now());

    let raw: Option<RawAgreement> = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE agreements SET
             title      = COALESCE(?2, title),
             content    = COALESCE(?3, content),
             status     = COALESCE(?4, status),
             updated_at = ?5
           WHERE agreement_id = ?1 AND status = ?6",
          rusqlite::params![
            id_str,
            changes.title,
            changes.content,
            status_str,
            at_str,
            expected_str,
          ],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(select_agreement(conn, &id_str)?)
      })
      .await?;

    raw.map(RawAgreement::into_agreement).transpose()
  }

  async fn delete_agreement(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM agreements WHERE agreement_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    Ok(deleted > 0)
  }

  // ── Entitlements ──────────────────────────────────────────────────────────

  async fn get_entitlement(&self, user: UserId) -> Result<Option<SubscriptionEntitlement>> {
    let user_str = user.as_str().to_owned();

    let raw: Option<RawEntitlement> = self
      .conn
      .call(move |conn| Ok(select_entitlement(conn, &user_str)?))
      .await?;

    raw.map(RawEntitlement::into_entitlement).transpose()
  }

  async fn find_user_by_customer(&self, customer_id: String) -> Result<Option<UserId>> {
    let user: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT user_id FROM entitlements WHERE customer_id = ?1
             ORDER BY updated_at DESC LIMIT 1",
            rusqlite::params![customer_id],
            |r| r.get(0),
          )
          .optional()?)
      })
      .await?;

    Ok(user.map(UserId::new).transpose()?)
  }

  async fn apply_entitlement_update(&self, update: EntitlementUpdate) -> Result<ApplyOutcome> {
    let user_str     = update.user_id.as_str().to_owned();
    let event_id     = update.event_id;
    let event_at_str = encode_dt(update.event_at);
    let status_str   = update.status.map(encode_entitlement_status);
    let start_str    = update.period_start.map(encode_dt);
    let end_str      = update.period_end.map(encode_dt);
    let at_str       = encode_dt(now());
    let plan         = update.plan;
    let customer_id  = update.customer_id;
    let sub_id       = update.subscription_id;
    let opens_record = update.opens_record;

    let write = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let recorded = tx.execute(
          "INSERT OR IGNORE INTO billing_events (event_id, user_id, event_at, outcome, processed_at)
           VALUES (?1, ?2, ?3, 'applied', ?4)",
          rusqlite::params![event_id, user_str, event_at_str, at_str],
        )?;
        if recorded == 0 {
          return Ok(EntitlementWrite::Duplicate);
        }

        let last: Option<Option<String>> = tx
          .query_row(
            "SELECT last_event_at FROM entitlements WHERE user_id = ?1",
            rusqlite::params![user_str],
            |r| r.get(0),
          )
          .optional()?;
        let exists = last.is_some();
        // Fixed-width timestamps compare correctly as strings.
        if let Some(Some(last)) = last
          && last.as_str() > event_at_str.as_str()
        {
          tx.execute(
            "UPDATE billing_events SET outcome = 'stale' WHERE event_id = ?1",
            rusqlite::params![event_id],
          )?;
          tx.commit()?;
          return Ok(EntitlementWrite::Stale);
        }
        if !exists && !opens_record {
          tx.execute(
            "UPDATE billing_events SET outcome = 'unopened' WHERE event_id = ?1",
            rusqlite::params![event_id],
          )?;
          tx.commit()?;
          return Ok(EntitlementWrite::Unopened);
        }

        tx.execute(
          "INSERT INTO entitlements (
             user_id, plan, customer_id, subscription_id, status,
             period_start, period_end, last_event_id, last_event_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, COALESCE(?5, 'NONE'), ?6, ?7, ?8, ?9, ?10)
           ON CONFLICT (user_id) DO UPDATE SET
             plan            = COALESCE(?2, plan),
             customer_id     = COALESCE(?3, customer_id),
             subscription_id = COALESCE(?4, subscription_id),
             status          = COALESCE(?5, status),
             period_start    = COALESCE(?6, period_start),
             period_end      = COALESCE(?7, period_end),
             last_event_id   = ?8,
             last_event_at   = ?9,
             updated_at      = ?10",
          rusqlite::params![
            user_str,
            plan,
            customer_id,
            sub_id,
            status_str,
            start_str,
            end_str,
            event_id,
            event_at_str,
            at_str,
          ],
        )?;

        let raw = select_entitlement(&tx, &user_str)?;
        tx.commit()?;
        Ok(match raw {
          Some(raw) => EntitlementWrite::Applied(raw),
          None => EntitlementWrite::Stale,
        })
      })
      .await?;

    Ok(match write {
      EntitlementWrite::Duplicate => ApplyOutcome::Duplicate,
      EntitlementWrite::Stale => ApplyOutcome::Stale,
      EntitlementWrite::Unopened => ApplyOutcome::Unopened,
      EntitlementWrite::Applied(raw) => ApplyOutcome::Applied(raw.into_entitlement()?),
    })
  }
}
