//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that string order in SQL equals time order. Structured fields
//! (terms, breakdowns, structures) are stored as compact JSON. UUIDs are
//! stored as hyphenated lowercase strings, which also makes the pair-key
//! ordering in `matches` agree with [`Uuid`]'s `Ord`.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use dealmatch_core::{
  agreement::{AgreementDraft, AgreementStatus},
  entitlement::{EntitlementStatus, SubscriptionEntitlement},
  listing::{Asset, Listing, ListingMode, ListingPayload, ListingStatus, Want},
  matching::Match,
  user::{User, UserId},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// The current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_mode(m: ListingMode) -> &'static str {
  match m {
    ListingMode::Have => "HAVE",
    ListingMode::Want => "WANT",
  }
}

pub fn decode_mode(s: &str) -> Result<ListingMode> {
  match s {
    "HAVE" => Ok(ListingMode::Have),
    "WANT" => Ok(ListingMode::Want),
    other => Err(Error::Corrupt(format!("unknown listing mode: {other:?}"))),
  }
}

pub fn encode_listing_status(s: ListingStatus) -> &'static str {
  match s {
    ListingStatus::Active => "ACTIVE",
    ListingStatus::Paused => "PAUSED",
    ListingStatus::Closed => "CLOSED",
  }
}

pub fn decode_listing_status(s: &str) -> Result<ListingStatus> {
  match s {
    "ACTIVE" => Ok(ListingStatus::Active),
    "PAUSED" => Ok(ListingStatus::Paused),
    "CLOSED" => Ok(ListingStatus::Closed),
    other => Err(Error::Corrupt(format!("unknown listing status: {other:?}"))),
  }
}

pub fn encode_agreement_status(s: AgreementStatus) -> &'static str {
  match s {
    AgreementStatus::Draft => "DRAFT",
    AgreementStatus::InReview => "IN_REVIEW",
    AgreementStatus::Finalized => "FINALIZED",
    AgreementStatus::Void => "VOID",
  }
}

pub fn decode_agreement_status(s: &str) -> Result<AgreementStatus> {
  match s {
    "DRAFT" => Ok(AgreementStatus::Draft),
    "IN_REVIEW" => Ok(AgreementStatus::InReview),
    "FINALIZED" => Ok(AgreementStatus::Finalized),
    "VOID" => Ok(AgreementStatus::Void),
    other => Err(Error::Corrupt(format!("unknown agreement status: {other:?}"))),
  }
}

pub fn encode_entitlement_status(s: EntitlementStatus) -> &'static str {
  match s {
    EntitlementStatus::None => "NONE",
    EntitlementStatus::Trialing => "TRIALING",
    EntitlementStatus::Active => "ACTIVE",
    EntitlementStatus::PastDue => "PAST_DUE",
    EntitlementStatus::Canceled => "CANCELED",
  }
}

pub fn decode_entitlement_status(s: &str) -> Result<EntitlementStatus> {
  match s {
    "NONE" => Ok(EntitlementStatus::None),
    "TRIALING" => Ok(EntitlementStatus::Trialing),
    "ACTIVE" => Ok(EntitlementStatus::Active),
    "PAST_DUE" => Ok(EntitlementStatus::PastDue),
    "CANCELED" => Ok(EntitlementStatus::Canceled),
    other => Err(Error::Corrupt(format!("unknown entitlement status: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub struct RawUser {
  pub user_id:      String,
  pub email:        Option<String>,
  pub display_name: Option<String>,
  pub created_at:   String,
}

impl RawUser {
  pub const COLUMNS: &'static str = "user_id, email, display_name, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:      row.get(0)?,
      email:        row.get(1)?,
      display_name: row.get(2)?,
      created_at:   row.get(3)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:      UserId::new(self.user_id)?,
      email:        self.email,
      display_name: self.display_name,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// A `listings` row left-joined with both payload tables. Exactly one of the
/// payload halves is populated for a well-formed row.
pub struct RawListing {
  pub listing_id:  String,
  pub owner_id:    String,
  pub mode:        String,
  pub status:      String,
  pub created_at:  String,
  pub updated_at:  String,
  // assets join
  pub a_title:     Option<String>,
  pub a_desc:      Option<String>,
  pub a_category:  Option<String>,
  pub a_value:     Option<f64>,
  pub a_terms:     Option<String>,
  // wants join
  pub w_title:     Option<String>,
  pub w_desc:      Option<String>,
  pub w_category:  Option<String>,
  pub w_value:     Option<f64>,
  pub w_terms:     Option<String>,
}

impl RawListing {
  pub const SELECT: &'static str = "
    SELECT l.listing_id, l.owner_id, l.mode, l.status, l.created_at, l.updated_at,
           a.title, a.description, a.category, a.estimated_value, a.terms_json,
           w.title, w.description, w.category, w.target_value, w.terms_json
      FROM listings l
      LEFT JOIN assets a ON a.listing_id = l.listing_id
      LEFT JOIN wants  w ON w.listing_id = l.listing_id";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      listing_id: row.get(0)?,
      owner_id:   row.get(1)?,
      mode:       row.get(2)?,
      status:     row.get(3)?,
      created_at: row.get(4)?,
      updated_at: row.get(5)?,
      a_title:    row.get(6)?,
      a_desc:     row.get(7)?,
      a_category: row.get(8)?,
      a_value:    row.get(9)?,
      a_terms:    row.get(10)?,
      w_title:    row.get(11)?,
      w_desc:     row.get(12)?,
      w_category: row.get(13)?,
      w_value:    row.get(14)?,
      w_terms:    row.get(15)?,
    })
  }

  pub fn into_listing(self) -> Result<Listing> {
    let listing_id = decode_uuid(&self.listing_id)?;
    let missing = || Error::Corrupt(format!("listing {listing_id} has no payload row"));

    let payload = match decode_mode(&self.mode)? {
      ListingMode::Have => ListingPayload::Have(Asset {
        title:           self.a_title.ok_or_else(missing)?,
        description:     self.a_desc.unwrap_or_default(),
        category:        self.a_category,
        estimated_value: self.a_value,
        terms:           serde_json::from_str(self.a_terms.as_deref().unwrap_or("{}"))?,
      }),
      ListingMode::Want => ListingPayload::Want(Want {
        title:        self.w_title.ok_or_else(missing)?,
        description:  self.w_desc.unwrap_or_default(),
        category:     self.w_category,
        target_value: self.w_value,
        terms:        serde_json::from_str(self.w_terms.as_deref().unwrap_or("{}"))?,
      }),
    };

    Ok(Listing {
      listing_id,
      owner_id: UserId::new(self.owner_id)?,
      status: decode_listing_status(&self.status)?,
      payload,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawMatch {
  pub match_id:          String,
  pub listing_a:         String,
  pub listing_b:         String,
  pub have_listing_id:   String,
  pub want_listing_id:   String,
  pub score:             f64,
  pub breakdown_json:    String,
  pub rationale:         String,
  pub structures_json:   String,
  pub inputs_hash:       String,
  pub stale:             bool,
  pub newest_listing_at: String,
  pub created_at:        String,
}

impl RawMatch {
  pub const COLUMNS: &'static str = "m.match_id, m.listing_a, m.listing_b, m.have_listing_id,
    m.want_listing_id, m.score, m.breakdown_json, m.rationale, m.structures_json,
    m.inputs_hash, m.stale, m.newest_listing_at, m.created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      match_id:          row.get(0)?,
      listing_a:         row.get(1)?,
      listing_b:         row.get(2)?,
      have_listing_id:   row.get(3)?,
      want_listing_id:   row.get(4)?,
      score:             row.get(5)?,
      breakdown_json:    row.get(6)?,
      rationale:         row.get(7)?,
      structures_json:   row.get(8)?,
      inputs_hash:       row.get(9)?,
      stale:             row.get(10)?,
      newest_listing_at: row.get(11)?,
      created_at:        row.get(12)?,
    })
  }

  pub fn into_match(self) -> Result<Match> {
    Ok(Match {
      match_id:          decode_uuid(&self.match_id)?,
      listing_a:         decode_uuid(&self.listing_a)?,
      listing_b:         decode_uuid(&self.listing_b)?,
      have_listing_id:   decode_uuid(&self.have_listing_id)?,
      want_listing_id:   decode_uuid(&self.want_listing_id)?,
      score:             self.score,
      breakdown:         serde_json::from_str(&self.breakdown_json)?,
      rationale:         self.rationale,
      structures:        serde_json::from_str(&self.structures_json)?,
      inputs_hash:       self.inputs_hash,
      stale:             self.stale,
      newest_listing_at: decode_dt(&self.newest_listing_at)?,
      created_at:        decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawAgreement {
  pub agreement_id:   String,
  pub match_id:       String,
  pub creator_id:     String,
  pub title:          String,
  pub content:        String,
  pub status:         String,
  pub structure_json: String,
  pub created_at:     String,
  pub updated_at:     String,
}

impl RawAgreement {
  pub const COLUMNS: &'static str = "agreement_id, match_id, creator_id, title, content,
    status, structure_json, created_at, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      agreement_id:   row.get(0)?,
      match_id:       row.get(1)?,
      creator_id:     row.get(2)?,
      title:          row.get(3)?,
      content:        row.get(4)?,
      status:         row.get(5)?,
      structure_json: row.get(6)?,
      created_at:     row.get(7)?,
      updated_at:     row.get(8)?,
    })
  }

  pub fn into_agreement(self) -> Result<AgreementDraft> {
    Ok(AgreementDraft {
      agreement_id: decode_uuid(&self.agreement_id)?,
      match_id:     decode_uuid(&self.match_id)?,
      creator_id:   UserId::new(self.creator_id)?,
      title:        self.title,
      content:      self.content,
      status:       decode_agreement_status(&self.status)?,
      structure:    serde_json::from_str(&self.structure_json)?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawEntitlement {
  pub user_id:         String,
  pub plan:            Option<String>,
  pub customer_id:     Option<String>,
  pub subscription_id: Option<String>,
  pub status:          String,
  pub period_start:    Option<String>,
  pub period_end:      Option<String>,
  pub last_event_id:   Option<String>,
  pub last_event_at:   Option<String>,
  pub updated_at:      String,
}

impl RawEntitlement {
  pub const COLUMNS: &'static str = "user_id, plan, customer_id, subscription_id, status,
    period_start, period_end, last_event_id, last_event_at, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:         row.get(0)?,
      plan:            row.get(1)?,
      customer_id:     row.get(2)?,
      subscription_id: row.get(3)?,
      status:          row.get(4)?,
      period_start:    row.get(5)?,
      period_end:      row.get(6)?,
      last_event_id:   row.get(7)?,
      last_event_at:   row.get(8)?,
      updated_at:      row.get(9)?,
    })
  }

  pub fn into_entitlement(self) -> Result<SubscriptionEntitlement> {
    Ok(SubscriptionEntitlement {
      user_id:              UserId::new(self.user_id)?,
      plan:                 self.plan,
      customer_id:          self.customer_id,
      subscription_id:      self.subscription_id,
      status:               decode_entitlement_status(&self.status)?,
      current_period_start: decode_opt_dt(self.period_start)?,
      current_period_end:   decode_opt_dt(self.period_end)?,
      last_event_id:        self.last_event_id,
      last_event_at:        decode_opt_dt(self.last_event_at)?,
      updated_at:           decode_dt(&self.updated_at)?,
    })
  }
}
