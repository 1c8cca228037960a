//! SQL schema for the dealmatch SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id      TEXT PRIMARY KEY,   -- opaque id from the identity provider
    email        TEXT,
    display_name TEXT,
    created_at   TEXT NOT NULL
);

-- Users are never deleted while they own listings (no cascade on owner_id).
CREATE TABLE IF NOT EXISTS listings (
    listing_id TEXT PRIMARY KEY,
    owner_id   TEXT NOT NULL REFERENCES users(user_id),
    mode       TEXT NOT NULL CHECK (mode IN ('HAVE', 'WANT')),
    status     TEXT NOT NULL DEFAULT 'ACTIVE'
               CHECK (status IN ('ACTIVE', 'PAUSED', 'CLOSED')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (listing_id, mode)
);

-- Payload tables reference (listing_id, mode) so an asset can only hang off
-- a HAVE listing and a want only off a WANT listing.
CREATE TABLE IF NOT EXISTS assets (
    listing_id      TEXT PRIMARY KEY,
    mode            TEXT NOT NULL DEFAULT 'HAVE' CHECK (mode = 'HAVE'),
    title           TEXT NOT NULL,
    description     TEXT NOT NULL,
    category        TEXT,
    estimated_value REAL,
    terms_json      TEXT NOT NULL DEFAULT '{}',
    FOREIGN KEY (listing_id, mode)
      REFERENCES listings(listing_id, mode) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS wants (
    listing_id   TEXT PRIMARY KEY,
    mode         TEXT NOT NULL DEFAULT 'WANT' CHECK (mode = 'WANT'),
    title        TEXT NOT NULL,
    description  TEXT NOT NULL,
    category     TEXT,
    target_value REAL,
    terms_json   TEXT NOT NULL DEFAULT '{}',
    FOREIGN KEY (listing_id, mode)
      REFERENCES listings(listing_id, mode) ON DELETE CASCADE
);

-- One row per unordered pair, smaller id first.
CREATE TABLE IF NOT EXISTS matches (
    match_id          TEXT PRIMARY KEY,
    listing_a         TEXT NOT NULL REFERENCES listings(listing_id) ON DELETE CASCADE,
    listing_b         TEXT NOT NULL REFERENCES listings(listing_id) ON DELETE CASCADE,
    have_listing_id   TEXT NOT NULL,
    want_listing_id   TEXT NOT NULL,
    score             REAL NOT NULL CHECK (score >= 0.0 AND score <= 1.0),
    breakdown_json    TEXT NOT NULL,
    rationale         TEXT NOT NULL,
    structures_json   TEXT NOT NULL DEFAULT '[]',
    inputs_hash       TEXT NOT NULL,
    stale             INTEGER NOT NULL DEFAULT 0,
    newest_listing_at TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    UNIQUE (listing_a, listing_b),
    CHECK  (listing_a < listing_b)
);

-- Advisory per-pair computation leases.
CREATE TABLE IF NOT EXISTS match_leases (
    listing_a  TEXT NOT NULL,
    listing_b  TEXT NOT NULL,
    holder     TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    PRIMARY KEY (listing_a, listing_b)
);

CREATE TABLE IF NOT EXISTS agreements (
    agreement_id   TEXT PRIMARY KEY,
    match_id       TEXT NOT NULL REFERENCES matches(match_id) ON DELETE CASCADE,
    creator_id     TEXT NOT NULL REFERENCES users(user_id),
    title          TEXT NOT NULL,
    content        TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'DRAFT'
                   CHECK (status IN ('DRAFT', 'IN_REVIEW', 'FINALIZED', 'VOID')),
    structure_json TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entitlements (
    user_id         TEXT PRIMARY KEY REFERENCES users(user_id),
    plan            TEXT,
    customer_id     TEXT,
    subscription_id TEXT,
    status          TEXT NOT NULL DEFAULT 'NONE',
    period_start    TEXT,
    period_end      TEXT,
    last_event_id   TEXT,
    last_event_at   TEXT,
    updated_at      TEXT NOT NULL
);

-- Every billing event id ever processed, applied or not.
CREATE TABLE IF NOT EXISTS billing_events (
    event_id     TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    event_at     TEXT NOT NULL,
    outcome      TEXT NOT NULL,   -- 'applied' | 'stale' | 'unopened'
    processed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS listings_owner_idx        ON listings(owner_id);
CREATE INDEX IF NOT EXISTS matches_listing_b_idx     ON matches(listing_b);
CREATE INDEX IF NOT EXISTS agreements_match_idx      ON agreements(match_id);
CREATE INDEX IF NOT EXISTS entitlements_customer_idx ON entitlements(customer_id);

PRAGMA user_version = 1;
";
