//! Ledger schema.
//!
//! Every table carries an opaque `BLOB` uuid key. Timestamps are RFC 3339 text
//! written with a fixed microsecond precision, so they compare correctly as
//! strings. Balances and amounts are integer cents.

/// DDL statements, applied in order inside one transaction. Idempotent.
pub(crate) const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id            BLOB PRIMARY KEY NOT NULL,
        email         TEXT NOT NULL UNIQUE,
        role          TEXT NOT NULL CHECK (role IN ('artist', 'admin')),
        balance_cents INTEGER NOT NULL DEFAULT 0 CHECK (balance_cents >= 0),
        created_at    TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        id           BLOB PRIMARY KEY NOT NULL,
        user_id      BLOB NOT NULL UNIQUE REFERENCES users (id),
        display_name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS applications (
        id         BLOB PRIMARY KEY NOT NULL,
        user_id    BLOB NOT NULL REFERENCES users (id),
        status     TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id         BLOB PRIMARY KEY NOT NULL,
        user_id    BLOB NOT NULL REFERENCES users (id),
        kind       TEXT NOT NULL,
        payload    TEXT NOT NULL,
        is_read    INTEGER NOT NULL DEFAULT 0 CHECK (is_read IN (0, 1)),
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tickets (
        id         BLOB PRIMARY KEY NOT NULL,
        user_id    BLOB NOT NULL REFERENCES users (id),
        subject    TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ticket_responses (
        id         BLOB PRIMARY KEY NOT NULL,
        ticket_id  BLOB NOT NULL REFERENCES tickets (id),
        user_id    BLOB NOT NULL REFERENCES users (id),
        body       TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artists (
        id      BLOB PRIMARY KEY NOT NULL,
        user_id BLOB NOT NULL REFERENCES users (id),
        name    TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS writers (
        id      BLOB PRIMARY KEY NOT NULL,
        user_id BLOB NOT NULL REFERENCES users (id),
        name    TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS releases (
        id         BLOB PRIMARY KEY NOT NULL,
        user_id    BLOB NOT NULL REFERENCES users (id),
        title      TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracks (
        id         BLOB PRIMARY KEY NOT NULL,
        release_id BLOB NOT NULL REFERENCES releases (id),
        title      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_artists (
        release_id BLOB NOT NULL REFERENCES releases (id),
        artist_id  BLOB NOT NULL REFERENCES artists (id),
        PRIMARY KEY (release_id, artist_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_writers (
        release_id BLOB NOT NULL REFERENCES releases (id),
        writer_id  BLOB NOT NULL REFERENCES writers (id),
        PRIMARY KEY (release_id, writer_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS contracts (
        id         BLOB PRIMARY KEY NOT NULL,
        release_id BLOB NOT NULL REFERENCES releases (id),
        terms      TEXT NOT NULL,
        signed_at  TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS earnings (
        id           BLOB PRIMARY KEY NOT NULL,
        user_id      BLOB NOT NULL REFERENCES users (id),
        month        TEXT NOT NULL,
        amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
        streams      INTEGER NOT NULL DEFAULT 0 CHECK (streams >= 0),
        downloads    INTEGER NOT NULL DEFAULT 0 CHECK (downloads >= 0),
        created_at   TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS earnings_user_month ON earnings (user_id, month)",
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals (
        id           BLOB PRIMARY KEY NOT NULL,
        user_id      BLOB NOT NULL REFERENCES users (id),
        amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
        method       TEXT NOT NULL,
        details      TEXT NOT NULL,
        status       TEXT NOT NULL DEFAULT 'PENDING'
                     CHECK (status IN ('PENDING', 'COMPLETED', 'REJECTED')),
        note         TEXT,
        requested_at TEXT NOT NULL,
        processed_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS withdrawals_user ON withdrawals (user_id, requested_at)",
    r#"
    CREATE TABLE IF NOT EXISTS payment_methods (
        id             BLOB PRIMARY KEY NOT NULL,
        user_id        BLOB NOT NULL REFERENCES users (id),
        bank_name      TEXT NOT NULL,
        account_holder TEXT NOT NULL,
        iban           TEXT NOT NULL,
        swift_bic      TEXT,
        is_default     INTEGER NOT NULL DEFAULT 0 CHECK (is_default IN (0, 1)),
        created_at     TEXT NOT NULL
    )
    "#,
    // At most one default per user, enforced by the store itself.
    "CREATE UNIQUE INDEX IF NOT EXISTS payment_methods_one_default ON payment_methods (user_id) WHERE is_default = 1",
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id         BLOB PRIMARY KEY NOT NULL,
        owner_id   BLOB NOT NULL REFERENCES users (id),
        name       TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team_members (
        id         BLOB PRIMARY KEY NOT NULL,
        team_id    BLOB NOT NULL REFERENCES teams (id),
        user_id    BLOB NOT NULL REFERENCES users (id),
        share_bps  INTEGER NOT NULL CHECK (share_bps BETWEEN 1 AND 10000),
        role       TEXT NOT NULL CHECK (role IN ('owner', 'member')),
        status     TEXT NOT NULL CHECK (status IN ('PENDING', 'ACTIVE')),
        joined_at  TEXT NOT NULL,
        UNIQUE (team_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team_invites (
        id          BLOB PRIMARY KEY NOT NULL,
        team_id     BLOB NOT NULL REFERENCES teams (id),
        email       TEXT NOT NULL,
        share_bps   INTEGER NOT NULL CHECK (share_bps BETWEEN 1 AND 10000),
        invite_code TEXT NOT NULL UNIQUE,
        status      TEXT NOT NULL DEFAULT 'PENDING'
                    CHECK (status IN ('PENDING', 'ACCEPTED', 'EXPIRED')),
        expires_at  TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        accepted_by BLOB,
        accepted_at TEXT
    )
    "#,
];

/// Tables in dependency order: every table appears after the tables it
/// references. Restores insert in this order and delete in reverse.
pub(crate) const TABLES: &[&str] = &[
    "users",
    "profiles",
    "applications",
    "notifications",
    "tickets",
    "ticket_responses",
    "artists",
    "writers",
    "releases",
    "tracks",
    "release_artists",
    "release_writers",
    "contracts",
    "earnings",
    "withdrawals",
    "payment_methods",
    "teams",
    "team_members",
    "team_invites",
];
