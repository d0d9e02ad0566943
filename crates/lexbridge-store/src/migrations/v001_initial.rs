//! v001 -- Initial schema creation.
//!
//! Cases with their proposals, direct connections, channels with their
//! participants, messages and per-message read markers.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Cases (queries and disputes)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS cases (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    kind            TEXT NOT NULL,               -- 'query' | 'dispute'
    owner           TEXT NOT NULL,               -- citizen user id
    title           TEXT NOT NULL,
    assigned_lawyer TEXT,                        -- NULL until assigned
    status          TEXT NOT NULL,
    version         INTEGER NOT NULL DEFAULT 0,  -- optimistic concurrency token
    created_at      TEXT NOT NULL,               -- RFC-3339
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cases_owner ON cases(owner);
CREATE INDEX IF NOT EXISTS idx_cases_lawyer ON cases(assigned_lawyer);

-- ----------------------------------------------------------------
-- Proposals (lawyer offers and citizen requests)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS proposals (
    id           TEXT PRIMARY KEY NOT NULL,
    case_id      TEXT NOT NULL,
    kind         TEXT NOT NULL,                  -- 'lawyer_offer' | 'citizen_request'
    proposer     TEXT NOT NULL,
    counterpart  TEXT NOT NULL,
    message      TEXT NOT NULL,
    status       TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    responded_at TEXT,

    FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_proposals_case ON proposals(case_id, requested_at);
CREATE INDEX IF NOT EXISTS idx_proposals_parties ON proposals(proposer, counterpart);

-- ----------------------------------------------------------------
-- Direct connections (one row per citizen/lawyer pair)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS direct_connections (
    id               TEXT PRIMARY KEY NOT NULL,
    citizen          TEXT NOT NULL,
    lawyer           TEXT NOT NULL,
    status           TEXT NOT NULL,
    message          TEXT NOT NULL,
    response_message TEXT,
    channel_id       TEXT,
    version          INTEGER NOT NULL DEFAULT 0,
    requested_at     TEXT NOT NULL,
    responded_at     TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_connections_pair
    ON direct_connections(citizen, lawyer);
CREATE INDEX IF NOT EXISTS idx_connections_lawyer ON direct_connections(lawyer);

-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id              TEXT PRIMARY KEY NOT NULL,   -- derived, e.g. 'query_<id>'
    tie_kind        TEXT NOT NULL,               -- 'query' | 'dispute' | 'direct'
    case_id         TEXT,                        -- set for case channels
    status          TEXT NOT NULL,               -- 'pending' | 'active'
    created_at      TEXT NOT NULL,
    last_message_at TEXT
);

CREATE TABLE IF NOT EXISTS channel_participants (
    channel_id    TEXT NOT NULL,
    user_id       TEXT NOT NULL,
    last_read_seq INTEGER NOT NULL DEFAULT 0,    -- read cursor

    PRIMARY KEY (channel_id, user_id),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON channel_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,
    channel_id TEXT NOT NULL,
    seq        INTEGER NOT NULL,                 -- per-channel order
    sender     TEXT NOT NULL,
    kind       TEXT NOT NULL,                    -- 'text' | 'file' | 'system'
    content    TEXT,
    file_ref   TEXT,
    sent_at    TEXT NOT NULL,

    UNIQUE (channel_id, seq),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
