//! v001 -- Initial schema creation.
//!
//! Creates the four entity tables `conversations`, `messages`, `users`,
//! `outbox`, plus the `sync_cursors` key/value table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id                   TEXT PRIMARY KEY NOT NULL,
    participants         TEXT NOT NULL,             -- JSON array of user ids
    last_message_id      TEXT,                      -- UUID of summarized message
    last_message_sender  TEXT,
    last_message_preview TEXT,
    last_message_at      TEXT,                      -- RFC-3339, fixed width
    updated_at           TEXT NOT NULL,
    unread_count         INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated_at
    ON conversations(updated_at DESC);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                TEXT PRIMARY KEY NOT NULL,    -- client-generated UUID v4
    conversation_id   TEXT NOT NULL,
    sender_id         TEXT NOT NULL,
    content           TEXT NOT NULL,
    created_at        TEXT NOT NULL,                -- client clock
    server_updated_at TEXT,                         -- NULL until acknowledged
    order_ts          TEXT NOT NULL,                -- COALESCE(server_updated_at, created_at)
    status            TEXT NOT NULL,
    local_only        INTEGER NOT NULL DEFAULT 1    -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_order
    ON messages(conversation_id, order_ts);

-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,
    display_name TEXT,
    avatar_url   TEXT,
    presence     TEXT NOT NULL DEFAULT 'offline',
    last_seen_at TEXT,
    updated_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Outbox (pending local writes)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS outbox (
    id              TEXT PRIMARY KEY NOT NULL,      -- = message id for sends
    kind            TEXT NOT NULL,
    payload         TEXT NOT NULL,                  -- tagged JSON
    enqueued_at     TEXT NOT NULL,
    attempt_count   INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT,
    last_error      TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_enqueued_at ON outbox(enqueued_at);

-- ----------------------------------------------------------------
-- Sync cursors
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sync_cursors (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
