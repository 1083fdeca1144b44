//! Embedded schema and migrations.

use rusqlite::Connection;

use crate::DbError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS interests (
    id TEXT PRIMARY KEY,
    service_id TEXT NOT NULL,
    bot_account_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    broadcaster_user_id TEXT NOT NULL,
    transport TEXT NOT NULL CHECK(transport IN ('ws', 'webhook')),
    webhook_url TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(service_id, bot_account_id, event_type, broadcaster_user_id, transport, webhook_url)
);

CREATE INDEX IF NOT EXISTS idx_interests_key
    ON interests(bot_account_id, event_type, broadcaster_user_id);

CREATE TABLE IF NOT EXISTS upstream_subscriptions (
    id TEXT PRIMARY KEY,
    bot_account_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    broadcaster_user_id TEXT NOT NULL,
    transport TEXT NOT NULL CHECK(transport IN ('ws', 'webhook')),
    status TEXT NOT NULL CHECK(status IN ('enabled', 'pending', 'failed', 'revoked')),
    session_id TEXT,
    cost INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_upstream_live_key
    ON upstream_subscriptions(bot_account_id, event_type, broadcaster_user_id, transport)
    WHERE status IN ('enabled', 'pending');

CREATE TABLE IF NOT EXISTS channel_states (
    bot_account_id TEXT NOT NULL,
    broadcaster_user_id TEXT NOT NULL,
    is_live BOOLEAN NOT NULL DEFAULT false,
    changed_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (bot_account_id, broadcaster_user_id)
);

CREATE TABLE IF NOT EXISTS service_accounts (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    secret_hash TEXT NOT NULL,
    bot_allowlist TEXT,
    created_at INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS bot_accounts (
    id TEXT PRIMARY KEY,
    twitch_user_id TEXT NOT NULL,
    login TEXT NOT NULL DEFAULT '',
    access_token TEXT NOT NULL DEFAULT '',
    refresh_token TEXT NOT NULL DEFAULT '',
    scope TEXT NOT NULL DEFAULT '',
    expires_at INTEGER NOT NULL DEFAULT 0,
    enabled BOOLEAN NOT NULL DEFAULT true,
    disabled_event_types TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS service_counters (
    service_id TEXT PRIMARY KEY,
    webhook_failures INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0
);
"#;

pub(crate) fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(SCHEMA)?;
    migrate_add_columns(conn)?;
    Ok(())
}

/// Additive migrations for databases created by earlier builds.
fn migrate_add_columns(conn: &Connection) -> Result<(), DbError> {
    if !column_exists(conn, "bot_accounts", "disabled_event_types")? {
        tracing::info!("Adding disabled_event_types column to bot_accounts");
        conn.execute_batch(
            "ALTER TABLE bot_accounts ADD COLUMN disabled_event_types TEXT NOT NULL DEFAULT '[]';",
        )?;
    }
    if !column_exists(conn, "upstream_subscriptions", "cost")? {
        tracing::info!("Adding cost column to upstream_subscriptions");
        conn.execute_batch(
            "ALTER TABLE upstream_subscriptions ADD COLUMN cost INTEGER NOT NULL DEFAULT 0;",
        )?;
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
