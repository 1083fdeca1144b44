//! Read-side accessors for service and bot accounts.
//!
//! Account provisioning happens outside the bridge; the core only reads
//! these rows (and writes back refreshed bot tokens / scope disables).

use serde::{Deserialize, Serialize};

use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub id: String,
    pub display_name: String,
    /// Hex-encoded SHA-256 of the service secret.
    pub secret_hash: String,
    /// JSON array of bot account ids, or `None` for all bots.
    pub bot_allowlist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotAccount {
    pub id: String,
    pub twitch_user_id: String,
    pub login: String,
    pub access_token: String,
    pub refresh_token: String,
    pub scope: String,
    pub expires_at: i64,
    pub enabled: bool,
    /// Event types this bot may no longer serve (missing scope).
    pub disabled_event_types: Vec<String>,
}

fn parse_string_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

impl Database {
    pub fn get_service_account(&self, id: &str) -> Result<Option<ServiceAccount>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, display_name, secret_hash, bot_allowlist FROM service_accounts WHERE id = ?1",
            )?;
            let row = stmt
                .query_row([id], |row| {
                    let allowlist: Option<String> = row.get(3)?;
                    Ok(ServiceAccount {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        secret_hash: row.get(2)?,
                        bot_allowlist: allowlist.map(|s| parse_string_list(&s)),
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_bot_account(&self, id: &str) -> Result<Option<BotAccount>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, twitch_user_id, login, access_token, refresh_token, scope, \
                 expires_at, enabled, disabled_event_types FROM bot_accounts WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], row_to_bot).optional()?;
            Ok(row)
        })
    }

    pub fn list_bot_accounts(&self) -> Result<Vec<BotAccount>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, twitch_user_id, login, access_token, refresh_token, scope, \
                 expires_at, enabled, disabled_event_types FROM bot_accounts",
            )?;
            let rows = stmt
                .query_map([], row_to_bot)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Persist a refreshed user token for a bot.
    pub fn save_bot_token(
        &self,
        id: &str,
        access_token: &str,
        refresh_token: &str,
        scope: &str,
        expires_at: i64,
    ) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE bot_accounts SET access_token = ?2, refresh_token = ?3, scope = ?4, \
                 expires_at = ?5 WHERE id = ?1",
                rusqlite::params![id, access_token, refresh_token, scope, expires_at],
            )?;
            Ok(())
        })
    }

    /// Record that a bot can no longer serve an event type (missing scope).
    /// Stays in effect until an operator re-authorizes the bot.
    pub fn disable_bot_event_type(&self, id: &str, event_type: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT disabled_event_types FROM bot_accounts WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Err(DbError::NotFound(format!("bot account {id}")));
            };
            let mut list = parse_string_list(&current);
            if !list.iter().any(|t| t == event_type) {
                list.push(event_type.to_string());
            }
            let json = serde_json::to_string(&list)
                .map_err(|e| DbError::InvalidData(e.to_string()))?;
            conn.execute(
                "UPDATE bot_accounts SET disabled_event_types = ?2 WHERE id = ?1",
                rusqlite::params![id, json],
            )?;
            Ok(())
        })
    }
}

fn row_to_bot(row: &rusqlite::Row<'_>) -> Result<BotAccount, rusqlite::Error> {
    let disabled: String = row.get(8)?;
    Ok(BotAccount {
        id: row.get(0)?,
        twitch_user_id: row.get(1)?,
        login: row.get(2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        scope: row.get(5)?,
        expires_at: row.get(6)?,
        enabled: row.get(7)?,
        disabled_event_types: parse_string_list(&disabled),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test DB")
    }

    fn seed_bot(db: &Database, id: &str) {
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO bot_accounts (id, twitch_user_id, login, access_token, refresh_token, scope, expires_at, enabled)
                 VALUES (?1, '42', 'botlogin', 'tok', 'ref', 'user:read:chat', 9999, true)",
                [id],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_bot_round_trip() {
        let db = test_db();
        seed_bot(&db, "bot1");

        let bot = db.get_bot_account("bot1").unwrap().unwrap();
        assert_eq!(bot.twitch_user_id, "42");
        assert!(bot.enabled);
        assert!(bot.disabled_event_types.is_empty());

        db.save_bot_token("bot1", "tok2", "ref2", "user:read:chat", 12345)
            .unwrap();
        let bot = db.get_bot_account("bot1").unwrap().unwrap();
        assert_eq!(bot.access_token, "tok2");
        assert_eq!(bot.expires_at, 12345);
    }

    #[test]
    fn test_disable_event_type_is_idempotent() {
        let db = test_db();
        seed_bot(&db, "bot1");

        db.disable_bot_event_type("bot1", "channel.follow").unwrap();
        db.disable_bot_event_type("bot1", "channel.follow").unwrap();

        let bot = db.get_bot_account("bot1").unwrap().unwrap();
        assert_eq!(bot.disabled_event_types, vec!["channel.follow"]);
    }

    #[test]
    fn test_disable_unknown_bot() {
        let db = test_db();
        match db.disable_bot_event_type("missing", "channel.follow") {
            Err(DbError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_service_account_allowlist() {
        let db = test_db();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO service_accounts (id, display_name, secret_hash, bot_allowlist)
                 VALUES ('svcA', 'Service A', 'deadbeef', '[\"bot1\"]')",
                [],
            )?;
            conn.execute(
                "INSERT INTO service_accounts (id, display_name, secret_hash, bot_allowlist)
                 VALUES ('svcB', 'Service B', 'cafebabe', NULL)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let a = db.get_service_account("svcA").unwrap().unwrap();
        assert_eq!(a.bot_allowlist, Some(vec!["bot1".to_string()]));

        let b = db.get_service_account("svcB").unwrap().unwrap();
        assert!(b.bot_allowlist.is_none());
    }
}
