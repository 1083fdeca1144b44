//! Upstream subscription rows owned by the subscription manager.

use serde::{Deserialize, Serialize};

use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub id: String,
    pub bot_account_id: String,
    pub event_type: String,
    pub broadcaster_user_id: String,
    pub transport: String,
    pub status: String,
    pub session_id: Option<String>,
    pub cost: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

const COLS: &str = "id, bot_account_id, event_type, broadcaster_user_id, transport, \
                    status, session_id, cost, created_at, updated_at";

fn row_to_sub(row: &rusqlite::Row<'_>) -> Result<SubscriptionRow, rusqlite::Error> {
    Ok(SubscriptionRow {
        id: row.get(0)?,
        bot_account_id: row.get(1)?,
        event_type: row.get(2)?,
        broadcaster_user_id: row.get(3)?,
        transport: row.get(4)?,
        status: row.get(5)?,
        session_id: row.get(6)?,
        cost: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl Database {
    /// Insert a subscription row. The partial unique index rejects a second
    /// enabled/pending row for the same `(key, transport)`.
    pub fn insert_subscription(&self, row: &SubscriptionRow) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO upstream_subscriptions (id, bot_account_id, event_type, \
                 broadcaster_user_id, transport, status, session_id, cost, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    row.id,
                    row.bot_account_id,
                    row.event_type,
                    row.broadcaster_user_id,
                    row.transport,
                    row.status,
                    row.session_id,
                    row.cost,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_subscription(&self, id: &str) -> Result<Option<SubscriptionRow>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM upstream_subscriptions WHERE id = ?1"
            ))?;
            let row = stmt.query_row([id], row_to_sub).optional()?;
            Ok(row)
        })
    }

    pub fn list_subscriptions(&self) -> Result<Vec<SubscriptionRow>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM upstream_subscriptions ORDER BY created_at"
            ))?;
            let rows = stmt
                .query_map([], row_to_sub)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The live (enabled or pending) row for a key and transport, if any.
    pub fn find_live_subscription(
        &self,
        bot_account_id: &str,
        event_type: &str,
        broadcaster_user_id: &str,
        transport: &str,
    ) -> Result<Option<SubscriptionRow>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM upstream_subscriptions \
                 WHERE bot_account_id = ?1 AND event_type = ?2 AND broadcaster_user_id = ?3 \
                   AND transport = ?4 AND status IN ('enabled', 'pending')"
            ))?;
            let row = stmt
                .query_row(
                    rusqlite::params![bot_account_id, event_type, broadcaster_user_id, transport],
                    row_to_sub,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Fallback lookup for rows created before subscription ids were stable.
    pub fn find_subscription_by_type_and_broadcaster(
        &self,
        event_type: &str,
        broadcaster_user_id: &str,
    ) -> Result<Option<SubscriptionRow>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM upstream_subscriptions \
                 WHERE event_type = ?1 AND broadcaster_user_id = ?2 \
                 ORDER BY updated_at DESC LIMIT 1"
            ))?;
            let row = stmt
                .query_row(
                    rusqlite::params![event_type, broadcaster_user_id],
                    row_to_sub,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn set_subscription_status(
        &self,
        id: &str,
        status: &str,
        updated_at: i64,
    ) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE upstream_subscriptions SET status = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, status, updated_at],
            )?;
            Ok(())
        })
    }

    pub fn delete_subscription(&self, id: &str) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM upstream_subscriptions WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Remove every row for a key, any status. Used by release.
    pub fn delete_subscriptions_for_key(
        &self,
        bot_account_id: &str,
        event_type: &str,
        broadcaster_user_id: &str,
    ) -> Result<usize, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM upstream_subscriptions \
                 WHERE bot_account_id = ?1 AND event_type = ?2 AND broadcaster_user_id = ?3",
                rusqlite::params![bot_account_id, event_type, broadcaster_user_id],
            )?;
            Ok(n)
        })
    }

    /// All WS-bound rows in a live state. Used during session rotation.
    pub fn list_ws_subscriptions(&self) -> Result<Vec<SubscriptionRow>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM upstream_subscriptions \
                 WHERE transport = 'ws' AND status IN ('enabled', 'pending')"
            ))?;
            let rows = stmt
                .query_map([], row_to_sub)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Drop all WS-bound rows. The session that carried them is gone and
    /// Twitch has already discarded the subscriptions server-side.
    pub fn delete_ws_subscriptions(&self) -> Result<usize, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM upstream_subscriptions WHERE transport = 'ws'",
                [],
            )?;
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test DB")
    }

    fn sample(id: &str, status: &str, transport: &str) -> SubscriptionRow {
        SubscriptionRow {
            id: id.into(),
            bot_account_id: "bot1".into(),
            event_type: "channel.follow".into(),
            broadcaster_user_id: "12345".into(),
            transport: transport.into(),
            status: status.into(),
            session_id: (transport == "ws").then(|| "sess1".into()),
            cost: 0,
            created_at: 100,
            updated_at: 100,
        }
    }

    #[test]
    fn test_live_uniqueness_per_key_and_transport() {
        let db = test_db();
        db.insert_subscription(&sample("s1", "enabled", "ws")).unwrap();

        // Second live row for the same key+transport violates the partial index.
        match db.insert_subscription(&sample("s2", "pending", "ws")) {
            Err(DbError::Conflict) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }

        // A failed row for the same key is fine.
        db.insert_subscription(&sample("s3", "failed", "ws")).unwrap();
        // A live row on the other transport is fine too.
        db.insert_subscription(&sample("s4", "enabled", "webhook"))
            .unwrap();
    }

    #[test]
    fn test_find_live() {
        let db = test_db();
        db.insert_subscription(&sample("s1", "failed", "ws")).unwrap();
        assert!(db
            .find_live_subscription("bot1", "channel.follow", "12345", "ws")
            .unwrap()
            .is_none());

        db.insert_subscription(&sample("s2", "enabled", "ws")).unwrap();
        let live = db
            .find_live_subscription("bot1", "channel.follow", "12345", "ws")
            .unwrap()
            .unwrap();
        assert_eq!(live.id, "s2");
    }

    #[test]
    fn test_ws_invalidation() {
        let db = test_db();
        db.insert_subscription(&sample("s1", "enabled", "ws")).unwrap();
        db.insert_subscription(&sample("s2", "enabled", "webhook"))
            .unwrap();

        assert_eq!(db.list_ws_subscriptions().unwrap().len(), 1);
        assert_eq!(db.delete_ws_subscriptions().unwrap(), 1);
        assert!(db.get_subscription("s1").unwrap().is_none());
        assert!(db.get_subscription("s2").unwrap().is_some());
    }

    #[test]
    fn test_status_update() {
        let db = test_db();
        db.insert_subscription(&sample("s1", "pending", "webhook"))
            .unwrap();
        db.set_subscription_status("s1", "enabled", 200).unwrap();
        let row = db.get_subscription("s1").unwrap().unwrap();
        assert_eq!(row.status, "enabled");
        assert_eq!(row.updated_at, 200);
    }
}
