//! Interest rows: the persistent mirror of the in-memory registry.

use serde::{Deserialize, Serialize};

use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestRow {
    pub id: String,
    pub service_id: String,
    pub bot_account_id: String,
    pub event_type: String,
    pub broadcaster_user_id: String,
    pub transport: String,
    pub webhook_url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

const COLS: &str = "id, service_id, bot_account_id, event_type, broadcaster_user_id, \
                    transport, webhook_url, created_at, updated_at";

fn row_to_interest(row: &rusqlite::Row<'_>) -> Result<InterestRow, rusqlite::Error> {
    Ok(InterestRow {
        id: row.get(0)?,
        service_id: row.get(1)?,
        bot_account_id: row.get(2)?,
        event_type: row.get(3)?,
        broadcaster_user_id: row.get(4)?,
        transport: row.get(5)?,
        webhook_url: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    /// Insert a new interest row. Fails with `DbError::Conflict` when the
    /// unique tuple already exists; callers re-read and touch instead.
    pub fn insert_interest(&self, row: &InterestRow) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO interests (id, service_id, bot_account_id, event_type, \
                 broadcaster_user_id, transport, webhook_url, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    row.id,
                    row.service_id,
                    row.bot_account_id,
                    row.event_type,
                    row.broadcaster_user_id,
                    row.transport,
                    row.webhook_url,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_interest(&self, id: &str) -> Result<Option<InterestRow>, DbError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLS} FROM interests WHERE id = ?1"))?;
            let row = stmt.query_row([id], row_to_interest).optional()?;
            Ok(row)
        })
    }

    /// Find the row matching the full unique tuple.
    pub fn find_interest_by_tuple(
        &self,
        service_id: &str,
        bot_account_id: &str,
        event_type: &str,
        broadcaster_user_id: &str,
        transport: &str,
        webhook_url: &str,
    ) -> Result<Option<InterestRow>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM interests \
                 WHERE service_id = ?1 AND bot_account_id = ?2 AND event_type = ?3 \
                   AND broadcaster_user_id = ?4 AND transport = ?5 AND webhook_url = ?6"
            ))?;
            let row = stmt
                .query_row(
                    rusqlite::params![
                        service_id,
                        bot_account_id,
                        event_type,
                        broadcaster_user_id,
                        transport,
                        webhook_url
                    ],
                    row_to_interest,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_interests(&self) -> Result<Vec<InterestRow>, DbError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLS} FROM interests ORDER BY created_at"))?;
            let rows = stmt
                .query_map([], row_to_interest)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn touch_interest(&self, id: &str, updated_at: i64) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE interests SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id, updated_at],
            )?;
            Ok(())
        })
    }

    /// Touch every interest of one service sharing `(bot, broadcaster)`.
    /// Returns the number of rows updated.
    pub fn touch_interest_group(
        &self,
        service_id: &str,
        bot_account_id: &str,
        broadcaster_user_id: &str,
        updated_at: i64,
    ) -> Result<usize, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE interests SET updated_at = ?4 \
                 WHERE service_id = ?1 AND bot_account_id = ?2 AND broadcaster_user_id = ?3",
                rusqlite::params![service_id, bot_account_id, broadcaster_user_id, updated_at],
            )?;
            Ok(n)
        })
    }

    pub fn delete_interest(&self, id: &str) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM interests WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Delete rows whose `updated_at` is older than the cutoff.
    /// Returns the removed rows so the caller can release orphaned keys.
    pub fn delete_stale_interests(&self, cutoff: i64) -> Result<Vec<InterestRow>, DbError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {COLS} FROM interests WHERE updated_at < ?1"
                ))?;
                stmt.query_map([cutoff], row_to_interest)?
                    .collect::<Result<Vec<_>, _>>()?
            };
            tx.execute("DELETE FROM interests WHERE updated_at < ?1", [cutoff])?;
            tx.commit()?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test DB")
    }

    fn sample(id: &str, service: &str, updated_at: i64) -> InterestRow {
        InterestRow {
            id: id.into(),
            service_id: service.into(),
            bot_account_id: "bot1".into(),
            event_type: "channel.chat.message".into(),
            broadcaster_user_id: "12345".into(),
            transport: "ws".into(),
            webhook_url: String::new(),
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn test_insert_and_find_by_tuple() {
        let db = test_db();
        db.insert_interest(&sample("i1", "svcA", 100)).unwrap();

        let found = db
            .find_interest_by_tuple("svcA", "bot1", "channel.chat.message", "12345", "ws", "")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "i1");

        let missing = db
            .find_interest_by_tuple("svcB", "bot1", "channel.chat.message", "12345", "ws", "")
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_group_touch() {
        let db = test_db();
        db.insert_interest(&sample("i1", "svcA", 100)).unwrap();
        let mut online = sample("i2", "svcA", 100);
        online.event_type = "stream.online".into();
        db.insert_interest(&online).unwrap();
        // Same key, different service: not part of the group.
        db.insert_interest(&sample("i3", "svcB", 100)).unwrap();

        let n = db.touch_interest_group("svcA", "bot1", "12345", 500).unwrap();
        assert_eq!(n, 2);

        assert_eq!(db.get_interest("i1").unwrap().unwrap().updated_at, 500);
        assert_eq!(db.get_interest("i2").unwrap().unwrap().updated_at, 500);
        assert_eq!(db.get_interest("i3").unwrap().unwrap().updated_at, 100);
    }

    #[test]
    fn test_delete_stale() {
        let db = test_db();
        db.insert_interest(&sample("old", "svcA", 100)).unwrap();
        db.insert_interest(&sample("new", "svcB", 900)).unwrap();

        let removed = db.delete_stale_interests(500).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "old");

        let left = db.list_interests().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "new");
    }
}
