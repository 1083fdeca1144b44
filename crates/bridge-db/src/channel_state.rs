//! Last-known stream liveness per `(bot, broadcaster)`.

use serde::{Deserialize, Serialize};

use crate::{Database, DbError, OptionalExt};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub bot_account_id: String,
    pub broadcaster_user_id: String,
    pub is_live: bool,
    /// When liveness last flipped.
    pub changed_at: i64,
    pub updated_at: i64,
}

impl Database {
    pub fn upsert_channel_state(
        &self,
        bot_account_id: &str,
        broadcaster_user_id: &str,
        is_live: bool,
        now: i64,
    ) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channel_states (bot_account_id, broadcaster_user_id, is_live, changed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(bot_account_id, broadcaster_user_id) DO UPDATE SET
                    changed_at = CASE WHEN channel_states.is_live != excluded.is_live
                                      THEN excluded.updated_at ELSE channel_states.changed_at END,
                    is_live = excluded.is_live,
                    updated_at = excluded.updated_at",
                rusqlite::params![bot_account_id, broadcaster_user_id, is_live, now],
            )?;
            Ok(())
        })
    }

    pub fn get_channel_state(
        &self,
        bot_account_id: &str,
        broadcaster_user_id: &str,
    ) -> Result<Option<ChannelState>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT bot_account_id, broadcaster_user_id, is_live, changed_at, updated_at
                 FROM channel_states
                 WHERE bot_account_id = ?1 AND broadcaster_user_id = ?2",
            )?;
            let row = stmt
                .query_row([bot_account_id, broadcaster_user_id], |row| {
                    Ok(ChannelState {
                        bot_account_id: row.get(0)?,
                        broadcaster_user_id: row.get(1)?,
                        is_live: row.get(2)?,
                        changed_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Distinct `(bot, broadcaster)` pairs currently tracked.
    pub fn list_channel_state_keys(&self) -> Result<Vec<(String, String)>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT bot_account_id, broadcaster_user_id FROM channel_states",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
