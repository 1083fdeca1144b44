//! Per-service runtime counters.

use crate::{Database, DbError, OptionalExt};

impl Database {
    pub fn increment_webhook_failures(&self, service_id: &str, now: i64) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO service_counters (service_id, webhook_failures, updated_at)
                 VALUES (?1, 1, ?2)
                 ON CONFLICT(service_id) DO UPDATE SET
                    webhook_failures = webhook_failures + 1,
                    updated_at = excluded.updated_at",
                rusqlite::params![service_id, now],
            )?;
            Ok(())
        })
    }

    pub fn get_webhook_failures(&self, service_id: &str) -> Result<i64, DbError> {
        self.with_conn(|conn| {
            let count: Option<i64> = conn
                .query_row(
                    "SELECT webhook_failures FROM service_counters WHERE service_id = ?1",
                    [service_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count.unwrap_or(0))
        })
    }

    pub fn list_webhook_failures(&self) -> Result<Vec<(String, i64)>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT service_id, webhook_failures FROM service_counters ORDER BY service_id",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
