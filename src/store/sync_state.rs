// SPDX-License-Identifier: MPL-2.0

use crate::store::db::{from_millis, time_at, to_millis};
use crate::store::types::{CachedAnalytics, ANALYTICS_CACHE_ID, SyncState, SyncStatus};
use crate::store::{StoreDb, StoreError};
use rusqlite::{OptionalExtension, Row, params};

const SELECT_STATE: &str = r#"
    SELECT key, cursor, last_sync_at, items_processed, status, error
    FROM sync_state
"#;

/// Store operations for engine-owned state: stage rows and the analytics
/// snapshot row.
pub struct EngineStateStore<'a> {
    db: &'a StoreDb,
}

impl<'a> EngineStateStore<'a> {
    pub fn new(db: &'a StoreDb) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<SyncState>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_STATE} WHERE key = ?"))?;
        Ok(stmt.query_row([key], Self::from_row).optional()?)
    }

    pub fn put(&self, state: &SyncState) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO sync_state (key, cursor, last_sync_at, items_processed, status, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(key) DO UPDATE SET
                cursor = excluded.cursor,
                last_sync_at = excluded.last_sync_at,
                items_processed = excluded.items_processed,
                status = excluded.status,
                error = excluded.error
            "#,
            params![
                state.key,
                state.cursor,
                state.last_sync_at.as_ref().map(to_millis),
                state.items_processed as i64,
                state.status.as_str(),
                state.error,
            ],
        )?;
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<SyncState>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_STATE} ORDER BY key"))?;
        let rows = stmt.query_map([], Self::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_analytics(&self) -> Result<Option<CachedAnalytics>, StoreError> {
        let conn = self.db.conn();
        let cached = conn
            .query_row(
                "SELECT payload, computed_at FROM cached_analytics WHERE id = ?",
                [ANALYTICS_CACHE_ID],
                |row| {
                    Ok(CachedAnalytics {
                        payload: row.get(0)?,
                        computed_at: time_at(row, 1)?,
                    })
                },
            )
            .optional()?;
        Ok(cached)
    }

    /// Replace the snapshot row in a single statement.
    pub fn put_analytics(&self, cached: &CachedAnalytics) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO cached_analytics (id, payload, computed_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                computed_at = excluded.computed_at
            "#,
            params![ANALYTICS_CACHE_ID, cached.payload, to_millis(&cached.computed_at)],
        )?;
        Ok(())
    }

    pub fn clear_analytics(&self) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute("DELETE FROM cached_analytics WHERE id = ?", [ANALYTICS_CACHE_ID])?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<SyncState> {
        let status: String = row.get(4)?;
        let status = status.parse::<SyncStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::<dyn std::error::Error + Send + Sync>::from(e),
            )
        })?;
        let last_sync_at: Option<i64> = row.get(2)?;
        let items_processed: i64 = row.get(3)?;

        Ok(SyncState {
            key: row.get(0)?,
            cursor: row.get(1)?,
            last_sync_at: last_sync_at.map(|ms| from_millis(2, ms)).transpose()?,
            items_processed: items_processed.max(0) as u64,
            status,
            error: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_sync_state_round_trip() {
        let db = StoreDb::open_in_memory("did:plc:me").unwrap();
        let store = EngineStateStore::new(&db);

        assert!(store.get("follows").unwrap().is_none());

        let mut state = SyncState::new("follows");
        state.status = SyncStatus::Error;
        state.cursor = Some("c2".into());
        state.error = Some("API error (502): bad gateway".into());
        store.put(&state).unwrap();

        let stored = store.get("follows").unwrap().unwrap();
        assert_eq!(stored, state);
        assert!(stored.is_failed());

        let now = Utc::now();
        state.status = SyncStatus::Idle;
        state.error = None;
        state.last_sync_at = Some(now);
        state.items_processed = 42;
        store.put(&state).unwrap();

        let stored = store.get("follows").unwrap().unwrap();
        assert!(!stored.is_failed());
        assert_eq!(
            stored.last_success().map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
        assert_eq!(stored.items_processed, 42);
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_analytics_row_replace_and_clear() {
        let db = StoreDb::open_in_memory("did:plc:me").unwrap();
        let store = EngineStateStore::new(&db);
        let now = Utc::now();

        store
            .put_analytics(&CachedAnalytics {
                payload: "{\"v\":1}".into(),
                computed_at: now,
            })
            .unwrap();
        store
            .put_analytics(&CachedAnalytics {
                payload: "{\"v\":2}".into(),
                computed_at: now,
            })
            .unwrap();

        let cached = store.get_analytics().unwrap().unwrap();
        assert_eq!(cached.payload, "{\"v\":2}");

        store.clear_analytics().unwrap();
        assert!(store.get_analytics().unwrap().is_none());
    }
}
