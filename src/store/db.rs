// SPDX-License-Identifier: MPL-2.0

use crate::config::APP_NAME;
use crate::store::StoreError;
use crate::store::schema::{SCHEMA, TABLES};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle to the engine database for a specific user
#[derive(Clone)]
pub struct StoreDb {
    conn: Arc<Mutex<Connection>>,
    user_did: String,
}

impl StoreDb {
    /// Open or create the database for a user.
    /// Path: ~/.local/share/rapport/{user_did}/rapport.db
    pub fn open(user_did: &str) -> Result<Self, StoreError> {
        let path = Self::default_path(user_did)?;
        Self::open_at(&path, user_did)
    }

    /// Open or create the database at an explicit location.
    pub fn open_at(path: &Path, user_did: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Path(format!("failed to create data dir: {}", e)))?;
        }

        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened store");
        Self::from_connection(conn, user_did)
    }

    /// Fresh database that lives only as long as the handle.
    pub fn open_in_memory(user_did: &str) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, user_did)
    }

    fn from_connection(conn: Connection, user_did: &str) -> Result<Self, StoreError> {
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            user_did: user_did.to_string(),
        })
    }

    /// Run schema migrations
    fn migrate(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Per-user database location under the XDG data directory
    pub fn default_path(user_did: &str) -> Result<PathBuf, StoreError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StoreError::Path("could not find data directory".to_string()))?;

        // Sanitize DID for filesystem (replace : with _)
        let safe_did = user_did.replace(':', "_");

        Ok(data_dir.join(APP_NAME).join(safe_did).join("rapport.db"))
    }

    pub fn user_did(&self) -> &str {
        &self.user_did
    }

    /// Access connection for operations
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delete every engine row, keeping the schema.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for table in TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}

pub(crate) fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Timestamp stored in `column`; out-of-range values are a conversion error.
pub(crate) fn from_millis(column: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Integer,
            format!("timestamp {ms} ms is out of range").into(),
        )
    })
}

pub(crate) fn time_at(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    from_millis(column, row.get(column)?)
}
