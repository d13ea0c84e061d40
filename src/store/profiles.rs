// SPDX-License-Identifier: MPL-2.0

use crate::store::db::{time_at, to_millis};
use crate::store::types::{FollowEdge, Profile, ProfileUpdate};
use crate::store::{StoreDb, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;

const SELECT_PROFILE: &str = r#"
    SELECT did, handle, display_name, avatar, follows_you, you_follow, is_mutual, last_updated
    FROM profiles
"#;

/// Store operations for profiles
pub struct ProfileStore<'a> {
    db: &'a StoreDb,
}

impl<'a> ProfileStore<'a> {
    pub fn new(db: &'a StoreDb) -> Self {
        Self { db }
    }

    /// Merge an update into the stored row under one lock
    pub fn merge(
        &self,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Profile, StoreError> {
        let conn = self.db.conn();
        let existing = Self::read(&conn, &update.did)?;
        let merged = Profile::merge(existing, update, now);
        Self::write(&conn, &merged)?;
        Ok(merged)
    }

    pub fn get(&self, did: &str) -> Result<Option<Profile>, StoreError> {
        let conn = self.db.conn();
        Self::read(&conn, did)
    }

    pub fn all(&self) -> Result<Vec<Profile>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_PROFILE} ORDER BY did"))?;
        let rows = stmt.query_map([], Self::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Accounts the user follows
    pub fn followed(&self) -> Result<Vec<Profile>, StoreError> {
        let conn = self.db.conn();
        let mut stmt =
            conn.prepare(&format!("{SELECT_PROFILE} WHERE you_follow = 1 ORDER BY did"))?;
        let rows = stmt.query_map([], Self::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.db.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Clear `edge` on every profile whose DID is not in `keep`.
    /// Returns the number of profiles changed.
    pub fn clear_edges_except(
        &self,
        edge: FollowEdge,
        keep: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let column = match edge {
            FollowEdge::FollowsYou => "follows_you",
            FollowEdge::YouFollow => "you_follow",
        };
        let stale: Vec<Profile> = {
            let mut stmt = tx.prepare(&format!("{SELECT_PROFILE} WHERE {column} = 1"))?;
            let rows = stmt.query_map([], Self::from_row)?;
            rows.filter(|row| !matches!(row, Ok(p) if keep.contains(&p.did)))
                .collect::<Result<Vec<_>, _>>()?
        };

        for profile in &stale {
            let cleared = profile.clone().with_edge(edge, false, now);
            Self::write(&tx, &cleared)?;
        }

        tx.commit()?;
        Ok(stale.len())
    }

    fn read(conn: &Connection, did: &str) -> Result<Option<Profile>, StoreError> {
        let mut stmt = conn.prepare(&format!("{SELECT_PROFILE} WHERE did = ?"))?;
        Ok(stmt.query_row([did], Self::from_row).optional()?)
    }

    fn write(conn: &Connection, profile: &Profile) -> Result<(), StoreError> {
        conn.execute(
            r#"
            INSERT INTO profiles (
                did, handle, display_name, avatar,
                follows_you, you_follow, is_mutual, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(did) DO UPDATE SET
                handle = excluded.handle,
                display_name = excluded.display_name,
                avatar = excluded.avatar,
                follows_you = excluded.follows_you,
                you_follow = excluded.you_follow,
                is_mutual = excluded.is_mutual,
                last_updated = excluded.last_updated
            "#,
            params![
                profile.did,
                profile.handle,
                profile.display_name,
                profile.avatar,
                profile.follows_you,
                profile.you_follow,
                profile.is_mutual,
                to_millis(&profile.last_updated),
            ],
        )?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
        Ok(Profile {
            did: row.get(0)?,
            handle: row.get(1)?,
            display_name: row.get(2)?,
            avatar: row.get(3)?,
            follows_you: row.get(4)?,
            you_follow: row.get(5)?,
            is_mutual: row.get(6)?,
            last_updated: time_at(row, 7)?,
        })
    }
}
