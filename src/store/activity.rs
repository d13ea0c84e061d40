// SPDX-License-Identifier: MPL-2.0

use crate::store::db::{time_at, to_millis};
use crate::store::types::{ActivityKind, Engagement, Interaction};
use crate::store::{StoreDb, StoreError};
use rusqlite::{Row, params};

/// Store operations for interactions (outbound) and engagements (inbound).
/// Both are upserts by composite key, so recording twice is a no-op.
pub struct ActivityStore<'a> {
    db: &'a StoreDb,
}

impl<'a> ActivityStore<'a> {
    pub fn new(db: &'a StoreDb) -> Self {
        Self { db }
    }

    pub fn put_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO interactions (
                key, kind, target_uri, target_author_did, created_at, own_post_uri
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(key) DO UPDATE SET
                target_author_did = excluded.target_author_did,
                created_at = excluded.created_at,
                own_post_uri = excluded.own_post_uri
            "#,
            params![
                interaction.key(),
                interaction.kind.as_str(),
                interaction.target_uri,
                interaction.target_author_did,
                to_millis(&interaction.created_at),
                interaction.own_post_uri,
            ],
        )?;
        Ok(())
    }

    pub fn put_engagement(&self, engagement: &Engagement) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO engagements (
                key, kind, target_uri, from_did, from_handle, created_at, their_post_uri
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(key) DO UPDATE SET
                from_handle = excluded.from_handle,
                created_at = excluded.created_at,
                their_post_uri = excluded.their_post_uri
            "#,
            params![
                engagement.key(),
                engagement.kind.as_str(),
                engagement.target_uri,
                engagement.from_did,
                engagement.from_handle,
                to_millis(&engagement.created_at),
                engagement.their_post_uri,
            ],
        )?;
        Ok(())
    }

    pub fn interactions(&self) -> Result<Vec<Interaction>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT kind, target_uri, target_author_did, created_at, own_post_uri
            FROM interactions
            ORDER BY created_at, key
            "#,
        )?;
        let rows = stmt.query_map([], Self::interaction_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn engagements(&self) -> Result<Vec<Engagement>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT kind, target_uri, from_did, from_handle, created_at, their_post_uri
            FROM engagements
            ORDER BY created_at, key
            "#,
        )?;
        let rows = stmt.query_map([], Self::engagement_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_interactions(&self) -> Result<usize, StoreError> {
        let conn = self.db.conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM interactions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_engagements(&self) -> Result<usize, StoreError> {
        let conn = self.db.conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM engagements", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<Interaction> {
        Ok(Interaction {
            kind: parse_kind(row, 0)?,
            target_uri: row.get(1)?,
            target_author_did: row.get(2)?,
            created_at: time_at(row, 3)?,
            own_post_uri: row.get(4)?,
        })
    }

    fn engagement_from_row(row: &Row<'_>) -> rusqlite::Result<Engagement> {
        Ok(Engagement {
            kind: parse_kind(row, 0)?,
            target_uri: row.get(1)?,
            from_did: row.get(2)?,
            from_handle: row.get(3)?,
            created_at: time_at(row, 4)?,
            their_post_uri: row.get(5)?,
        })
    }
}

fn parse_kind(row: &Row<'_>, idx: usize) -> rusqlite::Result<ActivityKind> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e),
        )
    })
}
