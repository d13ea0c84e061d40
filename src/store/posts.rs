// SPDX-License-Identifier: MPL-2.0

use crate::store::db::{time_at, to_millis};
use crate::store::types::{Post, PostCounts, PostKind};
use crate::store::{StoreDb, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

const SELECT_POST: &str = r#"
    SELECT uri, cid, author_did, kind, subject, created_at, indexed_at,
           like_count, repost_count, reply_count, quote_count, fetched_at
    FROM posts
"#;

/// Store operations for posts
pub struct PostStore<'a> {
    db: &'a StoreDb,
}

impl<'a> PostStore<'a> {
    pub fn new(db: &'a StoreDb) -> Self {
        Self { db }
    }

    /// Insert posts in a transaction. Rows already present are left untouched.
    /// Returns how many were new.
    pub fn insert_batch(&self, posts: &[Post]) -> Result<usize, StoreError> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;

        for post in posts {
            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO posts (
                    uri, cid, author_did, contributor_did, kind, subject,
                    created_at, indexed_at,
                    like_count, repost_count, reply_count, quote_count,
                    fetched_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    post.uri,
                    post.cid,
                    post.author_did,
                    post.contributor(),
                    post.kind.tag(),
                    post.kind.subject(),
                    to_millis(&post.created_at),
                    to_millis(&post.indexed_at),
                    post.counts.likes,
                    post.counts.reposts,
                    post.counts.replies,
                    post.counts.quotes,
                    to_millis(&post.fetched_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    pub fn all(&self) -> Result<Vec<Post>, StoreError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_POST} ORDER BY created_at DESC, uri"))?;
        let rows = stmt.query_map([], Self::from_row)?;
        Self::collect(rows)
    }

    /// Posts, replies and quotes written by `did` since `since`; reposts of
    /// the author's posts by other accounts are excluded.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.db.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Range deletion on the creation-time index
    pub fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.db.conn();
        let deleted = conn.execute(
            "DELETE FROM posts WHERE created_at < ?",
            [to_millis(&cutoff)],
        )?;
        Ok(deleted)
    }

    fn collect(
        rows: impl Iterator<Item = rusqlite::Result<Option<Post>>>,
    ) -> Result<Vec<Post>, StoreError> {
        let mut posts = Vec::new();
        for row in rows {
            if let Some(post) = row? {
                posts.push(post);
            }
        }
        Ok(posts)
    }

    /// Rows with an unknown kind tag are skipped rather than failing the read.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Option<Post>> {
        let uri: String = row.get(0)?;
        let tag: String = row.get(3)?;
        let Some(kind) = PostKind::from_parts(&tag, row.get(4)?) else {
            tracing::warn!(%uri, %tag, "skipping post with unknown kind");
            return Ok(None);
        };

        Ok(Some(Post {
            uri,
            cid: row.get(1)?,
            author_did: row.get(2)?,
            kind,
            created_at: time_at(row, 5)?,
            indexed_at: time_at(row, 6)?,
            counts: PostCounts {
                likes: row.get(7)?,
                reposts: row.get(8)?,
                replies: row.get(9)?,
                quotes: row.get(10)?,
            },
            fetched_at: time_at(row, 11)?,
        }))
    }
}
