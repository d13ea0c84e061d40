// SPDX-License-Identifier: MPL-2.0

//! Local persistence for the sync engine.
//!
//! [`LocalStore`] is the seam the engine talks to; [`StoreDb`] is the SQLite
//! implementation, with one small `*Store<'a>` wrapper per entity family.

mod activity;
mod db;
mod posts;
mod profiles;
mod schema;
mod sync_state;
mod types;

pub use activity::ActivityStore;
pub use db::StoreDb;
pub use posts::PostStore;
pub use profiles::ProfileStore;
pub use sync_state::EngineStateStore;
pub use types::{
    ANALYTICS_CACHE_ID, ActivityKind, CachedAnalytics, Engagement, FollowEdge, Interaction, Post,
    PostCounts, PostKind, Profile, ProfileUpdate, SyncState, SyncStatus,
};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database path error: {0}")]
    Path(String),
}

/// Keyed entity storage consumed by the sync engine and analytics.
pub trait LocalStore: Send + Sync {
    fn get_profile(&self, did: &str) -> Result<Option<Profile>, StoreError>;
    /// Read-merge-write of one profile.
    fn merge_profile(
        &self,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Profile, StoreError>;
    fn all_profiles(&self) -> Result<Vec<Profile>, StoreError>;
    fn followed_profiles(&self) -> Result<Vec<Profile>, StoreError>;
    fn count_profiles(&self) -> Result<usize, StoreError>;
    /// Clear `edge` on every profile not listed in `keep`.
    fn clear_edges_except(
        &self,
        edge: FollowEdge,
        keep: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Insert-once; returns the number of new rows.
    fn put_posts(&self, posts: &[Post]) -> Result<usize, StoreError>;
    fn all_posts(&self) -> Result<Vec<Post>, StoreError>;
    fn count_posts(&self) -> Result<usize, StoreError>;
    fn delete_posts_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    fn put_interaction(&self, interaction: &Interaction) -> Result<(), StoreError>;
    fn all_interactions(&self) -> Result<Vec<Interaction>, StoreError>;
    fn count_interactions(&self) -> Result<usize, StoreError>;
    fn put_engagement(&self, engagement: &Engagement) -> Result<(), StoreError>;
    fn all_engagements(&self) -> Result<Vec<Engagement>, StoreError>;
    fn count_engagements(&self) -> Result<usize, StoreError>;

    fn get_sync_state(&self, key: &str) -> Result<Option<SyncState>, StoreError>;
    fn put_sync_state(&self, state: &SyncState) -> Result<(), StoreError>;
    fn all_sync_states(&self) -> Result<Vec<SyncState>, StoreError>;

    fn get_cached_analytics(&self) -> Result<Option<CachedAnalytics>, StoreError>;
    fn put_cached_analytics(&self, cached: &CachedAnalytics) -> Result<(), StoreError>;
    fn clear_cached_analytics(&self) -> Result<(), StoreError>;

    /// Delete every engine row.
    fn clear_all(&self) -> Result<(), StoreError>;
}

impl LocalStore for StoreDb {
    fn get_profile(&self, did: &str) -> Result<Option<Profile>, StoreError> {
        ProfileStore::new(self).get(did)
    }

    fn merge_profile(
        &self,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Profile, StoreError> {
        ProfileStore::new(self).merge(update, now)
    }

    fn all_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        ProfileStore::new(self).all()
    }

    fn followed_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        ProfileStore::new(self).followed()
    }

    fn count_profiles(&self) -> Result<usize, StoreError> {
        ProfileStore::new(self).count()
    }

    fn clear_edges_except(
        &self,
        edge: FollowEdge,
        keep: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        ProfileStore::new(self).clear_edges_except(edge, keep, now)
    }

    fn put_posts(&self, posts: &[Post]) -> Result<usize, StoreError> {
        PostStore::new(self).insert_batch(posts)
    }

    fn all_posts(&self) -> Result<Vec<Post>, StoreError> {
        PostStore::new(self).all()
    }

    fn count_posts(&self) -> Result<usize, StoreError> {
        PostStore::new(self).count()
    }

    fn delete_posts_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        PostStore::new(self).delete_before(cutoff)
    }

    fn put_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        ActivityStore::new(self).put_interaction(interaction)
    }

    fn all_interactions(&self) -> Result<Vec<Interaction>, StoreError> {
        ActivityStore::new(self).interactions()
    }

    fn count_interactions(&self) -> Result<usize, StoreError> {
        ActivityStore::new(self).count_interactions()
    }

    fn put_engagement(&self, engagement: &Engagement) -> Result<(), StoreError> {
        ActivityStore::new(self).put_engagement(engagement)
    }

    fn all_engagements(&self) -> Result<Vec<Engagement>, StoreError> {
        ActivityStore::new(self).engagements()
    }

    fn count_engagements(&self) -> Result<usize, StoreError> {
        ActivityStore::new(self).count_engagements()
    }

    fn get_sync_state(&self, key: &str) -> Result<Option<SyncState>, StoreError> {
        EngineStateStore::new(self).get(key)
    }

    fn put_sync_state(&self, state: &SyncState) -> Result<(), StoreError> {
        EngineStateStore::new(self).put(state)
    }

    fn all_sync_states(&self) -> Result<Vec<SyncState>, StoreError> {
        EngineStateStore::new(self).all()
    }

    fn get_cached_analytics(&self) -> Result<Option<CachedAnalytics>, StoreError> {
        EngineStateStore::new(self).get_analytics()
    }

    fn put_cached_analytics(&self, cached: &CachedAnalytics) -> Result<(), StoreError> {
        EngineStateStore::new(self).put_analytics(cached)
    }

    fn clear_cached_analytics(&self) -> Result<(), StoreError> {
        EngineStateStore::new(self).clear_analytics()
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        StoreDb::clear_all(self)
    }
}
