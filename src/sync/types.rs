// SPDX-License-Identifier: MPL-2.0

//! Shared sync types and defaults.

use crate::atproto::MAX_PAGE_LIMIT;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Accounts fetched concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Lookback for a full sync.
pub const DEFAULT_DAYS_BACK: i64 = 30;

/// Lookback for an incremental sync.
pub const INCREMENTAL_DAYS_BACK: i64 = 1;

/// Posts older than this are evicted after a full sync.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// One independently resumable phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKey {
    Follows,
    Followers,
    Timeline,
    Likes,
    MyPosts,
}

impl StageKey {
    /// Execution order: the graph first, the user's own posts last.
    pub const ORDER: [StageKey; 5] = [
        StageKey::Follows,
        StageKey::Followers,
        StageKey::Timeline,
        StageKey::Likes,
        StageKey::MyPosts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKey::Follows => "follows",
            StageKey::Followers => "followers",
            StageKey::Timeline => "timeline",
            StageKey::Likes => "likes",
            StageKey::MyPosts => "my-posts",
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        })
    }
}

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Concurrent fetches per batch.
    pub batch_size: usize,
    /// Only collect activity newer than this on a full sync.
    pub window: Duration,
    /// Lookback used by incremental syncs.
    pub incremental_window: Duration,
    /// Posts created before `now - retention` are evicted after a full sync.
    pub retention: Duration,
    /// `limit` sent on every list call.
    pub page_limit: u32,
}

impl SyncOptions {
    /// Lookback shared by the timeline, likes and my-posts stages of a run.
    /// Graph stages are not time-bounded.
    pub fn window_for(&self, mode: SyncMode) -> Duration {
        match mode {
            SyncMode::Full => self.window,
            SyncMode::Incremental => self.incremental_window,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            window: Duration::days(DEFAULT_DAYS_BACK),
            incremental_window: Duration::days(INCREMENTAL_DAYS_BACK),
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
            page_limit: MAX_PAGE_LIMIT,
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: StageKey,
    /// Items written to the store.
    pub items: u64,
    /// Fan-out tasks that completed (0 for stages without fan-out).
    pub succeeded: usize,
    /// Fan-out tasks that failed and were skipped.
    pub failed: usize,
}

impl StageReport {
    pub fn new(stage: StageKey, items: u64) -> Self {
        Self {
            stage,
            items,
            succeeded: 0,
            failed: 0,
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub stages: Vec<StageReport>,
    /// Posts removed by retention eviction.
    pub evicted: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn total_items(&self) -> u64 {
        self.stages.iter().map(|s| s.items).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_follows_the_mode() {
        let options = SyncOptions {
            window: Duration::days(14),
            ..Default::default()
        };
        assert_eq!(options.window_for(SyncMode::Full), Duration::days(14));
        assert_eq!(
            options.window_for(SyncMode::Incremental),
            Duration::days(INCREMENTAL_DAYS_BACK)
        );
    }
}
