// SPDX-License-Identifier: MPL-2.0

//! Staged sync runs.
//!
//! Each stage moves its SyncState row `idle -> syncing -> idle | error`,
//! recording `syncing` before any network call so an interrupted run leaves
//! inspectable state behind. Stages run in [`StageKey::ORDER`]; a failing
//! stage is recorded, then re-raised, and the rest of the run is skipped.

use crate::analytics::AnalyticsCache;
use crate::atproto::pagination::ignore_progress;
use crate::atproto::{
    AuthorFeedFilter, FeedViewPost, Page, PageProgress, ProfileView, SocialApi, fetch_all_pages,
    fetch_pages_until,
};
use crate::store::{
    ActivityKind, Engagement, FollowEdge, LocalStore, Post, StoreError, SyncState, SyncStatus,
};
use crate::sync::batch::{BatchSummary, run_batched, successful_items};
use crate::sync::convert;
use crate::sync::progress::{ProgressCallback, SyncProgress};
use crate::sync::types::{StageKey, StageReport, SyncMode, SyncOptions, SyncReport};
use crate::sync::SyncError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Thread fetch for reply engagements: direct replies only, no parents.
const THREAD_DEPTH: u16 = 1;
const THREAD_PARENT_HEIGHT: u16 = 0;

/// Stage rows in execution order; stages that never ran show as idle.
pub fn stage_states(store: &dyn LocalStore) -> Result<Vec<SyncState>, StoreError> {
    StageKey::ORDER
        .iter()
        .map(|stage| {
            let key = stage.as_str();
            Ok(store
                .get_sync_state(key)?
                .unwrap_or_else(|| SyncState::new(key)))
        })
        .collect()
}

/// Drives sync runs for one account.
pub struct SyncOrchestrator {
    api: Arc<dyn SocialApi>,
    store: Arc<dyn LocalStore>,
    account_did: String,
    options: SyncOptions,
    analytics: Option<Arc<AnalyticsCache>>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SyncError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One sub-resource fetch for one of the user's posts.
#[derive(Debug, Clone)]
struct EngagementTask {
    post_uri: String,
    kind: ActivityKind,
    posted_at: DateTime<Utc>,
}

impl EngagementTask {
    /// Tasks for every sub-resource the post's counters don't rule out.
    fn for_post(item: &FeedViewPost) -> Vec<EngagementTask> {
        let view = &item.post;
        let posted_at = view.posted_at();
        let may_have = |count: Option<u32>| count.is_none_or(|c| c > 0);

        [
            (ActivityKind::Like, view.like_count),
            (ActivityKind::Repost, view.repost_count),
            (ActivityKind::Quote, view.quote_count),
            (ActivityKind::Reply, view.reply_count),
        ]
        .into_iter()
        .filter(|(_, count)| may_have(*count))
        .map(|(kind, _)| EngagementTask {
            post_uri: view.uri.clone(),
            kind,
            posted_at,
        })
        .collect()
    }

    fn label(&self) -> String {
        format!("{} of {}", self.kind, self.post_uri)
    }
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn SocialApi>,
        store: Arc<dyn LocalStore>,
        account_did: impl Into<String>,
    ) -> Self {
        Self {
            api,
            store,
            account_did: account_did.into(),
            options: SyncOptions::default(),
            analytics: None,
            progress: None,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Cache to invalidate after a successful run.
    pub fn with_analytics(mut self, cache: Arc<AnalyticsCache>) -> Self {
        self.analytics = Some(cache);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Checked before every stage. Share it with the API client so waits and
    /// in-flight calls abort too.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// All stages over the configured window, then retention eviction.
    pub async fn full_sync(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncMode::Full).await
    }

    /// All stages over the short incremental lookback. No eviction.
    pub async fn incremental_sync(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncMode::Incremental).await
    }

    pub fn status(&self) -> Result<Vec<SyncState>, SyncError> {
        Ok(stage_states(self.store.as_ref())?)
    }

    /// Drop cached analytics so the next read reflects the store.
    pub fn invalidate(&self) -> Result<(), SyncError> {
        match &self.analytics {
            Some(cache) => cache.invalidate()?,
            None => self.store.clear_cached_analytics()?,
        }
        Ok(())
    }

    async fn run(&self, mode: SyncMode) -> Result<SyncReport, SyncError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started_at = Utc::now();
        let since = started_at - self.options.window_for(mode);

        tracing::info!(%mode, account = %self.account_did, %since, "sync started");

        let mut stages = Vec::with_capacity(StageKey::ORDER.len());
        for stage in StageKey::ORDER {
            if self.cancel.is_cancelled() {
                tracing::info!(%stage, "sync cancelled before stage");
                return Err(SyncError::Cancelled);
            }
            stages.push(self.run_stage(stage, since).await?);
        }

        let evicted = match mode {
            SyncMode::Full => self.evict(started_at)?,
            SyncMode::Incremental => 0,
        };
        self.invalidate()?;

        let report = SyncReport {
            mode,
            stages,
            evicted,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            %mode,
            items = report.total_items(),
            failed_items = report.total_failed(),
            evicted,
            "sync finished"
        );
        Ok(report)
    }

    async fn run_stage(
        &self,
        stage: StageKey,
        since: DateTime<Utc>,
    ) -> Result<StageReport, SyncError> {
        let key = stage.as_str();
        let mut state = self
            .store
            .get_sync_state(key)?
            .unwrap_or_else(|| SyncState::new(key));
        let resume = state.resume_cursor().map(String::from);

        state.status = SyncStatus::Syncing;
        state.error = None;
        self.store.put_sync_state(&state)?;

        self.emit(SyncProgress::StageStarted { stage });
        tracing::info!(%stage, resuming = resume.is_some(), "stage started");

        let result = match stage {
            StageKey::Follows => self.sync_graph(stage, FollowEdge::YouFollow, resume).await,
            StageKey::Followers => self.sync_graph(stage, FollowEdge::FollowsYou, resume).await,
            StageKey::Timeline => self.sync_timeline(since).await,
            StageKey::Likes => self.sync_likes(since).await,
            StageKey::MyPosts => self.sync_my_posts(since).await,
        }
        .map_err(SyncError::normalize);

        match result {
            Ok(report) => {
                self.finish_stage(stage, &report)?;
                Ok(report)
            }
            Err(e) => {
                self.fail_stage(stage, &e);
                Err(e)
            }
        }
    }

    fn finish_stage(&self, stage: StageKey, report: &StageReport) -> Result<(), SyncError> {
        let key = stage.as_str();
        let mut state = self
            .store
            .get_sync_state(key)?
            .unwrap_or_else(|| SyncState::new(key));
        state.status = SyncStatus::Idle;
        state.cursor = None;
        state.error = None;
        state.last_sync_at = Some(Utc::now());
        state.items_processed = report.items;
        self.store.put_sync_state(&state)?;

        self.emit(SyncProgress::StageCompleted {
            stage,
            items: report.items,
        });
        tracing::info!(
            %stage,
            items = report.items,
            succeeded = report.succeeded,
            failed = report.failed,
            "stage finished"
        );
        Ok(())
    }

    /// Record the failure; the cursor is kept so the next run resumes.
    fn fail_stage(&self, stage: StageKey, error: &SyncError) {
        let key = stage.as_str();
        let message = error.to_string();
        tracing::error!(%stage, error = %message, "stage failed");

        let recorded = self.store.get_sync_state(key).and_then(|state| {
            let mut state = state.unwrap_or_else(|| SyncState::new(key));
            state.status = SyncStatus::Error;
            state.error = Some(message.clone());
            self.store.put_sync_state(&state)
        });
        if let Err(e) = recorded {
            tracing::error!(%stage, error = %e, "could not record stage failure");
        }

        self.emit(SyncProgress::StageFailed {
            stage,
            error: message,
        });
    }

    /// Follows or followers. Every page is applied before its cursor is
    /// checkpointed. A listing read from the first page to the end also
    /// clears the edge on accounts that no longer appear.
    async fn sync_graph(
        &self,
        stage: StageKey,
        edge: FollowEdge,
        resume: Option<String>,
    ) -> Result<StageReport, SyncError> {
        let account = self.account_did.as_str();
        let limit = self.options.page_limit;
        let complete_listing = resume.is_none();
        let now = Utc::now();

        let dids = fetch_all_pages(
            resume,
            move |cursor| async move {
                let page = match edge {
                    FollowEdge::YouFollow => self.api.get_follows(account, limit, cursor).await?,
                    FollowEdge::FollowsYou => {
                        self.api.get_followers(account, limit, cursor).await?
                    }
                };
                for view in page.items.iter().filter(|v| v.did != account) {
                    self.store
                        .merge_profile(&convert::profile_update(view, edge), now)?;
                }
                Ok::<_, SyncError>(page)
            },
            |page: Page<ProfileView>| page.items.into_iter().map(|v| v.did).collect(),
            |page: &Page<ProfileView>| page.cursor.clone(),
            &|progress: &PageProgress<'_>| self.checkpoint(stage, progress),
        )
        .await?;

        let fetched = dids.len() as u64;
        if complete_listing {
            let keep: HashSet<String> = dids.into_iter().collect();
            let cleared = self.store.clear_edges_except(edge, &keep, now)?;
            if cleared > 0 {
                tracing::info!(%stage, cleared, "cleared stale follow edges");
            }
        }

        Ok(StageReport::new(stage, fetched))
    }

    /// Recent posts of every followed account, in concurrent batches.
    async fn sync_timeline(&self, since: DateTime<Utc>) -> Result<StageReport, SyncError> {
        let stage = StageKey::Timeline;
        let followed = self.store.followed_profiles()?;
        tracing::debug!(accounts = followed.len(), "fetching followed feeds");

        let outcomes = run_batched(
            &followed,
            self.options.batch_size,
            |profile| profile.handle.clone(),
            |profile| self.sync_account_feed(profile.did.clone(), since),
            &|batch, batches, summary| self.batch_progress(stage, batch, batches, summary),
        )
        .await?;

        let summary = BatchSummary::of(&outcomes);
        Ok(StageReport {
            stage,
            items: successful_items(&outcomes),
            succeeded: summary.succeeded,
            failed: summary.failed,
        })
    }

    async fn sync_account_feed(
        &self,
        did: String,
        since: DateTime<Utc>,
    ) -> Result<usize, SyncError> {
        let feed = self.fetch_feed(&did, since, None).await?;
        let now = Utc::now();
        let posts: Vec<Post> = feed
            .iter()
            .map(|item| convert::post_from_feed(item, now))
            .collect();
        Ok(self.store.put_posts(&posts)?)
    }

    /// The user's own likes, as like interactions. The listing runs newest
    /// like first, so pages are bounded by when each like was made.
    async fn sync_likes(&self, since: DateTime<Utc>) -> Result<StageReport, SyncError> {
        let stage = StageKey::Likes;
        let account = self.account_did.as_str();
        let limit = self.options.page_limit;

        let liked = fetch_pages_until(
            move |cursor| self.api.get_actor_likes(account, limit, cursor),
            |page: Page<FeedViewPost>| page.items,
            |page: &Page<FeedViewPost>| page.cursor.clone(),
            convert::liked_at,
            since,
            &|progress: &PageProgress<'_>| self.page_progress(stage, progress),
        )
        .await?;

        let mut written = 0u64;
        for interaction in liked
            .iter()
            .filter_map(|item| convert::like_interaction(item, account))
        {
            self.store.put_interaction(&interaction)?;
            written += 1;
        }

        Ok(StageReport::new(stage, written))
    }

    /// The user's own feed: own posts, outbound interactions, then the
    /// engagement each own post received.
    async fn sync_my_posts(&self, since: DateTime<Utc>) -> Result<StageReport, SyncError> {
        let stage = StageKey::MyPosts;
        let account = self.account_did.as_str();
        let feed = self.fetch_feed(account, since, Some(stage)).await?;
        let now = Utc::now();

        let posts: Vec<Post> = feed
            .iter()
            .map(|item| convert::post_from_feed(item, now))
            .collect();
        let mut items = self.store.put_posts(&posts)? as u64;

        for interaction in feed
            .iter()
            .flat_map(|item| convert::outbound_interactions(item, account))
        {
            self.store.put_interaction(&interaction)?;
            items += 1;
        }

        let tasks: Vec<EngagementTask> = feed
            .iter()
            .filter(|item| convert::is_own_original(item, account))
            .flat_map(EngagementTask::for_post)
            .collect();
        tracing::debug!(tasks = tasks.len(), "fetching engagement on own posts");

        let outcomes = run_batched(
            &tasks,
            self.options.batch_size,
            EngagementTask::label,
            |task| self.sync_engagement(task.clone()),
            &|batch, batches, summary| self.batch_progress(stage, batch, batches, summary),
        )
        .await?;

        let summary = BatchSummary::of(&outcomes);
        Ok(StageReport {
            stage,
            items: items + successful_items(&outcomes),
            succeeded: summary.succeeded,
            failed: summary.failed,
        })
    }

    async fn sync_engagement(&self, task: EngagementTask) -> Result<usize, SyncError> {
        let account = self.account_did.as_str();
        let uri = task.post_uri.as_str();

        let engagements: Vec<Engagement> = match task.kind {
            ActivityKind::Like => self
                .api
                .get_all_likes(uri, &ignore_progress)
                .await?
                .iter()
                .filter_map(|like| convert::like_engagement(uri, like, account))
                .collect(),
            ActivityKind::Repost => self
                .api
                .get_all_reposted_by(uri, &ignore_progress)
                .await?
                .iter()
                .filter_map(|actor| {
                    convert::repost_engagement(uri, actor, task.posted_at, account)
                })
                .collect(),
            ActivityKind::Quote => self
                .api
                .get_all_quotes(uri, &ignore_progress)
                .await?
                .iter()
                .filter_map(|quote| {
                    convert::post_engagement(ActivityKind::Quote, uri, quote, account)
                })
                .collect(),
            ActivityKind::Reply => self
                .api
                .get_post_thread(uri, THREAD_DEPTH, THREAD_PARENT_HEIGHT)
                .await?
                .replies
                .iter()
                .filter_map(|reply| {
                    convert::post_engagement(ActivityKind::Reply, uri, reply, account)
                })
                .collect(),
        };

        for engagement in &engagements {
            self.store.put_engagement(engagement)?;
        }
        Ok(engagements.len())
    }

    /// Author feed newer than `since`; page events go to `stage` if given.
    async fn fetch_feed(
        &self,
        actor: &str,
        since: DateTime<Utc>,
        stage: Option<StageKey>,
    ) -> Result<Vec<FeedViewPost>, SyncError> {
        let limit = self.options.page_limit;
        let on_page = |progress: &PageProgress<'_>| {
            if let Some(stage) = stage {
                self.page_progress(stage, progress);
            }
        };

        let feed = fetch_pages_until(
            move |cursor| {
                self.api
                    .get_author_feed(actor, limit, cursor, AuthorFeedFilter::PostsWithReplies)
            },
            |page: Page<FeedViewPost>| page.items,
            |page: &Page<FeedViewPost>| page.cursor.clone(),
            convert::feed_item_time,
            since,
            &on_page,
        )
        .await?;
        Ok(feed)
    }

    /// Posts created before the retention horizon are dropped.
    fn evict(&self, now: DateTime<Utc>) -> Result<usize, SyncError> {
        let cutoff = now - self.options.retention;
        let evicted = self.store.delete_posts_before(cutoff)?;
        if evicted > 0 {
            tracing::info!(evicted, %cutoff, "evicted posts past retention");
        }
        Ok(evicted)
    }

    fn page_progress(&self, stage: StageKey, progress: &PageProgress<'_>) {
        tracing::debug!(
            %stage,
            page = progress.page,
            count = progress.page_items,
            total = progress.total_items,
            "page applied"
        );
        self.emit(SyncProgress::PageFetched {
            stage,
            page: progress.page,
            count: progress.page_items,
            total_so_far: progress.total_items,
        });
    }

    /// Page event plus a cursor checkpoint for resumable listings.
    fn checkpoint(&self, stage: StageKey, progress: &PageProgress<'_>) {
        self.page_progress(stage, progress);

        let key = stage.as_str();
        let saved = self.store.get_sync_state(key).and_then(|state| {
            let mut state = state.unwrap_or_else(|| SyncState::new(key));
            state.cursor = progress.cursor.map(String::from);
            state.items_processed = progress.total_items as u64;
            self.store.put_sync_state(&state)
        });
        if let Err(e) = saved {
            tracing::warn!(%stage, error = %e, "could not checkpoint cursor");
        }
    }

    fn batch_progress(&self, stage: StageKey, batch: usize, batches: usize, summary: BatchSummary) {
        tracing::debug!(
            %stage,
            batch,
            batches,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch finished"
        );
        self.emit(SyncProgress::BatchCompleted {
            stage,
            batch,
            batches,
            succeeded: summary.succeeded,
            failed: summary.failed,
        });
    }

    fn emit(&self, event: SyncProgress) {
        if let Some(callback) = &self.progress {
            callback(event);
        }
    }
}
