// SPDX-License-Identifier: MPL-2.0

//! Sync a small fake network into an in-memory store, then score it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use atrium_api::types::LimitedU32;
use atrium_api::types::string::Tid;
use chrono::{DateTime, Duration, Utc};

use rapport::analytics::{AnalyticsCache, AnalyticsEngine, noise_outliers, one_sided};
use rapport::atproto::{
    AuthorFeedFilter, ClientError, FeedViewPost, LikeView, Page, PostThread, PostView,
    ProfileView, SocialApi,
};
use rapport::store::{LocalStore, StoreDb, SyncStatus};
use rapport::sync::{StageKey, SyncOrchestrator, stage_states};

const ME: &str = "did:plc:me";
const ALICE: &str = "did:plc:alice";
const BOB: &str = "did:plc:bob";
const CAROL: &str = "did:plc:carol";
const MY_POST: &str = "at://did:plc:me/app.bsky.feed.post/p1";
const BOB_1: &str = "at://did:plc:bob/app.bsky.feed.post/b1";
const BOB_2: &str = "at://did:plc:bob/app.bsky.feed.post/b2";

fn handle(did: &str) -> String {
    format!("{}.test", did.rsplit(':').next().unwrap_or(did))
}

fn ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

fn profile(did: &str) -> ProfileView {
    ProfileView::minimal(did, handle(did))
}

fn post(uri: &str, author: &str, hours_ago: i64) -> PostView {
    PostView {
        uri: uri.to_string(),
        cid: "bafy".into(),
        author: profile(author),
        created_at: Some(ago(hours_ago)),
        indexed_at: ago(hours_ago),
        ..Default::default()
    }
}

fn counted(mut post: PostView, likes: u32, replies: u32) -> PostView {
    post.like_count = Some(likes);
    post.reply_count = Some(replies);
    post.repost_count = Some(0);
    post.quote_count = Some(0);
    post
}

fn liked_by_me(mut post: PostView, hours_ago: i64) -> PostView {
    let tid = Tid::from_datetime(LimitedU32::try_from(0).unwrap(), ago(hours_ago));
    post.viewer_like = Some(format!("at://{ME}/app.bsky.feed.like/{}", tid.as_str()));
    post
}

fn item(post: PostView) -> FeedViewPost {
    FeedViewPost {
        post,
        ..Default::default()
    }
}

fn like(actor: &str, hours_ago: i64) -> LikeView {
    LikeView {
        actor: profile(actor),
        created_at: ago(hours_ago),
    }
}

fn single<T: Clone>(items: &[T]) -> Page<T> {
    Page::new(items.to_vec(), None)
}

/// Alice posts a lot and never hears from the user. Bob is mutual and the
/// user likes and replies to everything he posts. Carol only follows the
/// user and liked their post.
struct Network {
    feeds: HashMap<String, Vec<FeedViewPost>>,
    liked: Vec<FeedViewPost>,
    likes: Vec<LikeView>,
    replies: Vec<PostView>,
}

impl Network {
    fn new() -> Self {
        let mut feeds = HashMap::new();
        feeds.insert(
            ALICE.to_string(),
            (1..=4)
                .map(|n| {
                    item(post(
                        &format!("at://did:plc:alice/app.bsky.feed.post/a{n}"),
                        ALICE,
                        n,
                    ))
                })
                .collect(),
        );
        feeds.insert(
            BOB.to_string(),
            vec![item(post(BOB_1, BOB, 2)), item(post(BOB_2, BOB, 6))],
        );

        let my_post = counted(post(MY_POST, ME, 12), 2, 1);
        let mut my_reply = counted(post("at://did:plc:me/app.bsky.feed.post/p2", ME, 1), 0, 0);
        my_reply.reply_parent = Some(BOB_1.into());
        feeds.insert(ME.to_string(), vec![item(my_reply), item(my_post)]);

        let mut bob_reply = post("at://did:plc:bob/app.bsky.feed.post/b3", BOB, 10);
        bob_reply.reply_parent = Some(MY_POST.into());

        Self {
            feeds,
            liked: vec![
                item(liked_by_me(post(BOB_1, BOB, 2), 1)),
                item(liked_by_me(post(BOB_2, BOB, 6), 5)),
            ],
            likes: vec![like(BOB, 11), like(CAROL, 9)],
            replies: vec![bob_reply],
        }
    }
}

#[async_trait]
impl SocialApi for Network {
    async fn get_profile(&self, actor: &str) -> Result<ProfileView, ClientError> {
        Ok(profile(actor))
    }

    async fn get_follows(
        &self,
        _actor: &str,
        _limit: u32,
        _cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError> {
        Ok(single(&[profile(ALICE), profile(BOB)]))
    }

    async fn get_followers(
        &self,
        _actor: &str,
        _limit: u32,
        _cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError> {
        Ok(single(&[profile(BOB), profile(CAROL)]))
    }

    async fn get_author_feed(
        &self,
        actor: &str,
        _limit: u32,
        _cursor: Option<String>,
        _filter: AuthorFeedFilter,
    ) -> Result<Page<FeedViewPost>, ClientError> {
        Ok(single(self.feeds.get(actor).map(Vec::as_slice).unwrap_or_default()))
    }

    async fn get_actor_likes(
        &self,
        _actor: &str,
        _limit: u32,
        _cursor: Option<String>,
    ) -> Result<Page<FeedViewPost>, ClientError> {
        Ok(single(&self.liked))
    }

    async fn get_likes(
        &self,
        uri: &str,
        _limit: u32,
        _cursor: Option<String>,
    ) -> Result<Page<LikeView>, ClientError> {
        assert_eq!(uri, MY_POST);
        Ok(single(&self.likes))
    }

    async fn get_reposted_by(
        &self,
        _uri: &str,
        _limit: u32,
        _cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError> {
        panic!("post has no reposts");
    }

    async fn get_quotes(
        &self,
        _uri: &str,
        _limit: u32,
        _cursor: Option<String>,
    ) -> Result<Page<PostView>, ClientError> {
        panic!("post has no quotes");
    }

    async fn get_post_thread(
        &self,
        uri: &str,
        _depth: u16,
        _parent_height: u16,
    ) -> Result<PostThread, ClientError> {
        assert_eq!(uri, MY_POST);
        Ok(PostThread {
            post: None,
            replies: self.replies.clone(),
        })
    }
}

#[tokio::test]
async fn test_sync_then_score_relationships() {
    let store = Arc::new(StoreDb::open_in_memory(ME).unwrap());
    let engine = AnalyticsEngine::new(store.clone(), ME);
    let cache = Arc::new(AnalyticsCache::new(
        engine,
        store.clone(),
        std::time::Duration::from_secs(900),
    ));
    let orchestrator = SyncOrchestrator::new(Arc::new(Network::new()), store.clone(), ME)
        .with_analytics(cache.clone());

    let report = orchestrator.full_sync().await.unwrap();
    assert_eq!(report.total_failed(), 0);
    assert!(
        stage_states(store.as_ref())
            .unwrap()
            .iter()
            .all(|s| s.status == SyncStatus::Idle && s.last_success().is_some())
    );

    // 4 + 2 followed posts, plus the user's post and reply.
    assert_eq!(store.count_posts().unwrap(), 8);
    // 2 likes and 1 reply to Bob.
    assert_eq!(store.count_interactions().unwrap(), 3);
    // Likes from Bob and Carol, reply from Bob.
    assert_eq!(store.count_engagements().unwrap(), 3);

    let snapshot = cache.get_analytics().unwrap();

    let noise: Vec<(&str, f64)> = snapshot
        .noise_scores
        .iter()
        .map(|s| (s.did.as_str(), s.score))
        .collect();
    assert_eq!(noise, vec![(ALICE, 1.0), (BOB, 0.0)]);
    let alice = &snapshot.noise_scores[0];
    assert_eq!(alice.volume_percentile, 1.0);
    assert_eq!(alice.handle.as_deref(), Some("alice.test"));
    assert!(snapshot.noise_scores[1].is_mutual);

    let carol = &snapshot.reciprocity_scores[0];
    assert_eq!(carol.did, CAROL);
    assert_eq!((carol.your_total, carol.their_total), (0, 1));
    assert_eq!(carol.score, 1.0);
    let bob = &snapshot.reciprocity_scores[1];
    assert_eq!((bob.your_total, bob.their_total), (3, 2));
    assert!((bob.score - 0.4).abs() < 1e-9);
    assert!(!bob.balanced);

    let noisy = noise_outliers(snapshot.noise_scores.clone(), 0.7);
    assert_eq!(noisy.len(), 1);
    assert_eq!(noisy[0].did, ALICE);
    let lopsided = one_sided(snapshot.reciprocity_scores.clone(), 0.5);
    assert_eq!(lopsided.len(), 1);
    assert_eq!(lopsided[0].did, BOB);

    assert_eq!(cache.get_analytics().unwrap(), snapshot);

    orchestrator.incremental_sync().await.unwrap();
    assert!(store.get_cached_analytics().unwrap().is_none());
    let recomputed = cache.get_analytics().unwrap();
    assert!(recomputed.computed_at >= snapshot.computed_at);
    assert_eq!(recomputed.noise_scores, snapshot.noise_scores);

    let follows = store
        .get_sync_state(StageKey::Follows.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(follows.items_processed, 2);
}
