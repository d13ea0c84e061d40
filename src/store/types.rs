// SPDX-License-Identifier: MPL-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A locally known account and its relationship to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub follows_you: bool,
    pub you_follow: bool,
    /// Always `follows_you && you_follow`; recomputed on every merge.
    pub is_mutual: bool,
    pub last_updated: DateTime<Utc>,
}

/// Incoming profile data from a graph listing. `None` flags leave the stored
/// value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub follows_you: Option<bool>,
    pub you_follow: Option<bool>,
}

impl Profile {
    /// Merge an update into the stored profile (or create one).
    pub fn merge(
        existing: Option<Profile>,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Profile {
        let now = stored_precision(now);
        let mut profile = existing.unwrap_or_else(|| Profile {
            did: update.did.clone(),
            handle: update.handle.clone(),
            display_name: None,
            avatar: None,
            follows_you: false,
            you_follow: false,
            is_mutual: false,
            last_updated: now,
        });

        if !update.handle.is_empty() {
            profile.handle = update.handle.clone();
        }
        if update.display_name.is_some() {
            profile.display_name = update.display_name.clone();
        }
        if update.avatar.is_some() {
            profile.avatar = update.avatar.clone();
        }
        if let Some(follows_you) = update.follows_you {
            profile.follows_you = follows_you;
        }
        if let Some(you_follow) = update.you_follow {
            profile.you_follow = you_follow;
        }

        profile.is_mutual = profile.follows_you && profile.you_follow;
        profile.last_updated = now;
        profile
    }

    /// Clear or set one follow edge, keeping `is_mutual` consistent.
    pub fn with_edge(mut self, edge: FollowEdge, value: bool, now: DateTime<Utc>) -> Profile {
        match edge {
            FollowEdge::FollowsYou => self.follows_you = value,
            FollowEdge::YouFollow => self.you_follow = value,
        }
        self.is_mutual = self.follows_you && self.you_follow;
        self.last_updated = stored_precision(now);
        self
    }

    pub fn has_edge(&self, edge: FollowEdge) -> bool {
        match edge {
            FollowEdge::FollowsYou => self.follows_you,
            FollowEdge::YouFollow => self.you_follow,
        }
    }

    /// Followed by the user without following back.
    pub fn is_one_way_followed(&self) -> bool {
        self.you_follow && !self.is_mutual
    }
}

// rows keep milliseconds
fn stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// Direction of a follow relationship, relative to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowEdge {
    FollowsYou,
    YouFollow,
}

/// What kind of feed item a stored post is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PostKind {
    Post,
    /// Attributed to the reposting account.
    Repost { reposted_by: String },
    Reply { parent_uri: String },
    Quote { quoted_uri: String },
}

impl PostKind {
    pub fn tag(&self) -> &'static str {
        match self {
            PostKind::Post => "post",
            PostKind::Repost { .. } => "repost",
            PostKind::Reply { .. } => "reply",
            PostKind::Quote { .. } => "quote",
        }
    }

    /// The variant-specific reference (reposter DID, parent or quoted URI).
    pub fn subject(&self) -> Option<&str> {
        match self {
            PostKind::Post => None,
            PostKind::Repost { reposted_by } => Some(reposted_by),
            PostKind::Reply { parent_uri } => Some(parent_uri),
            PostKind::Quote { quoted_uri } => Some(quoted_uri),
        }
    }

    /// Rebuild from the persisted `(tag, subject)` pair.
    pub fn from_parts(tag: &str, subject: Option<String>) -> Option<PostKind> {
        match (tag, subject) {
            ("post", _) => Some(PostKind::Post),
            ("repost", Some(reposted_by)) => Some(PostKind::Repost { reposted_by }),
            ("reply", Some(parent_uri)) => Some(PostKind::Reply { parent_uri }),
            ("quote", Some(quoted_uri)) => Some(PostKind::Quote { quoted_uri }),
            _ => None,
        }
    }
}

/// Engagement counters as seen when the post was fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCounts {
    pub likes: u32,
    pub reposts: u32,
    pub replies: u32,
    pub quotes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub kind: PostKind,
    pub created_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub counts: PostCounts,
    pub fetched_at: DateTime<Utc>,
}

impl Post {
    /// The account whose activity this row represents.
    pub fn contributor(&self) -> &str {
        match &self.kind {
            PostKind::Repost { reposted_by } => reposted_by,
            _ => &self.author_did,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Like,
    Reply,
    Quote,
    Repost,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 4] = [
        ActivityKind::Like,
        ActivityKind::Reply,
        ActivityKind::Quote,
        ActivityKind::Repost,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Like => "like",
            ActivityKind::Reply => "reply",
            ActivityKind::Quote => "quote",
            ActivityKind::Repost => "repost",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(ActivityKind::Like),
            "reply" => Ok(ActivityKind::Reply),
            "quote" => Ok(ActivityKind::Quote),
            "repost" => Ok(ActivityKind::Repost),
            other => Err(format!("unknown activity kind: {other}")),
        }
    }
}

/// The user acting on someone else's post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: ActivityKind,
    pub target_uri: String,
    pub target_author_did: String,
    pub created_at: DateTime<Utc>,
    pub own_post_uri: Option<String>,
}

impl Interaction {
    /// At most one interaction of each kind per target.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.target_uri)
    }
}

/// Another account acting on one of the user's posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub kind: ActivityKind,
    pub target_uri: String,
    pub from_did: String,
    pub from_handle: String,
    pub created_at: DateTime<Utc>,
    pub their_post_uri: Option<String>,
}

impl Engagement {
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.from_did, self.target_uri)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncStatus::Idle),
            "syncing" => Ok(SyncStatus::Syncing),
            "error" => Ok(SyncStatus::Error),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Persisted progress of one sync stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub key: String,
    /// Resume point for an interrupted listing.
    pub cursor: Option<String>,
    /// Completion time of the last successful run.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub items_processed: u64,
    pub status: SyncStatus,
    pub error: Option<String>,
}

impl SyncState {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            cursor: None,
            last_sync_at: None,
            items_processed: 0,
            status: SyncStatus::Idle,
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == SyncStatus::Error
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at
    }

    /// A stage that was interrupted (crash or error) with a saved cursor.
    pub fn resume_cursor(&self) -> Option<&str> {
        match self.status {
            SyncStatus::Syncing | SyncStatus::Error => self.cursor.as_deref(),
            SyncStatus::Idle => None,
        }
    }
}

pub const ANALYTICS_CACHE_ID: &str = "analytics";

/// The single cached analytics row. `payload` is opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAnalytics {
    pub payload: String,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn update(did: &str) -> ProfileUpdate {
        ProfileUpdate {
            did: did.to_string(),
            handle: format!("{did}.test"),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_creates_and_recomputes_mutual() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let followed = ProfileUpdate {
            you_follow: Some(true),
            ..update("a")
        };

        let profile = Profile::merge(None, &followed, now);
        assert!(profile.you_follow);
        assert!(!profile.follows_you);
        assert!(!profile.is_mutual);
        assert!(profile.is_one_way_followed());

        let later = now + Duration::seconds(5);
        let follower = ProfileUpdate {
            follows_you: Some(true),
            display_name: Some("A".into()),
            ..update("a")
        };
        let merged = Profile::merge(Some(profile), &follower, later);

        assert!(merged.you_follow, "flag not in the update is preserved");
        assert!(merged.follows_you);
        assert!(merged.is_mutual);
        assert_eq!(merged.display_name.as_deref(), Some("A"));
        assert_eq!(merged.last_updated.timestamp_millis(), later.timestamp_millis());
        assert_eq!(merged.last_updated.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_merge_keeps_fields_missing_from_update() {
        let now = Utc::now();
        let first = ProfileUpdate {
            display_name: Some("Alice".into()),
            avatar: Some("https://cdn/a.jpg".into()),
            ..update("a")
        };
        let profile = Profile::merge(None, &first, now);

        let sparse = ProfileUpdate {
            did: "a".into(),
            ..Default::default()
        };
        let merged = Profile::merge(Some(profile), &sparse, now);

        assert_eq!(merged.handle, "a.test");
        assert_eq!(merged.display_name.as_deref(), Some("Alice"));
        assert_eq!(merged.avatar.as_deref(), Some("https://cdn/a.jpg"));
    }

    #[test]
    fn test_with_edge_clears_mutual() {
        let now = Utc::now();
        let both = ProfileUpdate {
            you_follow: Some(true),
            follows_you: Some(true),
            ..update("a")
        };
        let profile = Profile::merge(None, &both, now);
        assert!(profile.is_mutual);

        let profile = profile.with_edge(FollowEdge::FollowsYou, false, now);
        assert!(!profile.is_mutual);
        assert!(profile.has_edge(FollowEdge::YouFollow));
        assert!(!profile.has_edge(FollowEdge::FollowsYou));
    }

    #[test]
    fn test_keys_are_composite() {
        let now = Utc::now();
        let interaction = Interaction {
            kind: ActivityKind::Like,
            target_uri: "at://did:plc:b/app.bsky.feed.post/1".into(),
            target_author_did: "did:plc:b".into(),
            created_at: now,
            own_post_uri: None,
        };
        assert_eq!(interaction.key(), "like:at://did:plc:b/app.bsky.feed.post/1");

        let engagement = Engagement {
            kind: ActivityKind::Reply,
            target_uri: "at://did:plc:me/app.bsky.feed.post/1".into(),
            from_did: "did:plc:c".into(),
            from_handle: "c.test".into(),
            created_at: now,
            their_post_uri: Some("at://did:plc:c/app.bsky.feed.post/9".into()),
        };
        assert_eq!(
            engagement.key(),
            "reply:did:plc:c:at://did:plc:me/app.bsky.feed.post/1"
        );
    }

    #[test]
    fn test_post_kind_parts_and_contributor() {
        for kind in [
            PostKind::Post,
            PostKind::Repost {
                reposted_by: "did:plc:r".into(),
            },
            PostKind::Reply {
                parent_uri: "at://p".into(),
            },
            PostKind::Quote {
                quoted_uri: "at://q".into(),
            },
        ] {
            let rebuilt = PostKind::from_parts(kind.tag(), kind.subject().map(String::from));
            assert_eq!(rebuilt.as_ref(), Some(&kind));
        }
        assert_eq!(PostKind::from_parts("repost", None), None);

        let now = Utc::now();
        let repost = Post {
            uri: "at://did:plc:r/app.bsky.feed.repost/1".into(),
            cid: "c".into(),
            author_did: "did:plc:orig".into(),
            kind: PostKind::Repost {
                reposted_by: "did:plc:r".into(),
            },
            created_at: now,
            indexed_at: now,
            counts: PostCounts::default(),
            fetched_at: now,
        };
        assert_eq!(repost.contributor(), "did:plc:r");
    }

    #[test]
    fn test_resume_cursor_only_when_interrupted() {
        let mut state = SyncState::new("follows");
        state.cursor = Some("c3".into());
        assert_eq!(state.resume_cursor(), None);

        state.status = SyncStatus::Error;
        assert_eq!(state.resume_cursor(), Some("c3"));
        assert!(state.is_failed());

        state.status = SyncStatus::Syncing;
        assert_eq!(state.resume_cursor(), Some("c3"));
        assert_eq!("syncing".parse::<SyncStatus>(), Ok(SyncStatus::Syncing));
    }
}
