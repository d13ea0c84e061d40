// SPDX-License-Identifier: MPL-2.0

//! The slice of Bluesky's views the sync engine reads.
//!
//! Built from atrium's lexicon types in [`lexicon`](super::lexicon); nothing
//! outside `atproto` touches atrium directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decoupled from atrium's internal representation so we own the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
    /// Base URL of the account's PDS; authenticated calls go here.
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_service() -> String {
    crate::config::DEFAULT_PDS.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileView {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileView {
    pub fn minimal(did: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            handle: handle.into(),
            ..Default::default()
        }
    }
}

/// The record a post embeds as a quote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotedPost {
    pub uri: String,
    /// Known only when the AppView hydrated the quoted record.
    pub author_did: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileView,
    /// `createdAt` of the post record, when it parses.
    pub created_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
    /// Parent of the post record's reply reference.
    pub reply_parent: Option<String>,
    pub quoted: Option<QuotedPost>,
    pub like_count: Option<u32>,
    pub repost_count: Option<u32>,
    pub reply_count: Option<u32>,
    pub quote_count: Option<u32>,
    /// URI of the viewer's like record, if the viewer liked this post.
    pub viewer_like: Option<String>,
}

impl PostView {
    /// Record creation time, falling back to indexing time.
    pub fn posted_at(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or(self.indexed_at)
    }
}

/// `app.bsky.feed.defs#reasonRepost`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepostReason {
    pub by: ProfileView,
    /// The repost record; older AppViews omit it.
    pub uri: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedViewPost {
    pub post: PostView,
    pub repost: Option<RepostReason>,
    /// Author of the post this one replies to, from the hydrated reply context.
    pub reply_parent_author: Option<String>,
}

impl FeedViewPost {
    /// Timestamp feeds are ordered by: repost time for reposts, otherwise the
    /// post's own time.
    pub fn sort_time(&self) -> DateTime<Utc> {
        self.repost
            .as_ref()
            .map(|r| r.indexed_at)
            .unwrap_or_else(|| self.post.posted_at())
    }
}

/// `app.bsky.feed.getLikes#like`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikeView {
    pub actor: ProfileView,
    pub created_at: DateTime<Utc>,
}

/// A post with its visible direct replies. Not-found and blocked nodes are
/// dropped during conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostThread {
    pub post: Option<PostView>,
    pub replies: Vec<PostView>,
}

/// Extract the repository DID from an `at://` URI.
pub fn did_from_at_uri(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("at://")?;
    let authority = rest.split('/').next()?;
    authority.starts_with("did:").then_some(authority)
}

/// Record key (last path segment) of an `at://` URI.
pub fn rkey_from_at_uri(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let (_authority, _collection) = (parts.next()?, parts.next()?);
    parts.next().filter(|rkey| !rkey.is_empty())
}

const S32_ALPHABET: &[u8] = b"234567abcdefghijklmnopqrstuvwxyz";

/// Creation time encoded in a TID record key.
///
/// A TID is 13 base32-sortable characters holding a 64-bit value: a zero
/// top bit, 53 bits of microseconds since the epoch, then 10 bits of clock id.
pub fn tid_timestamp(rkey: &str) -> Option<DateTime<Utc>> {
    let tid = atrium_api::types::string::Tid::new(rkey.to_string()).ok()?;
    let mut value: u64 = 0;
    for byte in tid.as_str().bytes() {
        let digit = S32_ALPHABET.iter().position(|&c| c == byte)? as u64;
        value = (value << 5) | digit;
    }
    let micros = i64::try_from(value >> 10).ok()?;
    DateTime::from_timestamp_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_api::types::LimitedU32;
    use atrium_api::types::string::Tid;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_did_from_at_uri() {
        assert_eq!(
            did_from_at_uri("at://did:plc:abc123/app.bsky.feed.post/3k2a"),
            Some("did:plc:abc123")
        );
        assert_eq!(did_from_at_uri("at://alice.bsky.social/app.bsky.feed.post/1"), None);
        assert_eq!(did_from_at_uri("https://bsky.app"), None);
    }

    #[test]
    fn test_rkey_from_at_uri() {
        assert_eq!(
            rkey_from_at_uri("at://did:plc:me/app.bsky.feed.like/3l5xyzabc2222"),
            Some("3l5xyzabc2222")
        );
        assert_eq!(rkey_from_at_uri("at://did:plc:me/app.bsky.feed.like"), None);
        assert_eq!(rkey_from_at_uri("at://did:plc:me/app.bsky.feed.like/"), None);
    }

    #[test]
    fn test_tid_timestamp_reads_back_generated_tid() {
        let at = Utc.with_ymd_and_hms(2024, 11, 3, 9, 30, 0).unwrap() + Duration::microseconds(42);
        let clock = LimitedU32::try_from(7).unwrap();
        let tid = Tid::from_datetime(clock, at);

        assert_eq!(tid_timestamp(tid.as_str()), Some(at));
    }

    #[test]
    fn test_tid_timestamp_rejects_other_keys() {
        assert_eq!(tid_timestamp("self"), None);
        assert_eq!(tid_timestamp("p1"), None);
        assert_eq!(tid_timestamp("zzzzzzzzzzzzz"), None);
    }

    #[test]
    fn test_sort_time_prefers_repost_time() {
        let posted = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let reposted = Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap();
        let mut item = FeedViewPost {
            post: PostView {
                uri: "at://did:plc:orig/app.bsky.feed.post/1".into(),
                author: ProfileView::minimal("did:plc:orig", "orig.test"),
                created_at: Some(posted),
                indexed_at: posted + Duration::seconds(1),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(item.sort_time(), posted);

        item.repost = Some(RepostReason {
            by: ProfileView::minimal("did:plc:bob", "bob.test"),
            uri: None,
            indexed_at: reposted,
        });
        assert_eq!(item.sort_time(), reposted);
    }

    #[test]
    fn test_posted_at_falls_back_to_indexed_at() {
        let indexed = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let view = PostView {
            indexed_at: indexed,
            ..Default::default()
        };
        assert_eq!(view.posted_at(), indexed);
    }
}
