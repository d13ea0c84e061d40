// SPDX-License-Identifier: MPL-2.0

//! Conversions from atrium's lexicon views into our own types.

use atrium_api::app::bsky::{actor, embed, feed};
use atrium_api::types::{Union, Unknown};
use chrono::{DateTime, Utc};

use super::types::{FeedViewPost, LikeView, PostThread, PostView, ProfileView, QuotedPost, RepostReason};

const POST_COLLECTION: &str = "/app.bsky.feed.post/";

fn utc(dt: &atrium_api::types::string::Datetime) -> DateTime<Utc> {
    dt.as_ref().with_timezone(&Utc)
}

fn count(value: Option<i64>) -> Option<u32> {
    value.map(|n| u32::try_from(n.max(0)).unwrap_or(u32::MAX))
}

pub(crate) fn profile_basic(view: &actor::defs::ProfileViewBasic) -> ProfileView {
    ProfileView {
        did: view.did.to_string(),
        handle: view.handle.to_string(),
        display_name: view.display_name.clone(),
        avatar: view.avatar.clone(),
    }
}

pub(crate) fn profile(view: &actor::defs::ProfileView) -> ProfileView {
    ProfileView {
        did: view.did.to_string(),
        handle: view.handle.to_string(),
        display_name: view.display_name.clone(),
        avatar: view.avatar.clone(),
    }
}

pub(crate) fn profile_detailed(view: &actor::defs::ProfileViewDetailed) -> ProfileView {
    ProfileView {
        did: view.did.to_string(),
        handle: view.handle.to_string(),
        display_name: view.display_name.clone(),
        avatar: view.avatar.clone(),
    }
}

/// The post record rides along as an untyped value. A record that fails to
/// parse leaves the post undated and without reply or quote references.
fn post_record(record: &Unknown) -> Option<feed::post::RecordData> {
    let value = serde_json::to_value(record).ok()?;
    serde_json::from_value(value).ok()
}

fn is_post_uri(uri: &str) -> bool {
    uri.contains(POST_COLLECTION)
}

fn quoted_from_view(view: &embed::record::View) -> Option<QuotedPost> {
    let Union::Refs(record) = &view.record else {
        return None;
    };
    let (uri, author_did) = match record {
        embed::record::ViewRecordRefs::ViewRecord(r) => (&r.uri, Some(r.author.did.to_string())),
        embed::record::ViewRecordRefs::ViewBlocked(r) => (&r.uri, Some(r.author.did.to_string())),
        embed::record::ViewRecordRefs::ViewNotFound(r) => (&r.uri, None),
        embed::record::ViewRecordRefs::ViewDetached(r) => (&r.uri, None),
        // Feeds, lists, labelers and starter packs are not quotes.
        _ => return None,
    };
    is_post_uri(uri).then(|| QuotedPost {
        uri: uri.clone(),
        author_did,
    })
}

fn quoted_from_hydrated(embed: &Union<feed::defs::PostViewEmbedRefs>) -> Option<QuotedPost> {
    match embed {
        Union::Refs(feed::defs::PostViewEmbedRefs::AppBskyEmbedRecordView(view)) => {
            quoted_from_view(view)
        }
        Union::Refs(feed::defs::PostViewEmbedRefs::AppBskyEmbedRecordWithMediaView(view)) => {
            quoted_from_view(&view.record)
        }
        _ => None,
    }
}

fn quoted_from_record(record: &feed::post::RecordData) -> Option<QuotedPost> {
    let uri = match record.embed.as_ref()? {
        Union::Refs(feed::post::RecordEmbedRefs::AppBskyEmbedRecordMain(main)) => {
            main.record.uri.clone()
        }
        Union::Refs(feed::post::RecordEmbedRefs::AppBskyEmbedRecordWithMediaMain(main)) => {
            main.record.record.uri.clone()
        }
        _ => return None,
    };
    is_post_uri(&uri).then_some(QuotedPost {
        uri,
        author_did: None,
    })
}

pub(crate) fn post_view(view: &feed::defs::PostView) -> PostView {
    let record = post_record(&view.record);
    // The hydrated embed knows the quoted author; the raw record only the URI.
    let quoted = view
        .embed
        .as_ref()
        .and_then(quoted_from_hydrated)
        .or_else(|| record.as_ref().and_then(quoted_from_record));

    PostView {
        uri: view.uri.clone(),
        cid: view.cid.as_ref().to_string(),
        author: profile_basic(&view.author),
        created_at: record.as_ref().map(|r| utc(&r.created_at)),
        indexed_at: utc(&view.indexed_at),
        reply_parent: record
            .as_ref()
            .and_then(|r| r.reply.as_ref())
            .map(|reply| reply.parent.uri.clone()),
        quoted,
        like_count: count(view.like_count),
        repost_count: count(view.repost_count),
        reply_count: count(view.reply_count),
        quote_count: count(view.quote_count),
        viewer_like: view.viewer.as_ref().and_then(|v| v.like.clone()),
    }
}

pub(crate) fn feed_view_post(item: &feed::defs::FeedViewPost) -> FeedViewPost {
    let repost = match &item.reason {
        Some(Union::Refs(feed::defs::FeedViewPostReasonRefs::ReasonRepost(reason))) => {
            Some(RepostReason {
                by: profile_basic(&reason.by),
                uri: reason.uri.clone(),
                indexed_at: utc(&reason.indexed_at),
            })
        }
        _ => None,
    };
    let reply_parent_author = item.reply.as_ref().and_then(|reply| match &reply.parent {
        Union::Refs(feed::defs::ReplyRefParentRefs::PostView(parent)) => {
            Some(parent.author.did.to_string())
        }
        Union::Refs(feed::defs::ReplyRefParentRefs::BlockedPost(parent)) => {
            Some(parent.author.did.to_string())
        }
        _ => None,
    });

    FeedViewPost {
        post: post_view(&item.post),
        repost,
        reply_parent_author,
    }
}

pub(crate) fn like(like: &feed::get_likes::Like) -> LikeView {
    LikeView {
        actor: profile(&like.actor),
        created_at: utc(&like.created_at),
    }
}

pub(crate) fn post_thread(thread: &Union<feed::get_post_thread::OutputThreadRefs>) -> PostThread {
    let Union::Refs(feed::get_post_thread::OutputThreadRefs::AppBskyFeedDefsThreadViewPost(node)) =
        thread
    else {
        return PostThread::default();
    };
    let replies = node
        .replies
        .iter()
        .flatten()
        .filter_map(|reply| match reply {
            Union::Refs(feed::defs::ThreadViewPostRepliesItem::ThreadViewPost(child)) => {
                Some(post_view(&child.post))
            }
            _ => None,
        })
        .collect();

    PostThread {
        post: Some(post_view(&node.post)),
        replies,
    }
}
