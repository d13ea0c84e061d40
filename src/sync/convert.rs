// SPDX-License-Identifier: MPL-2.0

//! Mapping from API views to stored entities.

use crate::atproto::{
    FeedViewPost, LikeView, PostView, ProfileView, did_from_at_uri, rkey_from_at_uri,
    tid_timestamp,
};
use crate::store::{
    ActivityKind, Engagement, FollowEdge, Interaction, Post, PostCounts, PostKind, ProfileUpdate,
};
use chrono::{DateTime, Utc};

/// Profile update for an account seen in a follows/followers listing.
pub fn profile_update(view: &ProfileView, edge: FollowEdge) -> ProfileUpdate {
    let mut update = ProfileUpdate {
        did: view.did.clone(),
        handle: view.handle.clone(),
        display_name: view.display_name.clone(),
        avatar: view.avatar.clone(),
        ..Default::default()
    };
    match edge {
        FollowEdge::YouFollow => update.you_follow = Some(true),
        FollowEdge::FollowsYou => update.follows_you = Some(true),
    }
    update
}

/// Ordering timestamp of a feed item (repost time for reposts).
pub fn feed_item_time(item: &FeedViewPost) -> Option<DateTime<Utc>> {
    Some(item.sort_time())
}

/// When the viewer liked this post, decoded from the like record's TID key.
///
/// `None` when the view carries no like reference or the key is not a TID.
pub fn liked_at(item: &FeedViewPost) -> Option<DateTime<Utc>> {
    let like_uri = item.post.viewer_like.as_deref()?;
    tid_timestamp(rkey_from_at_uri(like_uri)?)
}

/// Stored row for one feed item. Reposts get their own row keyed by the
/// repost record, attributed to the reposting account.
pub fn post_from_feed(item: &FeedViewPost, fetched_at: DateTime<Utc>) -> Post {
    let view = &item.post;

    let (uri, kind, created_at) = match &item.repost {
        Some(reason) => {
            let uri = reason
                .uri
                .clone()
                .unwrap_or_else(|| format!("{}#repost:{}", view.uri, reason.by.did));
            (
                uri,
                PostKind::Repost {
                    reposted_by: reason.by.did.clone(),
                },
                reason.indexed_at,
            )
        }
        None => {
            let kind = if let Some(parent) = &view.reply_parent {
                PostKind::Reply {
                    parent_uri: parent.clone(),
                }
            } else if let Some(quoted) = &view.quoted {
                PostKind::Quote {
                    quoted_uri: quoted.uri.clone(),
                }
            } else {
                PostKind::Post
            };
            (view.uri.clone(), kind, view.posted_at())
        }
    };

    Post {
        uri,
        cid: view.cid.clone(),
        author_did: view.author.did.clone(),
        kind,
        created_at,
        indexed_at: view.indexed_at,
        counts: PostCounts {
            likes: view.like_count.unwrap_or(0),
            reposts: view.repost_count.unwrap_or(0),
            replies: view.reply_count.unwrap_or(0),
            quotes: view.quote_count.unwrap_or(0),
        },
        fetched_at,
    }
}

/// A post the user liked, from their own likes listing. Dated by the like
/// itself; the liked post's own time is only a fallback.
pub fn like_interaction(item: &FeedViewPost, account_did: &str) -> Option<Interaction> {
    let view = &item.post;
    if view.author.did == account_did {
        return None;
    }
    Some(Interaction {
        kind: ActivityKind::Like,
        target_uri: view.uri.clone(),
        target_author_did: view.author.did.clone(),
        created_at: liked_at(item).unwrap_or_else(|| view.posted_at()),
        own_post_uri: None,
    })
}

/// What the user did to other accounts' posts, read from the user's own feed.
pub fn outbound_interactions(item: &FeedViewPost, account_did: &str) -> Vec<Interaction> {
    let view = &item.post;
    let mut out = Vec::new();

    if let Some(reason) = &item.repost {
        if reason.by.did == account_did && view.author.did != account_did {
            out.push(Interaction {
                kind: ActivityKind::Repost,
                target_uri: view.uri.clone(),
                target_author_did: view.author.did.clone(),
                created_at: reason.indexed_at,
                own_post_uri: reason.uri.clone(),
            });
        }
        return out;
    }

    if view.author.did != account_did {
        return out;
    }
    let created_at = view.posted_at();

    if let Some(parent) = &view.reply_parent {
        let parent_author = item
            .reply_parent_author
            .clone()
            .or_else(|| did_from_at_uri(parent).map(String::from));
        if let Some(author) = parent_author.filter(|a| a != account_did) {
            out.push(Interaction {
                kind: ActivityKind::Reply,
                target_uri: parent.clone(),
                target_author_did: author,
                created_at,
                own_post_uri: Some(view.uri.clone()),
            });
        }
    }

    if let Some(quoted) = &view.quoted {
        let quoted_author = quoted
            .author_did
            .clone()
            .or_else(|| did_from_at_uri(&quoted.uri).map(String::from));
        if let Some(author) = quoted_author.filter(|a| a != account_did) {
            out.push(Interaction {
                kind: ActivityKind::Quote,
                target_uri: quoted.uri.clone(),
                target_author_did: author,
                created_at,
                own_post_uri: Some(view.uri.clone()),
            });
        }
    }

    out
}

/// True for the user's own posts, replies and quotes (not reposts).
pub fn is_own_original(item: &FeedViewPost, account_did: &str) -> bool {
    item.repost.is_none() && item.post.author.did == account_did
}

pub fn like_engagement(
    target_uri: &str,
    like: &LikeView,
    account_did: &str,
) -> Option<Engagement> {
    if like.actor.did == account_did {
        return None;
    }
    Some(Engagement {
        kind: ActivityKind::Like,
        target_uri: target_uri.to_string(),
        from_did: like.actor.did.clone(),
        from_handle: like.actor.handle.clone(),
        created_at: like.created_at,
        their_post_uri: None,
    })
}

/// Reposted-by listings carry no timestamp; `seen_at` stands in.
pub fn repost_engagement(
    target_uri: &str,
    actor: &ProfileView,
    seen_at: DateTime<Utc>,
    account_did: &str,
) -> Option<Engagement> {
    if actor.did == account_did {
        return None;
    }
    Some(Engagement {
        kind: ActivityKind::Repost,
        target_uri: target_uri.to_string(),
        from_did: actor.did.clone(),
        from_handle: actor.handle.clone(),
        created_at: seen_at,
        their_post_uri: None,
    })
}

/// A quote or reply of the user's post, written by someone else.
pub fn post_engagement(
    kind: ActivityKind,
    target_uri: &str,
    theirs: &PostView,
    account_did: &str,
) -> Option<Engagement> {
    if theirs.author.did == account_did {
        return None;
    }
    Some(Engagement {
        kind,
        target_uri: target_uri.to_string(),
        from_did: theirs.author.did.clone(),
        from_handle: theirs.author.handle.clone(),
        created_at: theirs.posted_at(),
        their_post_uri: Some(theirs.uri.clone()),
    })
}
