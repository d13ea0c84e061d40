// SPDX-License-Identifier: MPL-2.0

mod api;
pub mod auth;
mod client;
pub mod http;
mod lexicon;
pub mod pagination;
mod types;

pub use api::{AuthorFeedFilter, MAX_PAGE_LIMIT, SocialApi};
pub use client::{ApiClient, ClientError};
pub use http::{GatedClient, reqwest_client};
pub use pagination::{Page, PageCallback, PageProgress, fetch_all_pages, fetch_pages_until};
pub use types::{
    FeedViewPost, LikeView, PostThread, PostView, ProfileView, QuotedPost, RepostReason, Session,
    did_from_at_uri, rkey_from_at_uri, tid_timestamp,
};
