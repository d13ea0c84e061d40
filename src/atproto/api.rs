// SPDX-License-Identifier: MPL-2.0

use crate::atproto::client::ClientError;
use crate::atproto::pagination::{Page, PageCallback, fetch_all_pages};
use crate::atproto::types::{FeedViewPost, LikeView, PostThread, PostView, ProfileView};
use async_trait::async_trait;

/// Largest `limit` the AppView accepts on list endpoints.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// `filter` parameter of `app.bsky.feed.getAuthorFeed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorFeedFilter {
    #[default]
    PostsWithReplies,
    PostsNoReplies,
    PostsAndAuthorThreads,
}

impl AuthorFeedFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthorFeedFilter::PostsWithReplies => "posts_with_replies",
            AuthorFeedFilter::PostsNoReplies => "posts_no_replies",
            AuthorFeedFilter::PostsAndAuthorThreads => "posts_and_author_threads",
        }
    }
}

/// The remote read operations the sync engine depends on.
///
/// [`ApiClient`](crate::atproto::ApiClient) is the production implementation;
/// anything that returns the same pages can stand in for it.
#[async_trait]
pub trait SocialApi: Send + Sync {
    async fn get_profile(&self, actor: &str) -> Result<ProfileView, ClientError>;

    async fn get_follows(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError>;

    async fn get_followers(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError>;

    async fn get_author_feed(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<String>,
        filter: AuthorFeedFilter,
    ) -> Result<Page<FeedViewPost>, ClientError>;

    /// Posts liked by `actor`. Only works for the authenticated account.
    async fn get_actor_likes(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<FeedViewPost>, ClientError>;

    async fn get_likes(
        &self,
        uri: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<LikeView>, ClientError>;

    async fn get_reposted_by(
        &self,
        uri: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError>;

    async fn get_quotes(
        &self,
        uri: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<PostView>, ClientError>;

    async fn get_post_thread(
        &self,
        uri: &str,
        depth: u16,
        parent_height: u16,
    ) -> Result<PostThread, ClientError>;

    async fn get_all_follows(
        &self,
        actor: &str,
        start_cursor: Option<String>,
        on_page: PageCallback<'_>,
    ) -> Result<Vec<ProfileView>, ClientError> {
        fetch_all_pages(
            start_cursor,
            move |cursor| self.get_follows(actor, MAX_PAGE_LIMIT, cursor),
            |page: Page<ProfileView>| page.items,
            |page: &Page<ProfileView>| page.cursor.clone(),
            on_page,
        )
        .await
    }

    async fn get_all_followers(
        &self,
        actor: &str,
        start_cursor: Option<String>,
        on_page: PageCallback<'_>,
    ) -> Result<Vec<ProfileView>, ClientError> {
        fetch_all_pages(
            start_cursor,
            move |cursor| self.get_followers(actor, MAX_PAGE_LIMIT, cursor),
            |page: Page<ProfileView>| page.items,
            |page: &Page<ProfileView>| page.cursor.clone(),
            on_page,
        )
        .await
    }

    async fn get_all_likes(
        &self,
        uri: &str,
        on_page: PageCallback<'_>,
    ) -> Result<Vec<LikeView>, ClientError> {
        fetch_all_pages(
            None,
            move |cursor| self.get_likes(uri, MAX_PAGE_LIMIT, cursor),
            |page: Page<LikeView>| page.items,
            |page: &Page<LikeView>| page.cursor.clone(),
            on_page,
        )
        .await
    }

    async fn get_all_reposted_by(
        &self,
        uri: &str,
        on_page: PageCallback<'_>,
    ) -> Result<Vec<ProfileView>, ClientError> {
        fetch_all_pages(
            None,
            move |cursor| self.get_reposted_by(uri, MAX_PAGE_LIMIT, cursor),
            |page: Page<ProfileView>| page.items,
            |page: &Page<ProfileView>| page.cursor.clone(),
            on_page,
        )
        .await
    }

    async fn get_all_quotes(
        &self,
        uri: &str,
        on_page: PageCallback<'_>,
    ) -> Result<Vec<PostView>, ClientError> {
        fetch_all_pages(
            None,
            move |cursor| self.get_quotes(uri, MAX_PAGE_LIMIT, cursor),
            |page: Page<PostView>| page.items,
            |page: &Page<PostView>| page.cursor.clone(),
            on_page,
        )
        .await
    }
}
