// SPDX-License-Identifier: MPL-2.0

use crate::atproto::api::{AuthorFeedFilter, SocialApi};
use crate::atproto::http::{GateError, GatedClient};
use crate::atproto::lexicon;
use crate::atproto::pagination::Page;
use crate::atproto::types::{FeedViewPost, LikeView, PostThread, PostView, ProfileView, Session};
use crate::config::PUBLIC_API;
use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use atrium_api::agent::atp_agent::store::MemorySessionStore;
use atrium_api::agent::atp_agent::{AtpAgent, AtpSession};
use atrium_api::app::bsky::{actor, feed, graph};
use atrium_api::client::AtpServiceClient;
use atrium_api::types::string::AtIdentifier;
use atrium_api::types::{LimitedNonZeroU8, LimitedU16};
use atrium_api::xrpc::HttpClient;
use atrium_api::xrpc::error::{Error as XrpcError, ErrorResponseBody, XrpcErrorKind};
use atrium_xrpc_client::reqwest::ReqwestClient;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("api error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        error_code: Option<String>,
    },
    #[error("network error: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Auth failures end the whole sync run rather than a single item.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}

/// Error codes a PDS uses for a bad or stale access token.
const AUTH_ERROR_CODES: &[&str] = &["ExpiredToken", "InvalidToken", "AuthMissing"];

/// Map atrium's XRPC error onto ours. Nothing here retries.
fn classify<E: Debug + Serialize>(err: XrpcError<E>) -> ClientError {
    match err {
        XrpcError::Authentication(header) => ClientError::Auth(
            header
                .to_str()
                .map(String::from)
                .unwrap_or_else(|_| "unauthorized".to_string()),
        ),
        XrpcError::XrpcResponse(response) => {
            let status = response.status.as_u16();
            let body = match response.error {
                Some(XrpcErrorKind::Undefined(body)) => Some(body),
                // Lexicon-declared errors serialize back to `{error, message}`.
                Some(XrpcErrorKind::Custom(custom)) => serde_json::to_value(&custom)
                    .ok()
                    .and_then(|v| serde_json::from_value::<ErrorResponseBody>(v).ok()),
                None => None,
            };
            let (code, message) = body.map(|b| (b.error, b.message)).unwrap_or_default();

            if status == 401 || code.as_deref().is_some_and(|c| AUTH_ERROR_CODES.contains(&c)) {
                return ClientError::Auth(
                    message
                        .or(code)
                        .unwrap_or_else(|| "unauthorized".to_string()),
                );
            }

            let message = message
                .or_else(|| code.clone())
                .or_else(|| response.status.canonical_reason().map(String::from))
                .unwrap_or_else(|| status.to_string());
            ClientError::Api {
                status,
                message,
                error_code: code,
            }
        }
        XrpcError::HttpClient(e) if e.downcast_ref::<GateError>().is_some() => {
            ClientError::Cancelled
        }
        XrpcError::HttpClient(e) => ClientError::Transport(e.to_string()),
        XrpcError::SerdeJson(e) => ClientError::InvalidResponse(e.to_string()),
        XrpcError::UnexpectedResponseType => {
            ClientError::InvalidResponse("unexpected response type".to_string())
        }
        XrpcError::HttpRequest(e) => ClientError::InvalidRequest(e.to_string()),
        XrpcError::SerdeHtmlForm(e) => ClientError::InvalidRequest(e.to_string()),
    }
}

fn actor_id(actor: &str) -> Result<AtIdentifier, ClientError> {
    actor
        .parse()
        .map_err(|e: &str| ClientError::InvalidRequest(format!("{actor}: {e}")))
}

fn page_limit(limit: u32) -> Result<LimitedNonZeroU8<100>, ClientError> {
    let limit = u8::try_from(limit.clamp(1, crate::atproto::MAX_PAGE_LIMIT))
        .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
    LimitedNonZeroU8::try_from(limit).map_err(ClientError::InvalidRequest)
}

fn thread_bound(value: u16) -> Result<LimitedU16<1000>, ClientError> {
    LimitedU16::try_from(value.min(1000)).map_err(ClientError::InvalidRequest)
}

type Agent<T> = AtpAgent<MemorySessionStore, GatedClient<T>>;
type PublicClient<T> = AtpServiceClient<GatedClient<T>>;

/// Wraps atrium so the rest of the app only sees our own types.
///
/// Every call, authenticated or not, takes one limiter slot before it touches
/// the network; that includes the agent's own session refreshes. Failures are
/// classified, never retried here.
pub struct ApiClient<T = ReqwestClient>
where
    T: HttpClient + Send + Sync + 'static,
{
    http: Arc<T>,
    limiter: Arc<RateLimiter>,
    public_endpoint: String,
    cancel: CancellationToken,
    agent: RwLock<Option<Arc<Agent<T>>>>,
}

impl<T> ApiClient<T>
where
    T: HttpClient + Send + Sync + 'static,
{
    pub fn new(http: Arc<T>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http,
            limiter,
            public_endpoint: PUBLIC_API.to_string(),
            cancel: CancellationToken::new(),
            agent: RwLock::new(None),
        }
    }

    pub fn with_public_endpoint(mut self, endpoint: &str) -> Self {
        self.public_endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Abort in-flight and future calls when `cancel` fires. Set this before
    /// resuming a session so the agent shares the token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn gated(&self, base_uri: &str) -> GatedClient<T> {
        GatedClient::new(
            Arc::clone(&self.http),
            base_uri,
            Arc::clone(&self.limiter),
            self.cancel.clone(),
        )
    }

    fn public(&self) -> PublicClient<T> {
        AtpServiceClient::new(self.gated(&self.public_endpoint))
    }

    fn agent(&self) -> Result<Arc<Agent<T>>, ClientError> {
        self.agent
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ClientError::Auth("no session for authenticated call".into()))
    }

    /// Attach a stored session to this client.
    ///
    /// The agent checks it with `getSession` and refreshes an expired access
    /// token on the way; read the result back with [`session`](Self::session).
    pub async fn resume_session(&self, session: &Session) -> Result<(), ClientError> {
        let agent = AtpAgent::new(self.gated(&session.service), MemorySessionStore::default());

        let atrium_session = AtpSession::from(
            atrium_api::com::atproto::server::create_session::OutputData {
                access_jwt: session.access_jwt.clone(),
                active: None,
                did: session
                    .did
                    .parse()
                    .map_err(|e| ClientError::Auth(format!("invalid DID: {e}")))?,
                did_doc: None,
                email: None,
                email_auth_factor: None,
                email_confirmed: None,
                handle: session
                    .handle
                    .parse()
                    .map_err(|e| ClientError::Auth(format!("invalid handle: {e}")))?,
                refresh_jwt: session.refresh_jwt.clone(),
                status: None,
            },
        );

        agent.resume_session(atrium_session).await.map_err(|e| match classify(e) {
            ClientError::Api { message, .. } => ClientError::Auth(message),
            other => other,
        })?;

        *self.agent.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(agent));
        tracing::debug!(did = %session.did, "session resumed");
        Ok(())
    }

    /// The current session, including tokens the agent refreshed.
    pub async fn session(&self) -> Option<Session> {
        let agent = self.agent().ok()?;
        let current = agent.get_session().await?;

        Some(Session {
            did: current.data.did.to_string(),
            handle: current.data.handle.to_string(),
            access_jwt: current.data.access_jwt.clone(),
            refresh_jwt: current.data.refresh_jwt.clone(),
            service: agent.get_endpoint().await,
        })
    }
}

#[async_trait]
impl<T> SocialApi for ApiClient<T>
where
    T: HttpClient + Send + Sync + 'static,
{
    async fn get_profile(&self, actor: &str) -> Result<ProfileView, ClientError> {
        let params = actor::get_profile::ParametersData {
            actor: actor_id(actor)?,
        };
        let output = self
            .public()
            .service
            .app
            .bsky
            .actor
            .get_profile(params.into())
            .await
            .map_err(classify)?;
        Ok(lexicon::profile_detailed(&output))
    }

    async fn get_follows(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError> {
        let params = graph::get_follows::ParametersData {
            actor: actor_id(actor)?,
            cursor,
            limit: Some(page_limit(limit)?),
        };
        let output = self
            .public()
            .service
            .app
            .bsky
            .graph
            .get_follows(params.into())
            .await
            .map_err(classify)?;
        let items = output.follows.iter().map(lexicon::profile).collect();
        Ok(Page::new(items, output.data.cursor))
    }

    async fn get_followers(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError> {
        let params = graph::get_followers::ParametersData {
            actor: actor_id(actor)?,
            cursor,
            limit: Some(page_limit(limit)?),
        };
        let output = self
            .public()
            .service
            .app
            .bsky
            .graph
            .get_followers(params.into())
            .await
            .map_err(classify)?;
        let items = output.followers.iter().map(lexicon::profile).collect();
        Ok(Page::new(items, output.data.cursor))
    }

    async fn get_author_feed(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<String>,
        filter: AuthorFeedFilter,
    ) -> Result<Page<FeedViewPost>, ClientError> {
        let params = feed::get_author_feed::ParametersData {
            actor: actor_id(actor)?,
            cursor,
            filter: Some(filter.as_str().to_string()),
            include_pins: None,
            limit: Some(page_limit(limit)?),
        };
        let output = self
            .public()
            .service
            .app
            .bsky
            .feed
            .get_author_feed(params.into())
            .await
            .map_err(classify)?;
        let items = output.feed.iter().map(lexicon::feed_view_post).collect();
        Ok(Page::new(items, output.data.cursor))
    }

    async fn get_actor_likes(
        &self,
        actor: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<FeedViewPost>, ClientError> {
        let agent = self.agent()?;
        let params = feed::get_actor_likes::ParametersData {
            actor: actor_id(actor)?,
            cursor,
            limit: Some(page_limit(limit)?),
        };
        let output = agent
            .api
            .app
            .bsky
            .feed
            .get_actor_likes(params.into())
            .await
            .map_err(classify)?;
        let items = output.feed.iter().map(lexicon::feed_view_post).collect();
        Ok(Page::new(items, output.data.cursor))
    }

    async fn get_likes(
        &self,
        uri: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<LikeView>, ClientError> {
        let params = feed::get_likes::ParametersData {
            cid: None,
            cursor,
            limit: Some(page_limit(limit)?),
            uri: uri.to_string(),
        };
        let output = self
            .public()
            .service
            .app
            .bsky
            .feed
            .get_likes(params.into())
            .await
            .map_err(classify)?;
        let items = output.likes.iter().map(lexicon::like).collect();
        Ok(Page::new(items, output.data.cursor))
    }

    async fn get_reposted_by(
        &self,
        uri: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<ProfileView>, ClientError> {
        let params = feed::get_reposted_by::ParametersData {
            cid: None,
            cursor,
            limit: Some(page_limit(limit)?),
            uri: uri.to_string(),
        };
        let output = self
            .public()
            .service
            .app
            .bsky
            .feed
            .get_reposted_by(params.into())
            .await
            .map_err(classify)?;
        let items = output.reposted_by.iter().map(lexicon::profile).collect();
        Ok(Page::new(items, output.data.cursor))
    }

    async fn get_quotes(
        &self,
        uri: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> Result<Page<PostView>, ClientError> {
        let params = feed::get_quotes::ParametersData {
            cid: None,
            cursor,
            limit: Some(page_limit(limit)?),
            uri: uri.to_string(),
        };
        let output = self
            .public()
            .service
            .app
            .bsky
            .feed
            .get_quotes(params.into())
            .await
            .map_err(classify)?;
        let items = output.posts.iter().map(lexicon::post_view).collect();
        Ok(Page::new(items, output.data.cursor))
    }

    async fn get_post_thread(
        &self,
        uri: &str,
        depth: u16,
        parent_height: u16,
    ) -> Result<PostThread, ClientError> {
        let params = feed::get_post_thread::ParametersData {
            depth: Some(thread_bound(depth)?),
            parent_height: Some(thread_bound(parent_height)?),
            uri: uri.to_string(),
        };
        let output = self
            .public()
            .service
            .app
            .bsky
            .feed
            .get_post_thread(params.into())
            .await
            .map_err(classify)?;
        Ok(lexicon::post_thread(&output.thread))
    }
}
