// SPDX-License-Identifier: MPL-2.0

//! Password (app password) login.
//!
//! Session creation goes through atrium's agent directly. Later runs hand the
//! stored tokens to [`ApiClient::resume_session`](crate::atproto::ApiClient::resume_session).

use crate::atproto::client::ClientError;
use crate::atproto::http::reqwest_client;
use crate::atproto::types::Session;
use atrium_api::agent::atp_agent::AtpAgent;
use atrium_api::agent::atp_agent::store::MemorySessionStore;
use std::time::Duration;

pub async fn login(
    service_url: &str,
    identifier: &str,
    password: &str,
    timeout: Duration,
) -> Result<Session, ClientError> {
    let service = service_url.trim_end_matches('/');
    let client =
        reqwest_client(service, timeout).map_err(|e| ClientError::Transport(e.to_string()))?;
    let agent = AtpAgent::new(client, MemorySessionStore::default());

    let result = agent
        .login(identifier, password)
        .await
        .map_err(|e| ClientError::Auth(e.to_string()))?;

    let session = Session {
        did: result.data.did.to_string(),
        handle: result.data.handle.to_string(),
        access_jwt: result.data.access_jwt.clone(),
        refresh_jwt: result.data.refresh_jwt.clone(),
        service: agent.get_endpoint().await,
    };

    tracing::info!(did = %session.did, handle = %session.handle, "logged in");
    Ok(session)
}
