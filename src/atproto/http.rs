// SPDX-License-Identifier: MPL-2.0

//! The HTTP layer under atrium.
//!
//! Every XRPC call atrium makes, including session refreshes, goes through
//! [`GatedClient::send_http`], which takes a [`RateLimiter`] slot first and
//! gives up when the run is cancelled.

use crate::ratelimit::RateLimiter;
use atrium_api::xrpc::http::{Request, Response};
use atrium_api::xrpc::{HttpClient, XrpcClient};
use atrium_xrpc_client::reqwest::{ReqwestClient, ReqwestClientBuilder};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("request cancelled")]
    Cancelled,
}

/// reqwest-backed client with our timeout and user agent.
pub fn reqwest_client(base_uri: &str, timeout: Duration) -> Result<ReqwestClient, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(crate::config::USER_AGENT)
        .build()?;
    Ok(ReqwestClientBuilder::new(base_uri).client(client).build())
}

/// Wraps an [`HttpClient`] so each request waits on the shared limiter.
pub struct GatedClient<T> {
    inner: Arc<T>,
    base_uri: String,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl<T> GatedClient<T> {
    pub fn new(
        inner: Arc<T>,
        base_uri: &str,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            base_uri: base_uri.trim_end_matches('/').to_string(),
            limiter,
            cancel,
        }
    }
}

impl<T> Clone for GatedClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            base_uri: self.base_uri.clone(),
            limiter: Arc::clone(&self.limiter),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> HttpClient for GatedClient<T>
where
    T: HttpClient + Send + Sync,
{
    async fn send_http(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, BoxError> {
        self.limiter
            .acquire(&self.cancel)
            .await
            .map_err(|_| GateError::Cancelled)?;

        tracing::debug!(method = %request.method(), path = request.uri().path(), "xrpc request");

        tokio::select! {
            _ = self.cancel.cancelled() => Err(GateError::Cancelled.into()),
            result = self.inner.send_http(request) => result,
        }
    }
}

impl<T> XrpcClient for GatedClient<T>
where
    T: HttpClient + Send + Sync,
{
    fn base_uri(&self) -> String {
        self.base_uri.clone()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted [`HttpClient`] for exercising the XRPC stack offline.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ScriptedHttp {
        responses: Mutex<VecDeque<Result<Response<Vec<u8>>, String>>>,
        requests: Mutex<Vec<Request<Vec<u8>>>>,
    }

    impl ScriptedHttp {
        pub fn push_json(&self, status: u16, body: serde_json::Value) {
            let response = Response::builder()
                .status(status)
                .header("content-type", "application/json; charset=utf-8")
                .body(body.to_string().into_bytes())
                .unwrap();
            self.responses.lock().unwrap().push_back(Ok(response));
        }

        pub fn push_text(&self, status: u16, body: &str) {
            let response = Response::builder()
                .status(status)
                .header("content-type", "text/plain")
                .body(body.as_bytes().to_vec())
                .unwrap();
            self.responses.lock().unwrap().push_back(Ok(response));
        }

        pub fn push_error(&self, message: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(message.to_string()));
        }

        pub fn uris(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.uri().to_string())
                .collect()
        }

        pub fn authorization(&self, index: usize) -> Option<String> {
            self.requests.lock().unwrap()[index]
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        }
    }

    impl HttpClient for ScriptedHttp {
        async fn send_http(
            &self,
            request: Request<Vec<u8>>,
        ) -> Result<Response<Vec<u8>>, BoxError> {
            self.requests.lock().unwrap().push(request);
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(message.into()),
                None => Err("no scripted response".into()),
            }
        }
    }
}
