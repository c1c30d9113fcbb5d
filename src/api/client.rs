//! Authorized API client: the request interceptor.
//!
//! Every business call goes through [`ApiClient::send`], which attaches the
//! bearer credential read fresh from the token store at send time and, on an
//! expired-credential response, obtains a refreshed token through the
//! single-flight coordinator and replays the call exactly once.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::session::{RefreshCoordinator, RefreshError, SessionStore};
use crate::traits::{Headers, HttpClient, HttpError, Response};

/// Default per-call timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

/// API client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Backend base URL, no trailing slash.
    pub base_url: String,
    /// Independent timeout applied to every call.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// HTTP method for [`ApiClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// API call errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Transport failure or per-call timeout; terminal for this call only.
    #[error(transparent)]
    Http(HttpError),
    /// The session could not be renewed; the store has been cleared.
    #[error("session expired: {0}")]
    SessionExpired(RefreshError),
    /// The call still got a 401 after being replayed with a fresh token.
    /// Never retried a second time.
    #[error("unauthorized after token refresh: {0}")]
    Unauthorized(String),
    /// Non-2xx status from a typed helper.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// Response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Authorized HTTP client for the marketplace API.
pub struct ApiClient {
    http: Arc<dyn HttpClient>,
    config: ApiConfig,
    session: Arc<SessionStore>,
    refresh: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Create a client over the given transport, token store and refresh
    /// coordinator.
    pub fn new(
        http: Arc<dyn HttpClient>,
        config: ApiConfig,
        session: Arc<SessionStore>,
        refresh: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            config,
            session,
            refresh,
        }
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Send an authorized request, refreshing and replaying once on a 401.
    ///
    /// The access token is read from the store at each attempt, so a call
    /// issued just before a refresh still carries the newest token available
    /// at send time. A call that fails again after its single replay
    /// surfaces [`ApiError::Unauthorized`] and is not retried further.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.config.base_url, path);
        let body = body.map(|b| b.to_string());

        let first = self
            .dispatch(method, &url, body.as_deref(), self.session.access_token())
            .await
            .map_err(ApiError::Http)?;

        if first.status != 401 {
            return Ok(first);
        }

        debug!(path, "Access token rejected, entering refresh");
        let token = self
            .refresh
            .refreshed_access_token()
            .await
            .map_err(ApiError::SessionExpired)?;

        let second = self
            .dispatch(method, &url, body.as_deref(), Some(token))
            .await
            .map_err(ApiError::Http)?;

        if second.status == 401 {
            return Err(ApiError::Unauthorized(second.error_message()));
        }

        Ok(second)
    }

    /// Send a request without the 401 refresh-and-replay step.
    ///
    /// The auth endpoints themselves (login, OTP verification, registration)
    /// use this: a 401 there means bad credentials, not an expired session,
    /// and must never start a refresh. A held token is still attached if one
    /// exists.
    pub async fn post_no_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.config.base_url, path);
        let body = body.to_string();
        self.dispatch(Method::Post, &url, Some(&body), self.session.access_token())
            .await
            .map_err(ApiError::Http)
    }

    /// GET a path and decode the 2xx body as JSON.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(Method::Get, path, None).await?;
        Self::decode(response)
    }

    /// POST a body and decode the 2xx response as JSON.
    pub async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self.send(Method::Post, path, Some(body)).await?;
        Self::decode(response)
    }

    fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        if !response.is_success() {
            return Err(ApiError::Server {
                status: response.status,
                message: response.error_message(),
            });
        }
        response.json().map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// One attempt: build headers, apply the per-call timeout, dispatch.
    /// The refresh endpoint never comes through here with its refresh
    /// token; the coordinator owns that call.
    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
        token: Option<String>,
    ) -> Result<Response, HttpError> {
        let mut headers = Headers::new();
        if let Some(token) = token {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        if body.is_some() {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }

        let result = tokio::time::timeout(self.config.request_timeout, async {
            match method {
                Method::Get => self.http.get(url, &headers).await,
                Method::Post => self.http.post(url, body.unwrap_or(""), &headers).await,
                Method::Put => self.http.put(url, body.unwrap_or(""), &headers).await,
                Method::Delete => self.http.delete(url, &headers).await,
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(HttpError::Timeout(format!(
                "request to {} exceeded {:?}",
                url, self.config.request_timeout
            ))),
        }
    }
}
