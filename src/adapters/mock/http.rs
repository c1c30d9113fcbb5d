//! Mock HTTP client for testing.
//!
//! Provides a configurable mock HTTP client that can return predefined
//! responses or errors for testing purposes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::traits::{Headers, HttpClient, HttpError, Response};

/// A recorded HTTP request for verification in tests.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method (GET, POST, PUT or DELETE)
    pub method: String,
    /// Request URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Request body (for bodied requests)
    pub body: Option<String>,
}

/// Configuration for a mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return a successful response
    Success(Response),
    /// Return an error
    Error(HttpError),
}

/// Mock HTTP client for testing.
///
/// This client can be configured to return specific responses for URLs,
/// allowing tests to verify HTTP interactions without network access.
///
/// # Example
///
/// ```ignore
/// use bbhc_client::adapters::mock::{MockHttpClient, MockResponse};
/// use bbhc_client::traits::{Headers, HttpClient, Response};
/// use bytes::Bytes;
///
/// let client = MockHttpClient::new();
///
/// client.set_response(
///     "https://api.example.com/data",
///     MockResponse::Success(Response::new(200, Bytes::from("Hello")))
/// );
///
/// let response = client.get("https://api.example.com/data", &Headers::new()).await?;
/// assert_eq!(response.status, 200);
///
/// let requests = client.get_requests();
/// assert_eq!(requests.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockHttpClient {
    /// Configured responses by URL
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    /// Per-URL overrides for the nth call (0-based)
    nth_responses: Arc<Mutex<HashMap<(String, usize), MockResponse>>>,
    /// Per-URL call counters
    call_counts: Arc<Mutex<HashMap<String, usize>>>,
    /// Default response when no specific match
    default_response: Arc<Mutex<Option<MockResponse>>>,
    /// Artificial latency applied to every response
    response_delay: Arc<Mutex<Option<Duration>>>,
    /// Recorded requests for verification
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpClient {
    /// Create a new mock HTTP client.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            nth_responses: Arc::new(Mutex::new(HashMap::new())),
            call_counts: Arc::new(Mutex::new(HashMap::new())),
            default_response: Arc::new(Mutex::new(None)),
            response_delay: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set a response for a specific URL. The URL is matched exactly.
    pub fn set_response(&self, url: &str, response: MockResponse) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(url.to_string(), response);
    }

    /// Override the response for the nth call (0-based) to a URL.
    ///
    /// Useful for retry flows: the first call can fail while the replay
    /// succeeds.
    pub fn set_response_for_nth(&self, url: &str, n: usize, response: MockResponse) {
        let mut nth = self.nth_responses.lock().unwrap();
        nth.insert((url.to_string(), n), response);
    }

    /// Set a default response for URLs without specific matches.
    pub fn set_default_response(&self, response: MockResponse) {
        let mut default = self.default_response.lock().unwrap();
        *default = Some(response);
    }

    /// Apply an artificial delay before every response, so tests can hold
    /// a request in flight while other tasks race it.
    pub fn set_response_delay(&self, delay: Duration) {
        let mut slot = self.response_delay.lock().unwrap();
        *slot = Some(delay);
    }

    /// Get all recorded requests.
    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Clear all recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    /// Record a request.
    fn record_request(&self, method: &str, url: &str, headers: &Headers, body: Option<String>) {
        let mut requests = self.requests.lock().unwrap();
        requests.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body,
        });
    }

    /// Resolve the response for a URL, honoring nth-call overrides.
    fn get_response(&self, url: &str) -> Option<MockResponse> {
        let count = {
            let mut counts = self.call_counts.lock().unwrap();
            let entry = counts.entry(url.to_string()).or_insert(0);
            let current = *entry;
            *entry += 1;
            current
        };

        {
            let nth = self.nth_responses.lock().unwrap();
            if let Some(response) = nth.get(&(url.to_string(), count)) {
                return Some(response.clone());
            }
        }

        let responses = self.responses.lock().unwrap();
        if let Some(response) = responses.get(url) {
            return Some(response.clone());
        }

        self.default_response.lock().unwrap().clone()
    }

    async fn respond(&self, method: &str, url: &str, headers: &Headers, body: Option<String>)
        -> Result<Response, HttpError>
    {
        self.record_request(method, url, headers, body);

        let delay = *self.response_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.get_response(url) {
            Some(MockResponse::Success(response)) => Ok(response),
            Some(MockResponse::Error(error)) => Err(error),
            None => Err(HttpError::Other(format!("no mock response for {}", url))),
        }
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.respond("GET", url, headers, None).await
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.respond("POST", url, headers, Some(body.to_string())).await
    }

    async fn put(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.respond("PUT", url, headers, Some(body.to_string())).await
    }

    async fn delete(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.respond("DELETE", url, headers, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_configured_response_returned() {
        let client = MockHttpClient::new();
        client.set_response(
            "http://test/x",
            MockResponse::Success(Response::new(200, Bytes::from("ok"))),
        );

        let response = client.get("http://test/x", &Headers::new()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_unconfigured_url_errors() {
        let client = MockHttpClient::new();
        let result = client.get("http://test/missing", &Headers::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_default_response_fallback() {
        let client = MockHttpClient::new();
        client.set_default_response(MockResponse::Success(Response::new(204, Bytes::new())));

        let response = client.get("http://test/any", &Headers::new()).await.unwrap();
        assert_eq!(response.status, 204);
    }

    #[tokio::test]
    async fn test_error_response_returned() {
        let client = MockHttpClient::new();
        client.set_response(
            "http://test/x",
            MockResponse::Error(HttpError::ConnectionFailed("down".to_string())),
        );

        let result = client.get("http://test/x", &Headers::new()).await;
        assert!(matches!(result, Err(HttpError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let client = MockHttpClient::new();
        client.set_default_response(MockResponse::Success(Response::new(200, Bytes::new())));

        let mut headers = Headers::new();
        headers.insert("Authorization".to_string(), "Bearer t".to_string());
        client.post("http://test/x", "{}", &headers).await.unwrap();

        let requests = client.get_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, "http://test/x");
        assert_eq!(requests[0].body, Some("{}".to_string()));
        assert_eq!(
            requests[0].headers.get("Authorization"),
            Some(&"Bearer t".to_string())
        );
    }

    #[tokio::test]
    async fn test_nth_override_takes_precedence() {
        let client = MockHttpClient::new();
        client.set_response(
            "http://test/x",
            MockResponse::Success(Response::new(401, Bytes::new())),
        );
        client.set_response_for_nth(
            "http://test/x",
            1,
            MockResponse::Success(Response::new(200, Bytes::new())),
        );

        let first = client.get("http://test/x", &Headers::new()).await.unwrap();
        let second = client.get("http://test/x", &Headers::new()).await.unwrap();
        let third = client.get("http://test/x", &Headers::new()).await.unwrap();

        assert_eq!(first.status, 401);
        assert_eq!(second.status, 200);
        assert_eq!(third.status, 401);
    }

    #[tokio::test]
    async fn test_clear_requests() {
        let client = MockHttpClient::new();
        client.set_default_response(MockResponse::Success(Response::new(200, Bytes::new())));
        client.get("http://test/x", &Headers::new()).await.unwrap();

        client.clear_requests();
        assert!(client.get_requests().is_empty());
    }
}
