//! Single-flight token refresh.
//!
//! When the server starts rejecting an access token, every in-flight call
//! discovers it independently. Without coordination each would issue its own
//! refresh, racing to invalidate each other's refresh token and causing
//! spurious logouts. The coordinator collapses them: the first caller
//! performs the one refresh, everyone else queues on its outcome.
//!
//! The state machine has two states. `Refreshing` owns the waiter queue, so
//! pending callers cannot outlive the refresh that queued them:
//!
//! | State      | Event                    | Next state |
//! |------------|--------------------------|------------|
//! | Idle       | 401, refresh token held  | Refreshing |
//! | Idle       | 401, no refresh token    | Idle (session cleared) |
//! | Refreshing | 401 from another call    | Refreshing (caller queued) |
//! | Refreshing | refresh succeeds         | Idle (waiters get the token) |
//! | Refreshing | refresh fails            | Idle (session cleared, waiters rejected) |

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::session::{SessionEvent, SessionStore};
use crate::traits::{Headers, HttpClient, HttpError};

/// Refresh failures. All of them except queue aborts destroy the session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    /// A 401 arrived but no refresh token is stored.
    #[error("no refresh token available")]
    NoRefreshToken,
    /// The server rejected the refresh token.
    #[error("refresh rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// Transport failure on the refresh call.
    #[error("refresh request failed: {0}")]
    Network(String),
    /// The refresh call itself timed out; treated as refresh failure.
    #[error("refresh request timed out")]
    Timeout,
    /// The refresh response fit no known shape.
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    /// The in-flight refresh went away without settling this waiter.
    #[error("refresh was aborted")]
    Aborted,
}

/// What a caller waiting on an in-flight refresh receives.
type WaiterResult = Result<String, RefreshError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<WaiterResult>>,
    },
}

/// How a caller enters the state machine.
enum Entry {
    /// This caller starts the refresh.
    Leader { refresh_token: String },
    /// A refresh is already running; wait for it.
    Follower(oneshot::Receiver<WaiterResult>),
    /// Nothing to refresh with.
    NoToken,
}

/// At-most-once, single-flight token refresh shared by all concurrently
/// failing calls.
///
/// The refresh call goes straight to the HTTP transport with the refresh
/// token in the `Authorization` header; it never passes through the request
/// interceptor, so it cannot recurse.
pub struct RefreshCoordinator {
    http: Arc<dyn HttpClient>,
    base_url: String,
    request_timeout: Duration,
    session: Arc<SessionStore>,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<SessionEvent>,
}

impl RefreshCoordinator {
    /// Create a coordinator over the given transport and session store.
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: String,
        request_timeout: Duration,
        session: Arc<SessionStore>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            http,
            base_url,
            request_timeout,
            session,
            state: Mutex::new(RefreshState::Idle),
            events,
        }
    }

    /// Obtain a freshly refreshed access token.
    ///
    /// Exactly one underlying refresh call happens per expiry event no
    /// matter how many callers arrive; they all receive the same outcome.
    /// On failure the session is destroyed (equivalent to logout) and every
    /// queued caller is rejected; none are left hanging.
    pub async fn refreshed_access_token(&self) -> Result<String, RefreshError> {
        let entry = {
            // The lock is only held across state inspection, never across
            // an await point; one task at a time can take Idle→Refreshing.
            let mut state = self.lock_state();
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!("Refresh already in flight, queueing caller");
                    Entry::Follower(rx)
                }
                RefreshState::Idle => match self.session.refresh_token() {
                    Some(refresh_token) => {
                        *state = RefreshState::Refreshing {
                            waiters: Vec::new(),
                        };
                        Entry::Leader { refresh_token }
                    }
                    None => Entry::NoToken,
                },
            }
        };

        match entry {
            Entry::Follower(rx) => rx.await.map_err(|_| RefreshError::Aborted)?,
            Entry::NoToken => {
                warn!("Expired credentials and no refresh token, clearing session");
                self.teardown();
                Err(RefreshError::NoRefreshToken)
            }
            Entry::Leader { refresh_token } => {
                info!("Access token rejected, starting refresh");
                let outcome = self.perform_refresh(&refresh_token).await;
                self.settle(outcome)
            }
        }
    }

    /// Apply the refresh outcome: publish the token (or tear the session
    /// down), release every queued waiter, return to `Idle`.
    fn settle(&self, outcome: WaiterResult) -> WaiterResult {
        match &outcome {
            Ok(token) => {
                // The new token must be visible to the store before any
                // queued caller is released to replay its request.
                self.session.set_access_token(token);
                let _ = self.events.send(SessionEvent::TokenRefreshed);
                info!("Token refresh succeeded");
            }
            Err(e) => {
                // Clearing before the state flips to Idle means a caller
                // that raced in meanwhile either queued (and is rejected
                // below) or will find no refresh token.
                warn!("Token refresh failed: {}", e);
                self.teardown();
            }
        }

        let waiters = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        debug!("Releasing {} queued caller(s)", waiters.len());
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }

        outcome
    }

    /// Destroy the session and announce the forced logout.
    fn teardown(&self) {
        self.session.clear();
        let _ = self.events.send(SessionEvent::SessionExpired);
    }

    /// The actual refresh call, outside the interceptor: the refresh token
    /// rides in the `Authorization` header and the response carries only a
    /// new access token.
    async fn perform_refresh(&self, refresh_token: &str) -> WaiterResult {
        let url = format!("{}/api/auth/refresh", self.base_url);
        let mut headers = Headers::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", refresh_token),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        let result = tokio::time::timeout(
            self.request_timeout,
            self.http.post(&url, "{}", &headers),
        )
        .await;

        let response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(HttpError::Timeout(_))) | Err(_) => return Err(RefreshError::Timeout),
            Ok(Err(e)) => return Err(RefreshError::Network(e.to_string())),
        };

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status,
                message: response.error_message(),
            });
        }

        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
        }

        let payload: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;

        Ok(payload.access_token)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
