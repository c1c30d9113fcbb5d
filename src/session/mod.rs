//! Session state: the token store and session lifecycle events.
//!
//! [`SessionStore`] is the single owner of the credential pair. Everything
//! else reads snapshots; mutation happens only on login/OTP success, on a
//! successful refresh, and on logout or irrecoverable refresh failure.

pub mod refresh;

pub use refresh::{RefreshCoordinator, RefreshError};

use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::models::{Identity, Role, Session};
use crate::traits::StateStore;

/// Storage key for the access token.
const TOKEN_KEY: &str = "token";

/// Storage key for the refresh token.
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key for the serialized identity.
const USER_KEY: &str = "user";

/// Storage key for the role string.
const USER_TYPE_KEY: &str = "userType";

/// Application-wide session lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session was established and committed.
    LoggedIn { identity: Identity },
    /// A refresh replaced the access token.
    TokenRefreshed,
    /// The session was destroyed because the credentials could no longer be
    /// renewed; equivalent to a forced logout.
    SessionExpired,
    /// The user logged out explicitly.
    LoggedOut,
}

/// Holds the current session and writes it through to persistent state.
///
/// Readers always observe either the pre-refresh or the post-refresh value;
/// the lock is never held across an await point, so no caller can see a
/// refresh "in progress".
pub struct SessionStore {
    current: RwLock<Option<Session>>,
    store: Arc<dyn StateStore>,
}

impl SessionStore {
    /// Create an empty session store backed by the given state store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            current: RwLock::new(None),
            store,
        }
    }

    /// Current access token, if a session exists.
    pub fn access_token(&self) -> Option<String> {
        self.read(|s| s.access_token.clone())
    }

    /// Current refresh token, if a session exists.
    pub fn refresh_token(&self) -> Option<String> {
        self.read(|s| s.refresh_token.clone())
    }

    /// Current authenticated identity, if a session exists.
    pub fn identity(&self) -> Option<Identity> {
        self.read(|s| s.identity.clone())
    }

    /// Role of the current session, if any.
    pub fn role(&self) -> Option<Role> {
        self.read(|s| s.identity.role)
    }

    /// Whether a session is currently held.
    pub fn is_authenticated(&self) -> bool {
        self.current.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Snapshot of the full session, if any.
    pub fn session(&self) -> Option<Session> {
        self.read(|s| s.clone())
    }

    /// Install a new session (login, OTP success, registration) and persist
    /// it under the same keys the web client used.
    pub fn set_session(&self, session: Session) {
        self.persist(&session);
        if let Ok(mut current) = self.current.write() {
            *current = Some(session);
        }
    }

    /// Replace only the access token after a successful refresh. No-op when
    /// no session is held (the session died while the refresh was in
    /// flight).
    pub fn set_access_token(&self, access_token: &str) {
        if let Ok(mut current) = self.current.write() {
            if let Some(session) = current.as_mut() {
                session.access_token = access_token.to_string();
                if let Err(e) = self.store.set(TOKEN_KEY, access_token) {
                    warn!("Failed to persist refreshed access token: {}", e);
                }
            }
        }
    }

    /// Destroy the session and its persisted state. Idempotent.
    pub fn clear(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
        for key in [TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY, USER_TYPE_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to remove {}: {}", key, e);
            }
        }
    }

    /// Rebuild a session from persisted state at startup.
    ///
    /// Returns `None` when any piece is missing or unreadable; the caller is
    /// expected to validate the rebuilt session against `/api/auth/me`
    /// before trusting it.
    pub fn load_persisted(&self) -> Option<Session> {
        let access_token = self.store.get(TOKEN_KEY).ok()??;
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY).ok()??;
        let user_json = self.store.get(USER_KEY).ok()??;
        let identity: Identity = serde_json::from_str(&user_json).ok()?;

        if access_token.is_empty() || refresh_token.is_empty() {
            return None;
        }

        Some(Session {
            access_token,
            refresh_token,
            identity,
        })
    }

    /// Install a persisted session into memory without re-persisting it.
    pub fn restore(&self, session: Session) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(session);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> Option<T> {
        self.current.read().ok()?.as_ref().map(f)
    }

    fn persist(&self, session: &Session) {
        let pairs = [
            (TOKEN_KEY, session.access_token.clone()),
            (REFRESH_TOKEN_KEY, session.refresh_token.clone()),
            (USER_TYPE_KEY, session.identity.role.as_str().to_string()),
        ];
        for (key, value) in pairs {
            if let Err(e) = self.store.set(key, &value) {
                warn!("Failed to persist {}: {}", key, e);
            }
        }
        match serde_json::to_string(&session.identity) {
            Ok(json) => {
                if let Err(e) = self.store.set(USER_KEY, &json) {
                    warn!("Failed to persist identity: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize identity: {}", e),
        }
    }
}
