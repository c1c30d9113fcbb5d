//! Per-process session context.
//!
//! One `SessionContext` wires the token store, refresh coordinator, request
//! interceptor, device trust and realtime bridge together: an explicit
//! value constructed once and passed around, instead of module-level
//! singletons, so tests can run several independent sessions side by side.
//!
//! The context is also the only place that *commits* login outcomes: the
//! credential validator returns data, the context writes it into the token
//! store, persists the issued device token and brings the realtime channel
//! up or down.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::api::{ApiClient, ApiConfig, ApiError};
use crate::auth::{CredentialValidator, DeviceTrustStore, OtpChallenge};
use crate::models::{
    CustomerRegistration, Identity, LoginCredentials, LoginOutcome, RejectReason, Session,
};
use crate::realtime::{RealtimeBridge, RtConfig, RtIncomingMessage};
use crate::session::{RefreshCoordinator, SessionEvent, SessionStore};
use crate::traits::{HttpClient, StateStore};

/// Configuration for a session context.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// HTTP API settings.
    pub api: ApiConfig,
    /// Realtime channel settings.
    pub realtime: RtConfig,
}

/// The composition root for one session.
pub struct SessionContext {
    session: Arc<SessionStore>,
    api: Arc<ApiClient>,
    validator: CredentialValidator,
    device_trust: DeviceTrustStore,
    realtime_config: RtConfig,
    bridge: Mutex<Option<RealtimeBridge>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    /// Build a context over injected transport and storage.
    pub fn new(
        config: SessionConfig,
        http: Arc<dyn HttpClient>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(32);

        let session = Arc::new(SessionStore::new(state.clone()));
        let refresh = Arc::new(RefreshCoordinator::new(
            http.clone(),
            config.api.base_url.clone(),
            config.api.request_timeout,
            session.clone(),
            events.clone(),
        ));
        let api = Arc::new(ApiClient::new(
            http,
            config.api,
            session.clone(),
            refresh,
        ));
        let validator = CredentialValidator::new(api.clone());
        let device_trust = DeviceTrustStore::new(state);

        Self {
            session,
            api,
            validator,
            device_trust,
            realtime_config: config.realtime,
            bridge: Mutex::new(None),
            events,
        }
    }

    /// Build a production context: reqwest transport and the JSON-file
    /// state store. Returns `None` when the home directory cannot be
    /// determined.
    pub fn production(config: SessionConfig) -> Option<Self> {
        let http = Arc::new(crate::adapters::ReqwestHttpClient::new());
        let state = Arc::new(crate::adapters::FileStateStore::new()?);
        Some(Self::new(config, http, state))
    }

    /// The authorized API client, for business calls.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// The token store, for read-only inspection.
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// The device trust store.
    pub fn device_trust(&self) -> &DeviceTrustStore {
        &self.device_trust
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Subscribe to realtime events, if the channel is up.
    pub async fn subscribe_realtime(&self) -> Option<broadcast::Receiver<RtIncomingMessage>> {
        self.bridge.lock().await.as_ref().map(|b| b.subscribe())
    }

    /// Log in with primary credentials, honoring a role-matching device
    /// token if one is held. On success the session is committed and the
    /// realtime channel is (re)connected; all other outcomes pass through.
    pub async fn login(&self, credentials: &LoginCredentials) -> LoginOutcome {
        let role = credentials.role();
        let device_id = self.device_trust.get_or_create_device_id();
        let device_token = self.device_trust.get_device_token(role);

        let outcome = self
            .validator
            .login(credentials, &device_id, device_token.as_deref())
            .await;

        if let LoginOutcome::SessionEstablished {
            session,
            device_token,
        } = &outcome
        {
            self.commit_session(session, device_token.as_deref(), &device_id)
                .await;
        }
        outcome
    }

    /// Verify an OTP challenge and commit the session it yields.
    pub async fn verify_otp(&self, challenge: &OtpChallenge, code: &str) -> LoginOutcome {
        let device_id = self.device_trust.get_or_create_device_id();

        let outcome = self.validator.verify_otp(challenge, code, &device_id).await;

        if let LoginOutcome::SessionEstablished {
            session,
            device_token,
        } = &outcome
        {
            self.commit_session(session, device_token.as_deref(), &device_id)
                .await;
        }
        outcome
    }

    /// Ask the server to resend the code for an outstanding challenge.
    pub async fn resend_otp(&self, challenge: &OtpChallenge) -> Result<OtpChallenge, RejectReason> {
        self.validator.resend_otp(challenge).await
    }

    /// Complete customer registration after a verified-but-unknown phone
    /// number, committing the session it yields.
    pub async fn register_customer(&self, registration: &CustomerRegistration) -> LoginOutcome {
        let device_id = self.device_trust.get_or_create_device_id();

        let outcome = self.validator.register_customer(registration).await;

        if let LoginOutcome::SessionEstablished {
            session,
            device_token,
        } = &outcome
        {
            self.commit_session(session, device_token.as_deref(), &device_id)
                .await;
        }
        outcome
    }

    /// Validate a persisted session at startup.
    ///
    /// Loads the stored credential pair, restores it into memory and checks
    /// it against `/api/auth/me` (through the interceptor, so an expired
    /// access token gets its normal single refresh). An authentication
    /// failure clears everything and yields `Ok(None)`; a transport failure
    /// leaves the persisted state alone and surfaces the error so the
    /// application can retry later.
    pub async fn restore_session(&self) -> Result<Option<Identity>, ApiError> {
        let persisted = match self.session.load_persisted() {
            Some(session) => session,
            None => return Ok(None),
        };
        self.session.restore(persisted);

        match self.api.get_json::<serde_json::Value>("/api/auth/me").await {
            Ok(_) => {
                // identity() cannot be None here; restore just stored it.
                let identity = match self.session.identity() {
                    Some(identity) => identity,
                    None => return Ok(None),
                };
                info!(user = %identity.id, "Restored persisted session");
                self.connect_bridge(&identity).await;
                let _ = self.events.send(SessionEvent::LoggedIn {
                    identity: identity.clone(),
                });
                Ok(Some(identity))
            }
            Err(ApiError::Unauthorized(_)) | Err(ApiError::SessionExpired(_)) => {
                info!("Persisted session no longer valid, clearing");
                self.session.clear();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Log out. Idempotent: with no session this does nothing, no error
    /// and no duplicate logout announcement.
    ///
    /// With a session: the bridge announces `user_logout` *before* the
    /// channel closes, then the token store and the device trust token are
    /// cleared.
    pub async fn logout(&self) {
        let identity = self.session.identity();
        let bridge = self.bridge.lock().await.take();

        match identity {
            Some(identity) => {
                if let Some(bridge) = bridge {
                    bridge.shutdown_with_logout(&identity).await;
                }
                self.session.clear();
                self.device_trust.clear_device_token();
                let _ = self.events.send(SessionEvent::LoggedOut);
                info!(user = %identity.id, "Logged out");
            }
            None => {
                // Session already gone (never logged in, or torn down by a
                // failed refresh); just make sure no channel lingers.
                if let Some(bridge) = bridge {
                    bridge.shutdown();
                }
            }
        }
    }

    /// Write an established session everywhere it belongs: token store,
    /// device trust and the realtime channel.
    async fn commit_session(
        &self,
        session: &Session,
        device_token: Option<&str>,
        device_id: &str,
    ) {
        self.session.set_session(session.clone());

        if let Some(token) = device_token {
            self.device_trust
                .set_device_token(token, device_id, session.role());
        }

        self.connect_bridge(&session.identity).await;
        let _ = self.events.send(SessionEvent::LoggedIn {
            identity: session.identity.clone(),
        });
    }

    /// Replace any existing channel with a fresh authenticated one. A
    /// connection failure is not fatal; the API session stands on its own
    /// and the application can observe the missing channel.
    async fn connect_bridge(&self, identity: &Identity) {
        let mut guard = self.bridge.lock().await;
        if let Some(old) = guard.take() {
            old.shutdown();
        }

        match RealtimeBridge::connect(
            self.realtime_config.clone(),
            self.session.clone(),
            identity.clone(),
        )
        .await
        {
            Ok(bridge) => *guard = Some(bridge),
            Err(e) => warn!("Failed to connect realtime channel: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MemoryStateStore, MockHttpClient, MockResponse};
    use crate::models::Role;
    use crate::traits::Response;
    use bytes::Bytes;
    use std::time::Duration;

    const BASE: &str = "http://api.test";

    fn test_config() -> SessionConfig {
        SessionConfig {
            api: ApiConfig {
                base_url: BASE.to_string(),
                request_timeout: Duration::from_secs(5),
            },
            realtime: RtConfig {
                // Closed port: bridge connects fail fast and are non-fatal.
                url: "ws://127.0.0.1:59998/ws".to_string(),
                reconnect_attempts: 1,
                reconnect_delay: Duration::from_millis(10),
            },
        }
    }

    fn context(http: MockHttpClient) -> SessionContext {
        SessionContext::new(
            test_config(),
            Arc::new(http),
            Arc::new(MemoryStateStore::new()),
        )
    }

    fn ok(body: &str) -> MockResponse {
        MockResponse::Success(Response::new(200, Bytes::from(body.to_string())))
    }

    #[tokio::test]
    async fn test_login_commits_session_and_device_token() {
        let http = MockHttpClient::new();
        http.set_response(
            "http://api.test/api/auth/master/login",
            ok(r#"{
                "skip_otp": true,
                "access_token": "acc",
                "refresh_token": "ref",
                "user": {"id": "u-1"},
                "device_token": "dev-tok"
            }"#),
        );
        let ctx = context(http);

        let outcome = ctx
            .login(&LoginCredentials::Master {
                email: "m@x.io".to_string(),
                password: "pw".to_string(),
            })
            .await;

        assert!(outcome.is_established());
        assert!(ctx.session().is_authenticated());
        assert_eq!(ctx.session().access_token(), Some("acc".to_string()));
        assert_eq!(
            ctx.device_trust().get_device_token(Role::Master),
            Some("dev-tok".to_string())
        );
    }

    #[tokio::test]
    async fn test_rejected_login_commits_nothing() {
        let http = MockHttpClient::new();
        http.set_response(
            "http://api.test/api/auth/master/login",
            MockResponse::Success(Response::new(
                401,
                Bytes::from(r#"{"error":"Invalid credentials"}"#),
            )),
        );
        let ctx = context(http);

        let outcome = ctx
            .login(&LoginCredentials::Master {
                email: "m@x.io".to_string(),
                password: "wrong".to_string(),
            })
            .await;

        assert!(matches!(
            outcome,
            LoginOutcome::Rejected {
                reason: RejectReason::InvalidCredentials
            }
        ));
        assert!(!ctx.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_login_forwards_role_matching_device_token_only() {
        let http = MockHttpClient::new();
        http.set_response(
            "http://api.test/api/auth/master/login",
            ok(r#"{"otp_session_id": "sess-1", "phone_number": "ma**ed"}"#),
        );
        let ctx = context(http.clone());

        // A token bound to seller must not ride along on a master login.
        let device_id = ctx.device_trust().get_or_create_device_id();
        ctx.device_trust()
            .set_device_token("seller-tok", &device_id, Role::Seller);

        ctx.login(&LoginCredentials::Master {
            email: "m@x.io".to_string(),
            password: "pw".to_string(),
        })
        .await;

        let body = http.get_requests()[0].body.clone().unwrap();
        assert!(!body.contains("seller-tok"));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let http = MockHttpClient::new();
        let ctx = context(http);
        let mut events = ctx.subscribe();

        // No session: both calls are no-ops.
        ctx.logout().await;
        ctx.logout().await;

        assert!(events.try_recv().is_err(), "no events for no-op logout");
    }

    #[tokio::test]
    async fn test_logout_clears_session_and_device_token() {
        let http = MockHttpClient::new();
        http.set_response(
            "http://api.test/api/auth/seller/login",
            ok(r#"{
                "skip_otp": true,
                "access_token": "acc",
                "refresh_token": "ref",
                "user": {"id": "u-2"},
                "device_token": "dev-tok"
            }"#),
        );
        let ctx = context(http);

        ctx.login(&LoginCredentials::Seller {
            trade_id: "TRD-1".to_string(),
            password: "pw".to_string(),
        })
        .await;

        let device_id = ctx.device_trust().get_or_create_device_id();
        ctx.logout().await;

        assert!(!ctx.session().is_authenticated());
        assert_eq!(ctx.device_trust().get_device_token(Role::Seller), None);
        // The device id survives logout.
        assert_eq!(ctx.device_trust().get_or_create_device_id(), device_id);
    }

    #[tokio::test]
    async fn test_restore_session_valid() {
        let state = Arc::new(MemoryStateStore::new());
        let http = MockHttpClient::new();
        http.set_response("http://api.test/api/auth/me", ok(r#"{"user":{"id":"u-1"}}"#));

        // Seed persisted session state the way a previous run would have.
        state.set("token", "acc").unwrap();
        state.set("refresh_token", "ref").unwrap();
        state
            .set("user", r#"{"id":"u-1","role":"master"}"#)
            .unwrap();
        state.set("userType", "master").unwrap();

        let ctx = SessionContext::new(test_config(), Arc::new(http), state);
        let identity = ctx.restore_session().await.unwrap().unwrap();

        assert_eq!(identity.id, "u-1");
        assert_eq!(identity.role, Role::Master);
        assert!(ctx.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_restore_session_nothing_persisted() {
        let http = MockHttpClient::new();
        let ctx = context(http.clone());

        let restored = ctx.restore_session().await.unwrap();

        assert!(restored.is_none());
        assert!(http.get_requests().is_empty(), "no validation call");
    }

    #[tokio::test]
    async fn test_restore_session_rejected_clears_state() {
        let state = Arc::new(MemoryStateStore::new());
        let http = MockHttpClient::new();
        // /auth/me keeps rejecting; the refresh also fails => session dead.
        http.set_response(
            "http://api.test/api/auth/me",
            MockResponse::Success(Response::new(401, Bytes::from(r#"{"error":"expired"}"#))),
        );
        http.set_response(
            "http://api.test/api/auth/refresh",
            MockResponse::Success(Response::new(401, Bytes::from(r#"{"error":"revoked"}"#))),
        );

        state.set("token", "acc").unwrap();
        state.set("refresh_token", "ref").unwrap();
        state
            .set("user", r#"{"id":"u-1","role":"seller"}"#)
            .unwrap();
        state.set("userType", "seller").unwrap();

        let ctx = SessionContext::new(test_config(), Arc::new(http), state.clone());
        let restored = ctx.restore_session().await.unwrap();

        assert!(restored.is_none());
        assert!(!ctx.session().is_authenticated());
        assert_eq!(state.get("token").unwrap(), None);
    }
}
