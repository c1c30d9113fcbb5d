//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bbhc_client::adapters::mock::MemoryStateStore;
use bbhc_client::adapters::ReqwestHttpClient;
use bbhc_client::api::ApiConfig;
use bbhc_client::models::{Identity, Role, Session};
use bbhc_client::realtime::RtConfig;
use bbhc_client::traits::StateStore;
use bbhc_client::{SessionConfig, SessionContext};

/// Config pointed at a wiremock server; the realtime endpoint is a closed
/// port so bridge connections fail fast and stay non-fatal.
pub fn config_for(server_uri: &str) -> SessionConfig {
    SessionConfig {
        api: ApiConfig {
            base_url: server_uri.to_string(),
            request_timeout: Duration::from_secs(2),
        },
        realtime: RtConfig {
            url: "ws://127.0.0.1:59998/ws".to_string(),
            reconnect_attempts: 1,
            reconnect_delay: Duration::from_millis(10),
        },
    }
}

/// A context with in-memory state over the real reqwest transport.
pub fn context_for(server_uri: &str) -> SessionContext {
    context_with_state(server_uri, Arc::new(MemoryStateStore::new()))
}

/// Opt-in log output while debugging: `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A context over an explicit state store (to inspect or pre-seed it).
pub fn context_with_state(server_uri: &str, state: Arc<dyn StateStore>) -> SessionContext {
    init_tracing();
    SessionContext::new(
        config_for(server_uri),
        Arc::new(ReqwestHttpClient::new()),
        state,
    )
}

/// A session as the server would have issued it.
pub fn seeded_session(access: &str, refresh: &str, role: Role) -> Session {
    Session {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        identity: Identity {
            id: "u-1".to_string(),
            role,
        },
    }
}
