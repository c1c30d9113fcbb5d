//! Realtime session bridge.
//!
//! Keeps the WebSocket channel's authentication in step with the HTTP
//! session: the connection is opened with the current access token, the
//! identity announcement is re-emitted after every (re)connect, and an
//! explicit logout is announced before teardown. Reconnection uses a fixed
//! delay with a bounded number of attempts; tokens for reconnects are read
//! fresh from the session store so a post-refresh reconnect carries the new
//! credential.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::messages::{parse_incoming, RtIncomingMessage, RtOutgoingMessage};
use crate::models::Identity;
use crate::session::SessionStore;

/// Realtime connection errors.
#[derive(Debug, Clone)]
pub enum RtError {
    ConnectionFailed(String),
    Disconnected,
    SendFailed(String),
    NotAuthenticated,
}

impl std::fmt::Display for RtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            RtError::Disconnected => write!(f, "Disconnected from server"),
            RtError::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            RtError::NotAuthenticated => write!(f, "No session to authenticate the channel with"),
        }
    }
}

impl std::error::Error for RtError {}

/// Realtime connection state.
#[derive(Debug, Clone, PartialEq)]
pub enum RtConnectionState {
    Connected,
    Reconnecting { attempt: u8 },
    Disconnected,
}

/// Configuration for the realtime bridge.
///
/// Reconnection is a fixed delay with a retry ceiling; once the ceiling is
/// reached the bridge reports `Disconnected` instead of retrying forever.
#[derive(Debug, Clone)]
pub struct RtConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:5000/ws`.
    pub url: String,
    /// Maximum reconnection attempts before giving up.
    pub reconnect_attempts: u8,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/ws".to_string(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Commands from the bridge handle to the connection loop.
enum BridgeCommand {
    Emit(RtOutgoingMessage),
    /// Optionally announce, then close the channel and stop.
    Close { announce: Option<RtOutgoingMessage> },
}

/// Handle to the realtime channel.
///
/// Incoming events arrive through broadcast receivers returned by
/// [`RealtimeBridge::subscribe`]; the receivers die with the bridge, so no
/// listener leaks across reconnects or logouts.
pub struct RealtimeBridge {
    command_tx: mpsc::Sender<BridgeCommand>,
    incoming_tx: broadcast::Sender<RtIncomingMessage>,
    state_rx: watch::Receiver<RtConnectionState>,
    shutdown: Arc<AtomicBool>,
}

impl RealtimeBridge {
    /// Open the channel with the current access token and announce the
    /// identity once connected.
    pub async fn connect(
        config: RtConfig,
        session: Arc<SessionStore>,
        identity: Identity,
    ) -> Result<Self, RtError> {
        let token = session.access_token().ok_or(RtError::NotAuthenticated)?;
        let url = authenticated_url(&config.url, &token);

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| RtError::ConnectionFailed(e.to_string()))?;

        info!("Connected to realtime server at {}", config.url);

        let (ws_sink, ws_stream) = ws_stream.split();

        let (command_tx, command_rx) = mpsc::channel::<BridgeCommand>(100);
        let (incoming_tx, _) = broadcast::channel::<RtIncomingMessage>(100);
        let (state_tx, state_rx) = watch::channel(RtConnectionState::Connected);

        let shutdown = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_connection_loop(
            config,
            session,
            identity,
            ws_sink,
            ws_stream,
            command_rx,
            incoming_tx.clone(),
            state_tx,
            shutdown.clone(),
        ));

        Ok(Self {
            command_tx,
            incoming_tx,
            state_rx,
            shutdown,
        })
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state_rx.borrow(), RtConnectionState::Connected)
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> RtConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<RtConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to incoming realtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<RtIncomingMessage> {
        self.incoming_tx.subscribe()
    }

    /// Send a message to the server.
    pub async fn emit(&self, message: RtOutgoingMessage) -> Result<(), RtError> {
        self.command_tx
            .send(BridgeCommand::Emit(message))
            .await
            .map_err(|e| RtError::SendFailed(e.to_string()))
    }

    /// Announce the logout and then tear the channel down.
    ///
    /// The announcement rides in the close command itself; the loop must
    /// still be running to deliver it, so the shutdown flag stays unset
    /// until the command is processed.
    pub async fn shutdown_with_logout(&self, identity: &Identity) {
        let _ = self
            .command_tx
            .send(BridgeCommand::Close {
                announce: Some(RtOutgoingMessage::logout(identity)),
            })
            .await;
    }

    /// Tear the channel down without any announcement.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.try_send(BridgeCommand::Close { announce: None });
    }
}

impl Drop for RealtimeBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Append the access token as a query credential.
fn authenticated_url(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}token={}", base, separator, urlencoding::encode(token))
}

/// Serialize and send one outgoing message over the sink.
async fn send_outgoing(sink: &mut WsSink, message: &RtOutgoingMessage) -> Result<(), String> {
    let json = serde_json::to_string(message).map_err(|e| e.to_string())?;
    debug!("Sending realtime message: {}", json);
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

/// Run the main connection loop with fixed-backoff reconnection.
#[allow(clippy::too_many_arguments)]
async fn run_connection_loop(
    config: RtConfig,
    session: Arc<SessionStore>,
    identity: Identity,
    mut ws_sink: WsSink,
    mut ws_stream: WsStream,
    mut command_rx: mpsc::Receiver<BridgeCommand>,
    incoming_tx: broadcast::Sender<RtIncomingMessage>,
    state_tx: watch::Sender<RtConnectionState>,
    shutdown: Arc<AtomicBool>,
) {
    // The server does not remember identity across transport reconnects;
    // announce on entry and again after every successful reconnect.
    if let Err(e) = send_outgoing(&mut ws_sink, &RtOutgoingMessage::authenticated(&identity)).await
    {
        warn!("Failed to send authentication announcement: {}", e);
    }

    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("Shutdown signal received, closing realtime channel");
            break;
        }

        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let parsed = parse_incoming(&text);
                        if let RtIncomingMessage::ParseError { error, .. } = &parsed {
                            warn!("Unparseable realtime frame: {}", error);
                        }
                        // No receivers is fine; events are fan-out only.
                        let _ = incoming_tx.send(parsed);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("Received ping, sending pong");
                        let _ = ws_sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Received close frame from realtime server");
                        match recover(&config, &session, &identity, &state_tx, &shutdown).await {
                            Some((new_sink, new_stream)) => {
                                ws_sink = new_sink;
                                ws_stream = new_stream;
                            }
                            None => break,
                        }
                    }
                    Some(Err(e)) => {
                        error!("Realtime channel error: {}", e);
                        match recover(&config, &session, &identity, &state_tx, &shutdown).await {
                            Some((new_sink, new_stream)) => {
                                ws_sink = new_sink;
                                ws_stream = new_stream;
                            }
                            None => break,
                        }
                    }
                    None => {
                        info!("Realtime stream ended");
                        match recover(&config, &session, &identity, &state_tx, &shutdown).await {
                            Some((new_sink, new_stream)) => {
                                ws_sink = new_sink;
                                ws_stream = new_stream;
                            }
                            None => break,
                        }
                    }
                    Some(Ok(_)) => {
                        // Ignore other frame types (Pong, Binary, Frame)
                    }
                }
            }
            command = command_rx.recv() => {
                match command {
                    Some(BridgeCommand::Emit(message)) => {
                        if let Err(e) = send_outgoing(&mut ws_sink, &message).await {
                            error!("Failed to send realtime message: {}", e);
                        }
                    }
                    Some(BridgeCommand::Close { announce }) => {
                        if let Some(message) = announce {
                            if let Err(e) = send_outgoing(&mut ws_sink, &message).await {
                                warn!("Failed to send logout announcement: {}", e);
                            }
                        }
                        let _ = ws_sink.close().await;
                        break;
                    }
                    None => {
                        debug!("Bridge handle dropped, closing channel");
                        let _ = ws_sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    info!("Realtime connection loop ended");
    let _ = state_tx.send(RtConnectionState::Disconnected);
}

/// Reconnect and re-announce identity; `None` means the loop should stop.
async fn recover(
    config: &RtConfig,
    session: &Arc<SessionStore>,
    identity: &Identity,
    state_tx: &watch::Sender<RtConnectionState>,
    shutdown: &Arc<AtomicBool>,
) -> Option<(WsSink, WsStream)> {
    let _ = state_tx.send(RtConnectionState::Disconnected);
    let (mut sink, stream) = attempt_reconnect(config, session, state_tx, shutdown).await?;
    let _ = state_tx.send(RtConnectionState::Connected);
    if let Err(e) = send_outgoing(&mut sink, &RtOutgoingMessage::authenticated(identity)).await {
        warn!("Failed to re-announce after reconnect: {}", e);
    }
    Some((sink, stream))
}

/// Attempt to reconnect with a fixed delay and a retry ceiling.
///
/// The access token is read fresh from the session store on each attempt; a
/// cleared session stops the retries immediately.
async fn attempt_reconnect(
    config: &RtConfig,
    session: &Arc<SessionStore>,
    state_tx: &watch::Sender<RtConnectionState>,
    shutdown: &Arc<AtomicBool>,
) -> Option<(WsSink, WsStream)> {
    for attempt in 1..=config.reconnect_attempts {
        if shutdown.load(Ordering::SeqCst) {
            debug!("Shutdown requested during reconnection");
            return None;
        }

        let _ = state_tx.send(RtConnectionState::Reconnecting { attempt });
        info!(
            "Reconnection attempt {} of {}, waiting {:?}",
            attempt, config.reconnect_attempts, config.reconnect_delay
        );
        tokio::time::sleep(config.reconnect_delay).await;

        if shutdown.load(Ordering::SeqCst) {
            debug!("Shutdown requested during backoff");
            return None;
        }

        let token = match session.access_token() {
            Some(token) => token,
            None => {
                warn!("Session gone while reconnecting, giving up");
                return None;
            }
        };

        match connect_async(&authenticated_url(&config.url, &token)).await {
            Ok((ws_stream, _)) => {
                info!("Reconnected successfully on attempt {}", attempt);
                return Some(ws_stream.split());
            }
            Err(e) => {
                warn!("Reconnection attempt {} failed: {}", attempt, e);
            }
        }
    }

    error!(
        "Failed to reconnect after {} attempts, giving up",
        config.reconnect_attempts
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MemoryStateStore;
    use crate::models::{Role, Session};

    #[test]
    fn test_rt_error_display() {
        assert_eq!(
            RtError::ConnectionFailed("timeout".to_string()).to_string(),
            "Connection failed: timeout"
        );
        assert_eq!(RtError::Disconnected.to_string(), "Disconnected from server");
        assert_eq!(
            RtError::SendFailed("channel closed".to_string()).to_string(),
            "Send failed: channel closed"
        );
        assert_eq!(
            RtError::NotAuthenticated.to_string(),
            "No session to authenticate the channel with"
        );
    }

    #[test]
    fn test_rt_config_default() {
        let config = RtConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:5000/ws");
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_connection_state_equality() {
        assert_eq!(RtConnectionState::Connected, RtConnectionState::Connected);
        assert_eq!(
            RtConnectionState::Reconnecting { attempt: 1 },
            RtConnectionState::Reconnecting { attempt: 1 }
        );
        assert_ne!(
            RtConnectionState::Reconnecting { attempt: 1 },
            RtConnectionState::Reconnecting { attempt: 2 }
        );
    }

    #[test]
    fn test_authenticated_url_encodes_token() {
        assert_eq!(
            authenticated_url("ws://host/ws", "a b+c"),
            "ws://host/ws?token=a%20b%2Bc"
        );
        assert_eq!(
            authenticated_url("ws://host/ws?v=2", "t"),
            "ws://host/ws?v=2&token=t"
        );
    }

    #[tokio::test]
    async fn test_connect_without_session_fails() {
        let session = Arc::new(SessionStore::new(Arc::new(MemoryStateStore::new())));
        let identity = Identity {
            id: "u-1".to_string(),
            role: Role::Master,
        };

        let result = RealtimeBridge::connect(RtConfig::default(), session, identity).await;
        assert!(matches!(result, Err(RtError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let session = Arc::new(SessionStore::new(Arc::new(MemoryStateStore::new())));
        session.set_session(Session {
            access_token: "acc".to_string(),
            refresh_token: "ref".to_string(),
            identity: Identity {
                id: "u-1".to_string(),
                role: Role::Master,
            },
        });
        let identity = session.identity().unwrap();

        let config = RtConfig {
            url: "ws://127.0.0.1:59999/ws".to_string(),
            reconnect_attempts: 1,
            reconnect_delay: Duration::from_millis(10),
        };

        let result = RealtimeBridge::connect(config, session, identity).await;
        assert!(matches!(result, Err(RtError::ConnectionFailed(_))));
    }
}
