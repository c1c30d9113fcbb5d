//! Realtime channel module.
//!
//! This module keeps the persistent WebSocket channel's authentication
//! state synchronized with the HTTP session:
//! - Identity announcements on connect, reconnect and logout
//! - Bounded fixed-delay reconnection
//! - Opaque pass-through of marketplace events

pub mod bridge;
pub mod messages;

pub use bridge::{RealtimeBridge, RtConfig, RtConnectionState, RtError};
pub use messages::{parse_incoming, RtIncomingMessage, RtOutgoingMessage};
