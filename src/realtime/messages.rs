//! Realtime channel messages.
//!
//! The channel carries identity announcements outward and marketplace events
//! inward. Business events stay opaque JSON; this core only interprets the
//! connection-level messages.

use serde::{Deserialize, Serialize};

use crate::models::{Identity, Role};

/// Outbound messages from the client to the realtime server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RtOutgoingMessage {
    /// Associate this connection with the authenticated session. Sent after
    /// every connect and reconnect. The server is not assumed to remember
    /// identity across a transport-level reconnect.
    #[serde(rename = "user_authenticated")]
    UserAuthenticated { user_id: String, user_type: Role },
    /// Announce an explicit logout before the channel is torn down.
    #[serde(rename = "user_logout")]
    UserLogout { user_id: String, user_type: Role },
}

impl RtOutgoingMessage {
    /// The authenticated-announcement for an identity.
    pub fn authenticated(identity: &Identity) -> Self {
        RtOutgoingMessage::UserAuthenticated {
            user_id: identity.id.clone(),
            user_type: identity.role,
        }
    }

    /// The logout announcement for an identity.
    pub fn logout(identity: &Identity) -> Self {
        RtOutgoingMessage::UserLogout {
            user_id: identity.id.clone(),
            user_type: identity.role,
        }
    }
}

/// Inbound messages from the realtime server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum RtIncomingMessage {
    /// Connection confirmation from the server.
    #[serde(rename = "connected")]
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    /// Keep-alive reply.
    #[serde(rename = "pong")]
    Pong,
    /// Any other server event; marketplace payloads pass through opaque.
    #[serde(skip)]
    Event(serde_json::Value),
    /// The frame was not valid JSON (kept for debugging, never fatal).
    #[serde(skip)]
    ParseError { error: String, raw: String },
}

/// Parse a raw text frame, degrading gracefully: unknown event types pass
/// through as [`RtIncomingMessage::Event`], non-JSON frames surface as
/// [`RtIncomingMessage::ParseError`].
pub fn parse_incoming(text: &str) -> RtIncomingMessage {
    match serde_json::from_str::<RtIncomingMessage>(text) {
        Ok(message) => message,
        Err(_) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => RtIncomingMessage::Event(value),
            Err(e) => RtIncomingMessage::ParseError {
                error: e.to_string(),
                raw: text.to_string(),
            },
        },
    }
}
