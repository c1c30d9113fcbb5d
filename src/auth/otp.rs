//! OTP challenge data and client-side code checks.
//!
//! A challenge identifies an outstanding one-time-passcode verification on
//! the server. The client never judges expiry locally; it only performs the
//! cheap shape check before spending a network round-trip, and surfaces the
//! server's verdict otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of digits in a verification code.
pub const OTP_LENGTH: usize = 6;

/// A server-issued OTP verification session.
///
/// Created when a login requires OTP (or by an explicit resend); consumed
/// exactly once by a successful verification. The same `session_id` may be
/// resent to extend its validity; a consumed or expired id is rejected by
/// the server, not locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    /// Opaque server-side session id.
    pub session_id: String,
    /// Masked destination the code was sent to, for display (e.g. `03**...**67`).
    pub masked_recipient: String,
    /// When the client learned about this challenge.
    pub created_at: DateTime<Utc>,
}

impl OtpChallenge {
    /// Build a challenge from a login response.
    pub fn new(session_id: String, masked_recipient: String) -> Self {
        Self {
            session_id,
            masked_recipient,
            created_at: Utc::now(),
        }
    }
}

/// Check that a code is exactly [`OTP_LENGTH`] ASCII digits.
///
/// Run before any network call; a malformed code never reaches the server.
pub fn is_well_formed_code(code: &str) -> bool {
    code.len() == OTP_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}
