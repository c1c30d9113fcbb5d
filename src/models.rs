//! Core domain types for the session lifecycle.
//!
//! These types are the contract between the credential validator, the token
//! store and the application: roles, identities, the session credential pair,
//! per-role login credentials and the discriminated login outcome.

use serde::{Deserialize, Serialize};

use crate::auth::otp::OtpChallenge;

/// The four marketplace roles that can hold a session.
///
/// Serialized forms match the `userType` strings used by the backend
/// (`master`, `seller`, `outlet_man`, `user`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Platform administrator.
    #[serde(rename = "master")]
    Master,
    /// Seller account identified by trade id.
    #[serde(rename = "seller")]
    Seller,
    /// Outlet operator identified by access code.
    #[serde(rename = "outlet_man")]
    Outlet,
    /// Phone-number based customer.
    #[serde(rename = "user")]
    Customer,
}

impl Role {
    /// The wire string for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Seller => "seller",
            Role::Outlet => "outlet_man",
            Role::Customer => "user",
        }
    }

    /// Parse a wire string back into a role.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "master" => Some(Role::Master),
            "seller" => Some(Role::Seller),
            "outlet_man" => Some(Role::Outlet),
            "user" => Some(Role::Customer),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated identity associated with a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Server-side user id.
    pub id: String,
    /// The role this identity is authenticated as.
    pub role: Role,
}

/// An established session: the credential pair plus who it belongs to.
///
/// Owned exclusively by [`crate::session::SessionStore`]; everything else
/// receives snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Short-lived bearer credential for API calls.
    pub access_token: String,
    /// Longer-lived credential exchanged for new access tokens.
    pub refresh_token: String,
    /// The authenticated identity.
    pub identity: Identity,
}

impl Session {
    /// The role this session is authenticated as.
    pub fn role(&self) -> Role {
        self.identity.role
    }
}

/// Per-role primary credentials for the first login step.
#[derive(Debug, Clone)]
pub enum LoginCredentials {
    /// Administrator: email + password.
    Master { email: String, password: String },
    /// Seller: trade id + password.
    Seller { trade_id: String, password: String },
    /// Outlet operator: outlet access code + password.
    Outlet {
        access_code: String,
        password: String,
    },
    /// Customer: phone number only; always goes through OTP.
    Customer { phone_number: String },
}

impl LoginCredentials {
    /// The role these credentials authenticate.
    pub fn role(&self) -> Role {
        match self {
            LoginCredentials::Master { .. } => Role::Master,
            LoginCredentials::Seller { .. } => Role::Seller,
            LoginCredentials::Outlet { .. } => Role::Outlet,
            LoginCredentials::Customer { .. } => Role::Customer,
        }
    }

    /// Client-side shape check, run before any network call.
    ///
    /// Empty required fields reject with [`RejectReason::MissingFields`];
    /// a customer phone number shorter than 10 digits rejects with
    /// [`RejectReason::InvalidPhoneNumber`].
    pub fn validate(&self) -> Result<(), RejectReason> {
        match self {
            LoginCredentials::Master { email, password } => {
                if email.trim().is_empty() || password.is_empty() {
                    return Err(RejectReason::MissingFields);
                }
            }
            LoginCredentials::Seller { trade_id, password } => {
                if trade_id.trim().is_empty() || password.is_empty() {
                    return Err(RejectReason::MissingFields);
                }
            }
            LoginCredentials::Outlet {
                access_code,
                password,
            } => {
                if access_code.trim().is_empty() || password.is_empty() {
                    return Err(RejectReason::MissingFields);
                }
            }
            LoginCredentials::Customer { phone_number } => {
                let digits = phone_number.chars().filter(|c| c.is_ascii_digit()).count();
                if phone_number.trim().is_empty() {
                    return Err(RejectReason::MissingFields);
                }
                if digits < 10 {
                    return Err(RejectReason::InvalidPhoneNumber);
                }
            }
        }
        Ok(())
    }
}

/// Profile fields collected when a verified phone number has no account yet.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerRegistration {
    pub phone_number: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Why a login or verification attempt was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// A required field was empty; caught before any network call.
    #[error("missing required fields")]
    MissingFields,
    /// Customer phone number failed the client-side shape check.
    #[error("invalid phone number")]
    InvalidPhoneNumber,
    /// OTP code failed the client-side shape check (6 digits).
    #[error("invalid code format")]
    InvalidOtpFormat,
    /// Server rejected the primary credentials.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Account is blacklisted or deactivated.
    #[error("account is blocked")]
    AccountBlocked,
    /// Server rejected the OTP: wrong code, or the challenge was consumed
    /// or expired.
    #[error("invalid or expired code")]
    OtpInvalid,
    /// The server response fit no known shape.
    #[error("malformed server response")]
    MalformedResponse,
    /// Transport failure; not retried automatically.
    #[error("network error: {0}")]
    Network(String),
    /// Any other server error status.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

/// The discriminated result of a login, OTP verification or registration
/// attempt.
///
/// The backend reports these branches through optional response fields; the
/// validator normalizes them into this union in one place so downstream code
/// never inspects ad hoc payload shapes.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Credentials (or a trusted device token) were accepted and a session
    /// was issued. If the server also issued a `device_token`, the caller
    /// must persist it scoped to the role that logged in.
    SessionEstablished {
        session: Session,
        device_token: Option<String>,
    },
    /// Credentials were valid but no trusted device token was accepted;
    /// the caller must verify the OTP challenge.
    OtpRequired { challenge: OtpChallenge },
    /// Customer flow only: the phone number verified correctly but has no
    /// account; the caller must collect profile fields and register.
    RegistrationRequired { phone_number: String },
    /// The attempt was rejected.
    Rejected { reason: RejectReason },
}

impl LoginOutcome {
    /// Convenience predicate for tests and callers that only care about
    /// success.
    pub fn is_established(&self) -> bool {
        matches!(self, LoginOutcome::SessionEstablished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_strings() {
        assert_eq!(Role::Master.as_str(), "master");
        assert_eq!(Role::Seller.as_str(), "seller");
        assert_eq!(Role::Outlet.as_str(), "outlet_man");
        assert_eq!(Role::Customer.as_str(), "user");
    }

    #[test]
    fn test_role_parse_round_trip() {
        for role in [Role::Master, Role::Seller, Role::Outlet, Role::Customer] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("admin"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn test_role_serde_uses_wire_strings() {
        assert_eq!(serde_json::to_string(&Role::Outlet).unwrap(), "\"outlet_man\"");
        let parsed: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(parsed, Role::Customer);
    }

    #[test]
    fn test_session_serialization_round_trip() {
        let session = Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            identity: Identity {
                id: "user-1".to_string(),
                role: Role::Seller,
            },
        };
        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
        assert_eq!(parsed.role(), Role::Seller);
    }

    #[test]
    fn test_validate_missing_fields() {
        let creds = LoginCredentials::Master {
            email: "".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(creds.validate(), Err(RejectReason::MissingFields));

        let creds = LoginCredentials::Outlet {
            access_code: "OUT-77".to_string(),
            password: "".to_string(),
        };
        assert_eq!(creds.validate(), Err(RejectReason::MissingFields));
    }

    #[test]
    fn test_validate_customer_phone_length() {
        let creds = LoginCredentials::Customer {
            phone_number: "12345".to_string(),
        };
        assert_eq!(creds.validate(), Err(RejectReason::InvalidPhoneNumber));

        let creds = LoginCredentials::Customer {
            phone_number: "03001234567".to_string(),
        };
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_complete_credentials() {
        let creds = LoginCredentials::Seller {
            trade_id: "TRD-100".to_string(),
            password: "secret".to_string(),
        };
        assert!(creds.validate().is_ok());
        assert_eq!(creds.role(), Role::Seller);
    }

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(RejectReason::MissingFields.to_string(), "missing required fields");
        assert_eq!(
            RejectReason::Network("connection refused".to_string()).to_string(),
            "network error: connection refused"
        );
        assert_eq!(
            RejectReason::Server {
                status: 500,
                message: "boom".to_string()
            }
            .to_string(),
            "server error (500): boom"
        );
    }

    #[test]
    fn test_customer_registration_optional_fields_skipped() {
        let reg = CustomerRegistration {
            phone_number: "03001234567".to_string(),
            name: "Asad".to_string(),
            email: None,
            address: None,
        };
        let json = serde_json::to_string(&reg).unwrap();
        assert!(!json.contains("email"));
        assert!(!json.contains("address"));
    }
}
