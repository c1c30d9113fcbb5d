//! Credential validation: the first login step for every role.
//!
//! The validator talks to the auth endpoints and normalizes their duck-typed
//! payloads into [`LoginOutcome`] in a single place. It never touches the
//! token store: outcomes are data for the session context to commit.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::api::ApiClient;
use crate::auth::otp::{is_well_formed_code, OtpChallenge};
use crate::models::{
    CustomerRegistration, Identity, LoginCredentials, LoginOutcome, RejectReason, Role, Session,
};
use crate::traits::Response;

/// Wire shape of `POST /api/auth/{role}/login`.
///
/// The server reports the branch taken through optional fields; only
/// [`normalize_login_response`] is allowed to interpret them.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub otp_session_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub skip_otp: Option<bool>,
    /// Masked recipient echo for OTP display (e.g. `03**...**67`).
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub user: Option<UserPayload>,
    #[serde(default, rename = "userType")]
    pub user_type: Option<Role>,
    #[serde(default)]
    pub device_token: Option<String>,
}

/// Wire shape of `POST /api/auth/verify-otp` and
/// `POST /api/auth/user/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOtpResponse {
    /// Customer flow: `false` means the phone number verified but has no
    /// account yet.
    #[serde(default)]
    pub user_exists: Option<bool>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserPayload>,
    #[serde(default, rename = "userType")]
    pub user_type: Option<Role>,
    #[serde(default)]
    pub device_token: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Wire shape of `POST /api/auth/resend-otp`.
#[derive(Debug, Clone, Deserialize)]
struct ResendOtpResponse {
    otp_session_id: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// The subset of the server's user object this core needs; everything else
/// is opaque marketplace data.
#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
    pub id: String,
}

/// Validates primary credentials and OTP codes against the auth endpoints.
pub struct CredentialValidator {
    api: Arc<ApiClient>,
}

impl CredentialValidator {
    /// Create a validator that dispatches through the given API client.
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// Perform the first login step for a role.
    ///
    /// A held device token is forwarded as proof of a previously-trusted
    /// device; the caller is responsible for only passing tokens whose bound
    /// role matches. Shape errors are rejected before any network call.
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
        device_id: &str,
        device_token: Option<&str>,
    ) -> LoginOutcome {
        if let Err(reason) = credentials.validate() {
            return LoginOutcome::Rejected { reason };
        }

        let role = credentials.role();
        let path = format!("/api/auth/{}/login", role.as_str());
        let body = login_body(credentials, device_id, device_token);

        debug!(role = %role, "Submitting login");
        let response = match self.api.post_no_retry(&path, &body).await {
            Ok(response) => response,
            Err(e) => {
                return LoginOutcome::Rejected {
                    reason: RejectReason::Network(e.to_string()),
                }
            }
        };

        if !response.is_success() {
            return LoginOutcome::Rejected {
                reason: reject_for_login(&response),
            };
        }

        let payload: LoginResponse = match response.json() {
            Ok(payload) => payload,
            Err(_) => {
                return LoginOutcome::Rejected {
                    reason: RejectReason::MalformedResponse,
                }
            }
        };

        normalize_login_response(role, payload)
    }

    /// Verify a one-time passcode against an outstanding challenge.
    ///
    /// The code's shape is checked locally first; expiry and consumption are
    /// the server's call and surface as [`RejectReason::OtpInvalid`].
    pub async fn verify_otp(
        &self,
        challenge: &OtpChallenge,
        code: &str,
        device_id: &str,
    ) -> LoginOutcome {
        if !is_well_formed_code(code) {
            return LoginOutcome::Rejected {
                reason: RejectReason::InvalidOtpFormat,
            };
        }

        let body = json!({
            "otp_session_id": challenge.session_id,
            "otp": code,
            "device_id": device_id,
        });

        let response = match self.api.post_no_retry("/api/auth/verify-otp", &body).await {
            Ok(response) => response,
            Err(e) => {
                return LoginOutcome::Rejected {
                    reason: RejectReason::Network(e.to_string()),
                }
            }
        };

        if !response.is_success() {
            return LoginOutcome::Rejected {
                reason: reject_for_otp(&response),
            };
        }

        let payload: VerifyOtpResponse = match response.json() {
            Ok(payload) => payload,
            Err(_) => {
                return LoginOutcome::Rejected {
                    reason: RejectReason::MalformedResponse,
                }
            }
        };

        normalize_verify_response(payload)
    }

    /// Ask the server to resend the code for an existing challenge.
    ///
    /// The same session id is re-issued with extended validity; the masked
    /// recipient may be refreshed.
    pub async fn resend_otp(&self, challenge: &OtpChallenge) -> Result<OtpChallenge, RejectReason> {
        let body = json!({ "otp_session_id": challenge.session_id });

        let response = self
            .api
            .post_no_retry("/api/auth/resend-otp", &body)
            .await
            .map_err(|e| RejectReason::Network(e.to_string()))?;

        if !response.is_success() {
            return Err(reject_for_otp(&response));
        }

        let payload: ResendOtpResponse =
            response.json().map_err(|_| RejectReason::MalformedResponse)?;

        Ok(OtpChallenge::new(
            payload.otp_session_id,
            payload
                .phone_number
                .unwrap_or_else(|| challenge.masked_recipient.clone()),
        ))
    }

    /// Complete the customer registration branch after a verified phone
    /// number turned out to have no account.
    pub async fn register_customer(&self, registration: &CustomerRegistration) -> LoginOutcome {
        if registration.phone_number.trim().is_empty() || registration.name.trim().is_empty() {
            return LoginOutcome::Rejected {
                reason: RejectReason::MissingFields,
            };
        }

        let body = match serde_json::to_value(registration) {
            Ok(body) => body,
            Err(e) => {
                return LoginOutcome::Rejected {
                    reason: RejectReason::Network(e.to_string()),
                }
            }
        };

        let response = match self.api.post_no_retry("/api/auth/user/register", &body).await {
            Ok(response) => response,
            Err(e) => {
                return LoginOutcome::Rejected {
                    reason: RejectReason::Network(e.to_string()),
                }
            }
        };

        if !response.is_success() {
            return LoginOutcome::Rejected {
                reason: reject_for_login(&response),
            };
        }

        let payload: VerifyOtpResponse = match response.json() {
            Ok(payload) => payload,
            Err(_) => {
                return LoginOutcome::Rejected {
                    reason: RejectReason::MalformedResponse,
                }
            }
        };

        normalize_verify_response(payload)
    }
}

/// Build the role-specific login request body.
fn login_body(
    credentials: &LoginCredentials,
    device_id: &str,
    device_token: Option<&str>,
) -> serde_json::Value {
    let mut body = match credentials {
        LoginCredentials::Master { email, password } => json!({
            "email": email,
            "password": password,
        }),
        LoginCredentials::Seller { trade_id, password } => json!({
            "trade_id": trade_id,
            "password": password,
        }),
        LoginCredentials::Outlet {
            access_code,
            password,
        } => json!({
            "outlet_access_code": access_code,
            "password": password,
        }),
        // Customers always go through OTP; no device token applies.
        LoginCredentials::Customer { phone_number } => json!({
            "phone_number": phone_number,
        }),
    };

    if !matches!(credentials, LoginCredentials::Customer { .. }) {
        body["device_id"] = json!(device_id);
        if let Some(token) = device_token {
            body["device_token"] = json!(token);
        }
    }

    body
}

/// Map a non-2xx login/registration response to a rejection reason.
fn reject_for_login(response: &Response) -> RejectReason {
    match response.status {
        400 => RejectReason::MissingFields,
        401 => RejectReason::InvalidCredentials,
        403 => RejectReason::AccountBlocked,
        status => RejectReason::Server {
            status,
            message: response.error_message(),
        },
    }
}

/// Map a non-2xx OTP response to a rejection reason. Wrong, consumed and
/// expired codes are indistinguishable to the caller by design.
fn reject_for_otp(response: &Response) -> RejectReason {
    match response.status {
        400 | 401 | 404 | 410 => RejectReason::OtpInvalid,
        403 => RejectReason::AccountBlocked,
        status => RejectReason::Server {
            status,
            message: response.error_message(),
        },
    }
}

/// Normalize the duck-typed login payload into the outcome union.
///
/// The discriminant is the explicit `skip_otp` flag: a session is only
/// established when `skip_otp` is `true` *and* the credential pair is
/// present. `access_token` presence alone is never trusted. Absent that, an
/// `otp_session_id` means the OTP step is required.
pub fn normalize_login_response(role: Role, payload: LoginResponse) -> LoginOutcome {
    if payload.skip_otp == Some(true) {
        if let (Some(access_token), Some(refresh_token), Some(user)) = (
            payload.access_token,
            payload.refresh_token,
            payload.user,
        ) {
            let session = Session {
                access_token,
                refresh_token,
                identity: Identity {
                    id: user.id,
                    role: payload.user_type.unwrap_or(role),
                },
            };
            return LoginOutcome::SessionEstablished {
                session,
                device_token: payload.device_token,
            };
        }
        return LoginOutcome::Rejected {
            reason: RejectReason::MalformedResponse,
        };
    }

    if let Some(session_id) = payload.otp_session_id {
        return LoginOutcome::OtpRequired {
            challenge: OtpChallenge::new(session_id, payload.phone_number.unwrap_or_default()),
        };
    }

    LoginOutcome::Rejected {
        reason: RejectReason::MalformedResponse,
    }
}

/// Normalize the OTP-verification / registration payload.
pub fn normalize_verify_response(payload: VerifyOtpResponse) -> LoginOutcome {
    if payload.user_exists == Some(false) {
        return LoginOutcome::RegistrationRequired {
            phone_number: payload.phone_number.unwrap_or_default(),
        };
    }

    if let (Some(access_token), Some(refresh_token), Some(user), Some(role)) = (
        payload.access_token,
        payload.refresh_token,
        payload.user,
        payload.user_type,
    ) {
        let session = Session {
            access_token,
            refresh_token,
            identity: Identity { id: user.id, role },
        };
        return LoginOutcome::SessionEstablished {
            session,
            device_token: payload.device_token,
        };
    }

    LoginOutcome::Rejected {
        reason: RejectReason::MalformedResponse,
    }
}
