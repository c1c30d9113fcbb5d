//! Authentication module.
//!
//! This module provides the first half of the session lifecycle:
//! - Credential validation for each marketplace role
//! - OTP challenge data and client-side code checks
//! - Role-scoped device trust (skip-OTP for recognized devices)

pub mod device_trust;
pub mod otp;
pub mod validator;

pub use device_trust::DeviceTrustStore;
pub use otp::{is_well_formed_code, OtpChallenge, OTP_LENGTH};
pub use validator::{CredentialValidator, LoginResponse, VerifyOtpResponse};
