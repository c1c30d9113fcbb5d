//! BBHC client core - session and token lifecycle for the marketplace apps
//!
//! This library owns the engineering-heavy slice of the client: credential
//! validation (with OTP and device trust), the token store, the single-flight
//! refresh coordinator behind the request interceptor, and the realtime
//! session bridge. Marketplace business payloads pass through it opaquely.

pub mod adapters;
pub mod api;
pub mod auth;
pub mod context;
pub mod models;
pub mod realtime;
pub mod session;
pub mod traits;

pub use context::{SessionConfig, SessionContext};
pub use models::{
    CustomerRegistration, Identity, LoginCredentials, LoginOutcome, RejectReason, Role, Session,
};
