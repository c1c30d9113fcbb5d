//! Authorized API surface.
//!
//! Business endpoints are opaque to this crate; what lives here is the
//! request interceptor that authorizes every outbound call and coordinates
//! the refresh-and-replay on credential expiry.

pub mod client;

pub use client::{ApiClient, ApiConfig, ApiError, Method, DEFAULT_REQUEST_TIMEOUT_SECS};
