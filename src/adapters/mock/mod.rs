//! Mock adapters for testing.
//!
//! These provide configurable test doubles for the trait abstractions,
//! letting tests script responses and verify interactions without real I/O.

pub mod http;
pub mod store;

pub use http::{MockHttpClient, MockResponse, RecordedRequest};
pub use store::MemoryStateStore;
