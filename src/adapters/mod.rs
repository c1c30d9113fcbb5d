//! Adapter implementations of the trait abstractions.
//!
//! Production adapters perform real I/O (reqwest for HTTP, a JSON file for
//! persistent state); the `mock` submodule provides test doubles.

pub mod file_store;
pub mod mock;
pub mod reqwest_http;

pub use file_store::FileStateStore;
pub use reqwest_http::ReqwestHttpClient;
