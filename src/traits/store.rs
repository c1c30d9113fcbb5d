//! Persistent state store trait abstraction.
//!
//! The web client keeps its session and device state in `localStorage`;
//! this trait is the equivalent key-value surface, enabling dependency
//! injection and mocking in tests.

/// State store operation errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Failed to read a value
    ReadFailed(String),
    /// Failed to write a value
    WriteFailed(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// IO error
    Io(String),
    /// Other error
    Other(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ReadFailed(msg) => write!(f, "Failed to read value: {}", msg),
            StoreError::WriteFailed(msg) => write!(f, "Failed to write value: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StoreError::Io(msg) => write!(f, "IO error: {}", msg),
            StoreError::Other(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Trait for persistent key-value state.
///
/// Implementations include the production JSON-file store and an in-memory
/// store for testing. Operations are synchronous; the production store does
/// small local file writes, which matches how the original client used
/// browser storage.
///
/// # Example
///
/// ```ignore
/// use bbhc_client::traits::StateStore;
///
/// fn remember<S: StateStore>(store: &S) -> Result<(), StoreError> {
///     store.set("token", "abc123")?;
///     assert_eq!(store.get("token")?, Some("abc123".to_string()));
///     store.remove("token")
/// }
/// ```
pub trait StateStore: Send + Sync {
    /// Read a value by key.
    ///
    /// # Returns
    /// - `Ok(Some(value))` if the key exists
    /// - `Ok(None)` if the key is absent
    /// - `Err(error)` if the read failed
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value under a key, replacing any existing value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
