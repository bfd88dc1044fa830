//! Error types for the redline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all redline operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Data store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Result blob errors ---
    #[error("Result store error: {0}")]
    ResultStore(#[from] ResultStoreError),

    // --- Wire encoding errors ---
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    // --- Fact learning / parsing errors ---
    #[error("Learning error: {0}")]
    Learning(#[from] LearningError),

    // --- Output hook errors ---
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    // --- Contact channel errors ---
    #[error("Contact error: {0}")]
    Contact(#[from] ContactError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    Conflict { kind: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("No result stored for link {0}")]
    NotFound(String),

    #[error("Refusing to store result under invalid id: {0:?}")]
    InvalidId(String),

    #[error("Result store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("Unknown parser module: {0}")]
    UnknownParser(String),

    #[error("Invalid pattern for trait {trait_name}: {reason}")]
    InvalidPattern { trait_name: String, reason: String },

    #[error("Parsing failed in {module}: {reason}")]
    ParseFailed { module: String, reason: String },
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("Output hook for executor {executor} failed: {reason}")]
    Failed { executor: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("Contact not registered: {0}")]
    NotRegistered(String),

    #[error("Contact {name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },
}
