//! Error types for coalesce.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for coalesce operations.
#[derive(Error, Debug)]
pub enum CoalesceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Clustering error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse failure classes recorded on failed sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Invalid session or file configuration.
    Configuration,
    /// Nothing left to claim for the session's scope.
    ClaimConflict,
    /// Numerical or input failure inside a clustering algorithm.
    Algorithm,
    /// Synthesizer unreachable, timed out, or returned an error.
    ExternalSynthesizer,
    /// Persistence failure.
    Store,
    /// Run was cancelled by the caller.
    Cancelled,
}

impl CoalesceError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Configuration,
            Self::Store(_) | Self::Io(_) | Self::Serialization(_) => ErrorClass::Store,
            Self::Cluster(_) => ErrorClass::Algorithm,
            Self::Synthesis(_) => ErrorClass::ExternalSynthesizer,
            Self::Session(SessionError::Cancelled) => ErrorClass::Cancelled,
            Self::Session(SessionError::NothingToClaim) => ErrorClass::ClaimConflict,
            Self::Session(SessionError::WorkerPool(_)) => ErrorClass::Algorithm,
            Self::Session(_) => ErrorClass::Store,
        }
    }
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("{linkage} linkage requires the euclidean metric, got {metric}")]
    IncompatibleLinkage { linkage: String, metric: String },
}

/// Store-related errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Fragment not found: {0}")]
    FragmentNotFound(u64),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Knowledge unit not found: {0}")]
    UnitNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Malformed record at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Clustering algorithm errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),
}

/// Synthesizer errors.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Session lifecycle errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No unowned fragments available to claim")]
    NothingToClaim,

    #[error("Session cancelled")]
    Cancelled,

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

/// Result type alias for coalesce operations.
pub type Result<T> = std::result::Result<T, CoalesceError>;
