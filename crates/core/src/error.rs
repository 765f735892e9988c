//! Error types for the Advisor domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them and [`Error::kind`] classifies any failure into one of the
//! categories callers are expected to react to.

use thiserror::Error;

/// The top-level error type for all Advisor operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Input validation ---
    #[error("Validation error: {0}")]
    Validation(String),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Ingestion errors ---
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    // --- Unknown conversation, job, etc. ---
    #[error("Not found: {0}")]
    NotFound(String),

    // --- Caller cancelled an in-flight operation ---
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error categories. Transport layers map these onto status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Provider,
    Conflict,
    Integrity,
    PrivacyRejected,
    NotFound,
    Cancelled,
    Internal,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Memory(e) => e.kind(),
            Self::Ingest(e) => e.kind(),
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Config { .. } | Self::Serialization(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::Network(_)
            | Self::StreamInterrupted(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Memory entry not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {id}: expected version {expected}, current version is {actual}")]
    Conflict {
        id: String,
        expected: u32,
        actual: u32,
    },

    #[error("Embedding dimension mismatch for {id}: store expects {expected} ({model}), got {actual}")]
    DimensionMismatch {
        id: String,
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding model mismatch for {id}: store uses '{expected}', entry uses '{actual}'")]
    ModelMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Corrupted entry {id}: {reason}")]
    Corrupted { id: String, reason: String },

    #[error("Memory entry {0} is tombstoned")]
    Tombstoned(String),

    #[error("Invalid memory operation: {0}")]
    Invalid(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MemoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::DimensionMismatch { .. } | Self::ModelMismatch { .. } | Self::Corrupted { .. } => {
                ErrorKind::Integrity
            }
            Self::Tombstoned(_) | Self::Invalid(_) => ErrorKind::Validation,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("Document is empty after normalization")]
    EmptyDocument,

    #[error("Unknown customer: {0}")]
    UnknownCustomer(String),

    #[error("Unknown project '{project}' for customer '{customer}'")]
    UnknownProject { customer: String, project: String },

    #[error("Content rejected by privacy filter: {reason}")]
    PrivacyRejected { reason: String },

    #[error("Embedding failed for job {job_id}: {source}")]
    EmbeddingFailed {
        job_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Commit failed for job {job_id}: {source}")]
    CommitFailed {
        job_id: String,
        #[source]
        source: MemoryError,
    },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyDocument | Self::UnknownCustomer(_) | Self::UnknownProject { .. } => {
                ErrorKind::Validation
            }
            Self::PrivacyRejected { .. } => ErrorKind::PrivacyRejected,
            Self::EmbeddingFailed { .. } => ErrorKind::Provider,
            Self::CommitFailed { source, .. } => source.kind(),
        }
    }
}
