use thiserror::Error;

pub type CustodyResult<T> = Result<T, CustodyError>;

#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("content store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("metadata repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("crypto error: {0}")]
    Crypto(String),

    /// Decryption succeeded but the plaintext does not match the anchored fingerprint.
    #[error("integrity violation: expected {expected}, computed {actual}")]
    IntegrityViolation { expected: String, actual: String },

    #[error("timed out: {operation}")]
    Timeout { operation: String },

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CustodyError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CustodyError::NotFound { what: what.into() }
    }

    /// Stable label for log fields, metric labels and JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CustodyError::UnsupportedMediaType(_) => "unsupported_media_type",
            CustodyError::InvalidRequest(_) => "invalid_request",
            CustodyError::StoreUnavailable(_) => "store_unavailable",
            CustodyError::LedgerUnavailable(_) => "ledger_unavailable",
            CustodyError::RepositoryUnavailable(_) => "repository_unavailable",
            CustodyError::NotFound { .. } => "not_found",
            CustodyError::Crypto(_) => "crypto_error",
            CustodyError::IntegrityViolation { .. } => "integrity_violation",
            CustodyError::Timeout { .. } => "timeout",
            CustodyError::Duplicate(_) => "duplicate",
            CustodyError::Config(_) => "config_error",
            CustodyError::Io(_) => "io_error",
            CustodyError::Other(_) => "internal",
        }
    }

    /// Transient infrastructure failures: safe to retry the whole operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CustodyError::StoreUnavailable(_)
                | CustodyError::LedgerUnavailable(_)
                | CustodyError::RepositoryUnavailable(_)
                | CustodyError::Timeout { .. }
        )
    }
}
