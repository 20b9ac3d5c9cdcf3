use std::path::PathBuf;

use thiserror::Error;

use crate::types::PasswordRule;

pub type EdudeskResult<T> = Result<T, EdudeskError>;

/// Coarse classification of an [`EdudeskError`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Configuration,
    CryptoOperation,
    Authentication,
    Io,
    Integrity,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::CryptoOperation => "crypto operation",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Io => "I/O",
            ErrorCategory::Integrity => "integrity",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum EdudeskError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("password rejected: {0}")]
    WeakPassword(PasswordRule),

    #[error("config error: {0}")]
    Configuration(String),

    /// A primitive reported failure. `detail` never contains key material.
    #[error("{primitive} failed: {detail}")]
    CryptoOperation {
        primitive: &'static str,
        detail: String,
    },

    #[error("secure random source unavailable: {0}")]
    RandomUnavailable(String),

    #[error("authentication failed")]
    Authentication,

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Ciphertext and metadata were written but the owning record was not.
    #[error("file {file_id} stored but not recorded: {source}")]
    Unrecorded {
        file_id: String,
        #[source]
        source: Box<EdudeskError>,
    },
}

impl EdudeskError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EdudeskError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn crypto(primitive: &'static str, detail: impl std::fmt::Display) -> Self {
        EdudeskError::CryptoOperation {
            primitive,
            detail: detail.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EdudeskError::Validation(_) | EdudeskError::WeakPassword(_) => {
                ErrorCategory::Validation
            }
            EdudeskError::Configuration(_) => ErrorCategory::Configuration,
            EdudeskError::CryptoOperation { .. } | EdudeskError::RandomUnavailable(_) => {
                ErrorCategory::CryptoOperation
            }
            EdudeskError::Authentication => ErrorCategory::Authentication,
            EdudeskError::Io { .. } => ErrorCategory::Io,
            EdudeskError::Integrity(_) => ErrorCategory::Integrity,
            EdudeskError::Unrecorded { source, .. } => source.category(),
        }
    }

    /// Conditions under which a process should stop instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EdudeskError::Configuration(_) | EdudeskError::RandomUnavailable(_)
        )
    }
}
