//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the core returns [`Error`]. The variants map
//! one-to-one onto the HTTP error contract served by [`crate::server`]:
//! validation problems, rebuild conflicts, extraction failures, external
//! model failures, and missing resources each carry a stable machine code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input: invalid filename, unsupported format, malformed request,
    /// missing required date fields, unmapped issue status.
    #[error("{0}")]
    Validation(String),

    /// An index rebuild is already pending or processing.
    #[error("{0}")]
    Conflict(String),

    /// A document could not be read or parsed. Inside a rebuild this fails
    /// the whole generation; the active index is left untouched.
    #[error("{0}")]
    Extraction(String),

    /// The embedding collaborator failed after its bounded retry.
    #[error("{0}")]
    Embedding(String),

    /// The text-generation collaborator failed after its bounded retry.
    #[error("{0}")]
    Generation(String),

    /// Unknown task id, filename, or persisted index generation.
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Error::Extraction(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Error::Embedding(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Error::Generation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Stable machine-readable code for the HTTP error contract.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Conflict(_) => "conflict",
            Error::Extraction(_) => "extraction",
            Error::Embedding(_) => "embedding",
            Error::Generation(_) => "generation",
            Error::NotFound(_) => "not_found",
            Error::Io(_) | Error::Internal(_) => "internal",
        }
    }
}
