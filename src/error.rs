//! Error types for verifyq.

use thiserror::Error;

use crate::model::ResourceId;

/// Failures from the remote verification queue.
///
/// Authorization failures are kept apart from transient ones: a transient
/// failure is retried on the next tick, an authorization failure needs an
/// operator to fix permissions.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("not authorized for resource {resource}")]
    Unauthorized { resource: ResourceId },

    #[error("resource {resource} not found")]
    NotFound { resource: ResourceId },

    #[error("transient source failure: {0}")]
    Transient(String),
}

impl SourceError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SourceError::Unauthorized { .. })
    }
}

/// Failures from the chat service.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// The message or channel no longer exists.
    #[error("chat object not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("transient chat failure: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("queue source error: {0}")]
    Source(#[from] SourceError),

    #[error("chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
