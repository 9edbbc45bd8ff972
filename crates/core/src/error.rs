//! Error taxonomy shared by every layer of the engine.
//!
//! An [`EngineError`] is what a caller ultimately sees on a failed root
//! request: a single message plus a stable numeric code. Messages chain by
//! prefixing, so a failure deep in a nested request reads outermost first.

/// Classification of a failure.
///
/// The numeric codes are stable and may be surfaced across language
/// boundaries; never renumber an existing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Allocation or capacity failure. Terminal.
    ResourceExhausted,
    /// A collaborator declined the action and no other one took it.
    Unsupported,
    /// Malformed request or params. Terminal, never retried.
    InvalidInput,
    /// Unknown node, method or key.
    NotFound,
    /// Invalid configuration.
    Config,
    /// Persisted data was written by an incompatible format version.
    VersionMismatch,
    /// Response could not be verified. Retried on another node.
    Unverifiable,
    /// Node rejected the request or answered garbage. Retried on another node.
    RemoteRejected,
    /// Selection found no node passing the filter.
    NoEligibleNodes,
    /// A sub-request that is allowed to fail has failed.
    Ignore,
}

impl ErrorKind {
    /// Stable numeric code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ResourceExhausted => -2,
            Self::Unsupported => -3,
            Self::InvalidInput => -4,
            Self::NotFound => -5,
            Self::Config => -6,
            Self::VersionMismatch => -8,
            Self::Unverifiable => -9,
            Self::RemoteRejected => -11,
            Self::NoEligibleNodes => -15,
            Self::Ignore => -17,
        }
    }

    /// Whether the engine retries on a fresh node set after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteRejected | Self::Unverifiable)
    }
}

/// A terminal or recoverable failure with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
}

impl EngineError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Malformed input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Invalid configuration.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Remote node misbehaved or refused.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteRejected, message)
    }

    /// A collaborator declined.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// Classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable numeric code of the classification.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// The message without classification.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with outer context, keeping the kind.
    pub fn context(self, outer: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("{outer}:{}", self.message),
        }
    }

    /// Same message, different classification.
    pub fn with_kind(self, kind: ErrorKind) -> Self {
        Self { kind, ..self }
    }
}

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;
