//! Typed error kinds shared across every component.
//!
//! Library code returns `Result<T, MemoryError>` throughout; only the CLI
//! boundary in `main.rs` folds these into `anyhow::Error` for `?`-propagation
//! out of `main`.

use std::fmt;

/// The error categories from the spec's error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Invalid,
    Corruption,
    Unavailable,
    EmbeddingUnavailable,
    Timeout,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::Invalid => "Invalid",
            ErrorKind::Corruption => "Corruption",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::EmbeddingUnavailable => "EmbeddingUnavailable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}

/// A typed, user-presentable error.
///
/// The message always names the operation and (when applicable) the id,
/// and never embeds raw provider responses or embedding vectors.
#[derive(thiserror::Error, Debug)]
#[error("{operation}{id_suffix}: {kind}: {message}", id_suffix = format_id_suffix(.id))]
pub struct MemoryError {
    pub kind: ErrorKind,
    pub operation: &'static str,
    pub id: Option<String>,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

fn format_id_suffix(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" [{id}]"),
        None => String::new(),
    }
}

impl MemoryError {
    pub fn new(kind: ErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            id: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn not_found(operation: &'static str, id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorKind::NotFound, operation, format!("block not found"))
            .with_id(id)
    }

    pub fn already_exists(operation: &'static str, id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorKind::AlreadyExists, operation, "id already exists").with_id(id)
    }

    pub fn invalid(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, operation, message)
    }

    pub fn corruption(operation: &'static str, id: impl Into<String>, message: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorKind::Corruption, operation, message).with_id(id)
    }

    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, operation, message)
    }

    pub fn embedding_unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmbeddingUnavailable, operation, message)
    }

    pub fn timeout(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, operation, message)
    }

    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, operation, message)
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout | ErrorKind::Unavailable)
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;
