use thiserror::Error;

/// Core error type for spannorm.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
///
/// Errors never cross into the instrumented host: the handler and run tracer
/// log them and carry on.
#[derive(Debug, Error)]
pub enum SpanNormError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("extraction rule {rule} failed: {message}")]
    Extraction { rule: &'static str, message: String },

    #[error("unrecognized message type: {0}")]
    UnknownRole(String),

    #[error("value could not be encoded: {0}")]
    Serialize(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpanNormError {
    pub(crate) fn extraction(rule: &'static str, message: impl Into<String>) -> Self {
        Self::Extraction {
            rule,
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, SpanNormError>;
