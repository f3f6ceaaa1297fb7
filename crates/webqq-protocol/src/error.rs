//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that invalidate a whole response or an outgoing message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The body is not valid JSON.
    #[error("invalid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    /// `retcode` is missing or not zero.
    #[error("bad retcode: {}", .0.as_deref().unwrap_or("<missing>"))]
    BadRetcode(Option<String>),

    /// The response carries no `result`.
    #[error("response has no result")]
    MissingResult,

    /// `result` is present but does not have the expected shape.
    #[error("malformed result: {0}")]
    MalformedResult(String),

    /// Encoded content exceeds the allowed size.
    #[error("content too large: {size} bytes (max: {max})")]
    ContentTooLarge { size: usize, max: usize },

    /// Failed to serialize an outgoing value.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a single poll event is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// The `content` array is absent or not an array.
    #[error("missing content array")]
    MissingContent,

    /// The content array never carried a font token.
    #[error("message has no font")]
    MissingFont,

    /// The content array produced no parts.
    #[error("message has no content parts")]
    EmptyContent,

    /// A tagged content element is missing data it needs.
    #[error("malformed `{tag}` element: {reason}")]
    MalformedTag { tag: String, reason: &'static str },

    /// The event kind has no decoder.
    #[error("unsupported event kind")]
    UnknownKind,
}

impl DecodeError {
    pub(crate) fn malformed(tag: &str, reason: &'static str) -> Self {
        Self::MalformedTag {
            tag: tag.to_string(),
            reason,
        }
    }
}
