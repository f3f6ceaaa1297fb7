//! Error types for the message client.
//!
//! Every fallible client operation returns a [`ClientError`], classified by a
//! [`ClientErrorCode`] that drives retry decisions in the poller.

use std::fmt;
use thiserror::Error;
use webqq_protocol::ProtocolError;

/// The category of a client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorCode {
    /// Connection failed, timed out, or the body could not be read.
    Network,
    /// The server answered with an unexpected HTTP status.
    HttpStatus,
    /// The body did not parse or carried a failure retcode.
    InvalidResponse,
    /// The message kind cannot be sent.
    UnsupportedKind,
    /// The message is missing data required to send it.
    InvalidMessage,
    /// Session credentials are missing or were rejected.
    Credentials,
    /// Missing or invalid configuration, or no async runtime.
    Configuration,
    /// The receive queue was closed.
    QueueClosed,
    /// The operation was cancelled before it completed.
    Cancelled,
    /// Unexpected internal state.
    Internal,
}

impl ClientErrorCode {
    /// Returns true if this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::HttpStatus)
    }

    /// Returns a stable name for this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::HttpStatus => "http_status",
            Self::InvalidResponse => "invalid_response",
            Self::UnsupportedKind => "unsupported_kind",
            Self::InvalidMessage => "invalid_message",
            Self::Credentials => "credentials",
            Self::Configuration => "configuration",
            Self::QueueClosed => "queue_closed",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ClientErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised by the message client.
#[derive(Debug, Error)]
pub struct ClientError {
    code: ClientErrorCode,
    message: String,
    /// HTTP status for [`ClientErrorCode::HttpStatus`] errors.
    status: Option<u16>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ClientError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ClientErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::Network, message)
    }

    /// Creates an error for an unexpected HTTP status.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(ClientErrorCode::HttpStatus, message);
        err.status = Some(status);
        err
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::InvalidResponse, message)
    }

    pub fn unsupported_kind(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::UnsupportedKind, message)
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::InvalidMessage, message)
    }

    pub fn credentials(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::Credentials, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::Configuration, message)
    }

    pub fn queue_closed() -> Self {
        Self::new(ClientErrorCode::QueueClosed, "receive queue is closed")
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::Cancelled, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCode::Internal, message)
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> ClientErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the HTTP status, if this is a status error.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        Ok(())
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        let code = match err {
            ProtocolError::ContentTooLarge { .. } => ClientErrorCode::InvalidMessage,
            ProtocolError::Serialization(_) => ClientErrorCode::Internal,
            _ => ClientErrorCode::InvalidResponse,
        };
        Self::new(code, err.to_string()).with_source(err)
    }
}

/// A specialized Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
