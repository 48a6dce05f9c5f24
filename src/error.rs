//! Error taxonomy for the processing pipeline.
//!
//! Every pipeline layer returns an [`AsyncError`] envelope. The envelope
//! carries a classification ([`ErrorKind`]) that the settlement layer matches
//! on to pick the broker verb: retryable failures are abandoned and
//! redelivered, non-retryable failures are dead-lettered, and anything else
//! is left to the broker's visibility timeout.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A failure worth redelivering. The message is abandoned and the broker
/// hands it back after the visibility timeout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("retry: {message}")]
pub struct RetryError {
    /// Human-readable reason for deferring.
    pub message: String,
}

impl RetryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// A failure redelivery cannot fix. The message is dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("non-retry: {message}")]
pub struct NonRetryError {
    /// Human-readable reason the message must not come back.
    pub message: String,
}

impl NonRetryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// The classification the settlement layer matches on.
#[derive(Debug)]
pub enum ErrorKind {
    /// Redeliver later.
    Retry(RetryError),
    /// Never redeliver.
    NonRetry(NonRetryError),
    /// Unclassified; no settlement action is taken and the visibility
    /// timeout decides.
    Other(Box<dyn StdError + Send + Sync>),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry(e) => write!(f, "{}", e),
            Self::NonRetry(e) => write!(f, "{}", e),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

/// The envelope returned by every pipeline layer.
///
/// Wraps the classified failure together with the metadata the settlement
/// and status layers act on. `retry_after` is advisory; the default
/// classifier does not sleep on it.
#[derive(Debug)]
pub struct AsyncError {
    /// Context describing where the failure surfaced.
    pub message: String,
    /// HTTP-flavored code, `500` unless a layer says otherwise.
    pub error_code: u16,
    /// Advisory delay before the message should be retried.
    pub retry_after: Option<Duration>,
    kind: ErrorKind,
}

impl AsyncError {
    /// An error classified for redelivery.
    pub fn retry(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::Retry(RetryError::new(message.clone())),
            message,
            error_code: 500,
            retry_after: None,
        }
    }

    /// An error classified for dead-lettering.
    pub fn non_retry(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::NonRetry(NonRetryError::new(message.clone())),
            message,
            error_code: 500,
            retry_after: None,
        }
    }

    /// An unclassified error. The broker takes no settlement action for it.
    pub fn other(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            kind: ErrorKind::Other(source.into()),
            message: message.into(),
            error_code: 500,
            retry_after: None,
        }
    }

    /// Replace the envelope context without touching the classification.
    pub fn with_context(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_code(mut self, error_code: u16) -> Self {
        self.error_code = error_code;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// The classification the settlement layer matches on.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn is_retry(&self) -> bool {
        matches!(self.kind, ErrorKind::Retry(_))
    }

    pub fn is_non_retry(&self) -> bool {
        matches!(self.kind, ErrorKind::NonRetry(_))
    }
}

impl fmt::Display for AsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {}): {}", self.message, self.error_code, self.kind)
    }
}

impl StdError for AsyncError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.kind {
            ErrorKind::Retry(e) => Some(e),
            ErrorKind::NonRetry(e) => Some(e),
            ErrorKind::Other(e) => Some(&**e),
        }
    }
}
