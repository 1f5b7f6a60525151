//! Error types for buffered production.
//!
//! Three layers of failure meet in this module. `SubmitError` is what a
//! transport returns when handing it a message; `DeliveryFailure` is what the
//! broker reports asynchronously for a message it already accepted; and
//! `BufferError` is the only error a caller of the producer ever sees.
//! Backpressure and delivery failures are absorbed by the producer and never
//! surface as `BufferError` under the default retry policy.

use std::fmt;

use thiserror::Error;

use crate::token::CorrelationToken;

/// Result type alias for producer operations.
pub type Result<T> = std::result::Result<T, BufferError>;

/// Errors surfaced to callers of the buffered producer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The producer or its transport could not be constructed.
    #[error("invalid producer configuration: {message}")]
    Configuration {
        /// Description of the configuration problem
        message: String,
    },

    /// The transport failed to resolve a topic name to a handle.
    #[error("failed to resolve topic '{topic}': {message}")]
    TopicResolution {
        /// Name of the topic that could not be resolved
        topic: String,
        /// Reason reported by the transport
        message: String,
    },

    /// The transport refused a message for a reason other than backpressure.
    #[error("submission of message {token} failed: {message}")]
    Submission {
        /// Token of the entry whose submission failed
        token: CorrelationToken,
        /// Reason reported by the transport
        message: String,
    },

    /// Messages were abandoned by a bounded retry policy during a flush.
    #[error("{abandoned} message(s) abandoned after exhausting delivery attempts")]
    RetriesExhausted {
        /// Number of messages abandoned during the flush
        abandoned: usize,
    },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a topic resolution error.
    pub fn topic_resolution(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TopicResolution { topic: topic.into(), message: message.into() }
    }

    /// Creates a submission error for the given entry.
    pub fn submission(token: CorrelationToken, message: impl Into<String>) -> Self {
        Self::Submission { token, message: message.into() }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(abandoned: usize) -> Self {
        Self::RetriesExhausted { abandoned }
    }

    /// Returns `true` when calling `flush` again may succeed.
    ///
    /// Submission failures leave the entry buffered, so a later flush retries
    /// it. Configuration and resolution failures will not change by retrying,
    /// and abandoned messages are no longer in the buffer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Submission { .. } => true,
            Self::Configuration { .. }
            | Self::TopicResolution { .. }
            | Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Failure returned by a transport's submit primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The transport's local output queue is full.
    ///
    /// This is a transient resource condition, not a delivery failure. The
    /// submission loop polls and tries again.
    #[error("local output queue is full")]
    QueueFull,

    /// The transport refused the message outright.
    #[error("message rejected by transport: {message}")]
    Rejected {
        /// Reason reported by the transport
        message: String,
    },
}

impl SubmitError {
    /// Creates a rejection with the given reason.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    /// Returns `true` for local backpressure.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::QueueFull)
    }
}

/// Broker-reported failure for a message the transport had accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery failed: {message}")]
pub struct DeliveryFailure {
    /// Reason reported by the broker or transport
    pub message: String,
}

impl DeliveryFailure {
    /// Creates a delivery failure with the given reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Category of producer error for logs and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Construction or configuration problems.
    Configuration,
    /// Topic name resolution.
    Topic,
    /// Transport refused a submission.
    Submission,
    /// Local queue backpressure.
    Backpressure,
    /// Broker-reported delivery failure.
    Delivery,
}

impl From<&BufferError> for ErrorCategory {
    fn from(error: &BufferError) -> Self {
        match error {
            BufferError::Configuration { .. } => Self::Configuration,
            BufferError::TopicResolution { .. } => Self::Topic,
            BufferError::Submission { .. } => Self::Submission,
            BufferError::RetriesExhausted { .. } => Self::Delivery,
        }
    }
}

impl From<&SubmitError> for ErrorCategory {
    fn from(error: &SubmitError) -> Self {
        match error {
            SubmitError::QueueFull => Self::Backpressure,
            SubmitError::Rejected { .. } => Self::Submission,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Topic => write!(f, "topic"),
            Self::Submission => write!(f, "submission"),
            Self::Backpressure => write!(f, "backpressure"),
            Self::Delivery => write!(f, "delivery"),
        }
    }
}
