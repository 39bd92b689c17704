use std::time::Duration;

use thiserror::Error;

use crate::types::{FireId, JobKey, TriggerKey};

/// Result type for scheduling operations
pub type SchedulingResult<T> = Result<T, SchedulingError>;

/// Result type for payload decoding
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Failure to rebuild a typed payload from stored trigger data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Missing field `{field}` (expected {expected})")]
    MissingField { field: String, expected: &'static str },

    #[error("Malformed field `{field}`: expected {expected}, found {value:?}")]
    MalformedField {
        field: String,
        expected: &'static str,
        value: String,
    },

    #[error("Unknown variant discriminator: {}", .found.as_deref().unwrap_or("<absent>"))]
    UnknownVariant { found: Option<String> },

    #[error("Job type mismatch: expected {expected}, found {}", .found.as_deref().unwrap_or("<absent>"))]
    JobTypeMismatch {
        expected: &'static str,
        found: Option<String>,
    },
}

impl DecodeError {
    /// Name of the offending field, when the error is about one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field, .. } | Self::MalformedField { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Errors reported to the consumer holding an acker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    /// The acker was already completed; the first outcome stands
    #[error("Acker for fire {fire_id} already completed")]
    AlreadyCompleted { fire_id: FireId },
}

/// Processing failure reported by a downstream consumer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct JobFailure {
    message: String,
}

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Capture any error as a failure cause
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        Self::new(error.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for JobFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Fire outcome as seen by the external scheduler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Payload decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Queue is closed")]
    QueueClosed,

    #[error("Consumer failed: {0}")]
    Consumer(#[from] JobFailure),

    #[error("No acknowledgement within {0:?}")]
    AckTimeout(Duration),

    #[error("Acker dropped without completion")]
    AckDropped,
}

impl JobError {
    /// True when the failure happened before the message reached the queue
    pub fn is_pre_enqueue(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::QueueClosed)
    }
}

/// Errors raised by the task scheduler facade and its backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("Job already exists: {0}")]
    DuplicateJob(JobKey),

    #[error("Trigger already exists: {0}")]
    DuplicateTrigger(TriggerKey),

    #[error("Trigger not found: {0}")]
    UnknownTrigger(TriggerKey),

    #[error("Job not found: {0}")]
    UnknownJob(JobKey),

    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("Payload field `{0}` is reserved for the scheduler bridge")]
    ReservedField(String),

    #[error("Trigger {0} will never fire")]
    WillNeverFire(TriggerKey),

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Scheduler has been shut down")]
    Shutdown,

    #[error("Scheduler backend error: {0}")]
    Backend(String),
}
