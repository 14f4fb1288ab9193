//! Layered error definitions
//!
//! Categorized by source: config / contract / executor / platform

use thiserror::Error;

use crate::TimeWindow;

/// A buffered entry whose own window already exceeds the caller's bound.
///
/// Returned by value from the buffer search, which sits on the hot path; converts into
/// [`ContractError::ContractViolation`] once it leaves the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractViolation {
    /// Ring index of the offending entry, `None` when the pivot itself is too wide
    pub index: Option<usize>,
    /// Window of the offending entry
    pub window: TimeWindow,
    /// Bound it was checked against (nanoseconds)
    pub bound: u64,
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Sync Errors =====
    /// An entry's intrinsic window exceeds the declared bound (producer bug)
    #[error(
        "contract violation on channel '{channel}': window [{}, {}] exceeds bound {}ns",
        violation.window.earliest,
        violation.window.latest,
        violation.bound
    )]
    ContractViolation {
        channel: String,
        violation: ContractViolation,
    },

    /// Message published on a channel the synchronizer does not watch
    #[error("synchronizer '{synchronizer}' has no channel '{channel}'")]
    UnknownChannel {
        synchronizer: String,
        channel: String,
    },

    /// Operation the pipeline is not configured to support
    #[error("unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    // ===== Executor Errors =====
    /// `spin()` called on an executor that is already spinning
    #[error("executor '{name}' is already spinning")]
    AlreadySpinning { name: String },

    /// Applying thread scheduling attributes failed
    #[error("scheduling error on worker {thread}: {message}")]
    Scheduling { thread: usize, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Attach a channel name to a buffer-level violation
    pub fn contract_violation(channel: impl Into<String>, violation: ContractViolation) -> Self {
        Self::ContractViolation {
            channel: channel.into(),
            violation,
        }
    }

    pub fn unknown_channel(synchronizer: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::UnknownChannel {
            synchronizer: synchronizer.into(),
            channel: channel.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    pub fn scheduling(thread: usize, message: impl Into<String>) -> Self {
        Self::Scheduling {
            thread,
            message: message.into(),
        }
    }

    /// Whether the error is a producer-side timing contract breach
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }
}
