//! Error types for coletor.
//!
//! All errors are strongly typed using thiserror so the orchestration layer
//! can decide per variant whether a record is skipped, the run stops, or the
//! source is abandoned with a partial export.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors raised at stage boundaries.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Empty input at {stage}")]
    EmptyInput {
        stage: &'static str,
    },

    #[error("Unusable text at {stage}: '{text}'")]
    Unusable {
        stage: &'static str,
        text: String,
    },

    #[error("{context} confidence {value:.3} is below the threshold {threshold:.2}")]
    BelowThreshold {
        context: &'static str,
        value: f64,
        threshold: f64,
    },

    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f64,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Failures of the upstream record source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record at line {line}: {message}")]
    Malformed {
        line: usize,
        message: String,
    },

    #[error("Source failed: {message}")]
    Failed {
        message: String,
    },
}

/// Top-level error type for coletor.
#[derive(Debug, Error)]
pub enum ColetorError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store unavailable: {0}")]
    Storage(#[from] StorageError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Export failed: {0}")]
    Export(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ColetorError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a below-threshold validation error.
    #[must_use]
    pub const fn below_threshold(context: &'static str, value: f64, threshold: f64) -> Self {
        Self::Validation(ValidationError::BelowThreshold {
            context,
            value,
            threshold,
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a below-threshold rejection.
    #[must_use]
    pub const fn is_below_threshold(&self) -> bool {
        matches!(self, Self::Validation(ValidationError::BelowThreshold { .. }))
    }

    /// Returns true if the input was empty or unusable.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::Validation(ValidationError::EmptyInput { .. } | ValidationError::Unusable { .. })
        )
    }

    /// Returns true if this is a source error.
    #[must_use]
    pub const fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    /// Returns true if the record or fragment should be skipped and the run continued.
    #[must_use]
    pub const fn is_skippable(&self) -> bool {
        self.is_below_threshold() || self.is_invalid_input()
    }

    /// Short tag used to count errors by kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::BelowThreshold { .. }) => "below_threshold",
            Self::Validation(ValidationError::EmptyInput { .. } | ValidationError::Unusable { .. }) => "invalid_input",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::Source(_) => "source",
            Self::Export(_) => "export",
            Self::Internal { .. } => "internal",
        }
    }

    /// Returns true if the run cannot make progress.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Export(_) | Self::Internal { .. } => true,
            Self::Validation(e) => matches!(e, ValidationError::InvalidConfig { .. }),
            Self::Source(_) => false,
        }
    }
}

/// Result type alias for coletor operations.
pub type ColetorResult<T> = Result<T, ColetorError>;
