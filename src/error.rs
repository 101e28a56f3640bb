// ❗ Error types for the audit core
//
// AuditError is what callers of the pipeline see. DetectorError never
// escapes a run: the pipeline turns it into a warning.

use thiserror::Error;

/// Errors surfaced by the analytics core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuditError {
    /// Malformed or empty input, or a test precondition that does not hold
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Out-of-range configuration value (fatal, raised before any analysis)
    #[error("Invalid configuration for '{field}': {reason}")]
    Configuration {
        /// Dotted path of the offending field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The run was cancelled or timed out; no partial result is returned
    #[error("Analysis cancelled during {stage}")]
    Cancelled {
        /// Pipeline stage that observed the cancellation
        stage: String,
    },
}

impl AuditError {
    pub fn validation(message: impl Into<String>) -> Self {
        AuditError::Validation(message.into())
    }

    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AuditError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AuditError::Cancelled { .. })
    }
}

/// Reasons a single detector cannot execute against a ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    /// The column the detector needs is absent from every entry
    #[error("required column '{column}' is missing")]
    MissingColumn { column: String },

    /// The column is present but holds values the detector cannot interpret
    #[error("column '{column}' is malformed: {detail}")]
    MalformedColumn { column: String, detail: String },

    /// Any other precondition failure
    #[error("{0}")]
    Precondition(String),
}

pub type AuditResult<T> = Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_message() {
        let err = AuditError::configuration("risk.saturation_k", "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for 'risk.saturation_k': must be positive"
        );
    }

    #[test]
    fn test_cancelled_helper() {
        let err = AuditError::Cancelled {
            stage: "aggregation".to_string(),
        };
        assert!(err.is_cancelled());
        assert!(!AuditError::validation("empty").is_cancelled());
    }

    #[test]
    fn test_detector_error_display() {
        let err = DetectorError::MalformedColumn {
            column: "sequence_number".to_string(),
            detail: "'ABC' has no trailing number".to_string(),
        };
        assert!(err.to_string().contains("sequence_number"));
    }
}
