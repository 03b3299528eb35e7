//! Error types for the audit engine.
//!
//! Errors are strongly typed using thiserror and split by how the run
//! treats them:
//! - [`ConfigurationError`] is fatal and raised before any evaluation.
//! - [`DataQualityError`] is recovered locally: the offending binding is
//!   dropped and the issue is reported as a [`DataQualityIssue`].
//! - Rule overlaps (the single-rule-per-event invariant) are not errors at
//!   all; see [`crate::aggregator::RuleOverlap`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::RuleId;
use crate::facts::Binding;

/// Fatal configuration defects. A run never starts while one is present.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Rule identifier cannot be empty")]
    EmptyRuleId,

    #[error("Duplicate rule identifier '{rule}'")]
    DuplicateRule {
        rule: RuleId,
    },

    #[error("Rule '{rule}' has no positive literal")]
    NoPositiveLiteral {
        rule: RuleId,
    },

    #[error("Rule '{rule}': variable '{variable}' in `{literal}` is not bound by a positive literal")]
    UnsafeLiteral {
        rule: RuleId,
        literal: String,
        variable: String,
    },

    #[error("Rule '{rule}': projected {role} variable '{variable}' is not bound as required")]
    UnsafeProjection {
        rule: RuleId,
        role: &'static str,
        variable: String,
    },

    #[error("Rule '{rule}' references the reserved predicate '{predicate}'")]
    RecursiveRule {
        rule: RuleId,
        predicate: String,
    },

    #[error("Rule '{rule}': elapsed-day threshold must be >= 0, got {days}")]
    InvalidDeadline {
        rule: RuleId,
        days: i64,
    },

    #[error("Weight for {dimension} must be finite and non-negative, got {value}")]
    InvalidWeight {
        dimension: &'static str,
        value: f64,
    },

    #[error("Scoring weights sum to zero")]
    ZeroWeightSum,

    #[error("Scoring weights sum to a non-finite value ({value})")]
    NonFiniteWeightSum {
        value: f64,
    },

    #[error("Severity for rule '{rule}' must be within [0.0, 1.0], got {value}")]
    InvalidSeverity {
        rule: RuleId,
        value: f64,
    },

    #[error("Criticality map references rule '{rule}' which is not in the catalog")]
    UnknownCriticalityRule {
        rule: RuleId,
    },

    #[error("Catalog rule '{rule}' has no criticality level")]
    MissingCriticality {
        rule: RuleId,
    },

    #[error("Normalization constant for {dimension} must be finite and > 0, got {value}")]
    InvalidNormalization {
        dimension: &'static str,
        value: f64,
    },

    #[error("Evaluator worker count must be > 0")]
    InvalidWorkers,

    #[error("Failed to parse {what}: {reason}")]
    Parse {
        what: &'static str,
        reason: String,
    },

    #[error("Failed to read '{path}': {reason}")]
    Io {
        path: String,
        reason: String,
    },
}

/// Recoverable defects in the audited data.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityError {
    #[error("Malformed date '{value}': {reason}")]
    MalformedDate {
        value: String,
        reason: String,
    },

    #[error("Expected a date but found {type_name} value '{value}'")]
    NotADate {
        value: String,
        type_name: String,
    },

    #[error("Predicate '{predicate}' has no facts of arity {expected} (found arities {found:?})")]
    ShapeMismatch {
        predicate: String,
        expected: usize,
        found: Vec<usize>,
    },

    #[error("Cannot compare '{left}' with '{right}'")]
    Incomparable {
        left: String,
        right: String,
    },
}

/// A data-quality problem attributed to the rule and binding it affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQualityIssue {
    /// Rule whose evaluation hit the problem.
    pub rule: RuleId,
    /// The literal or constraint being evaluated, rendered as text.
    pub literal: String,
    /// The binding that was dropped (empty for rule-level shape issues).
    pub binding: Binding,
    /// What went wrong.
    pub error: DataQualityError,
}

/// Top-level error type for the audit engine.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Data quality error: {0}")]
    DataQuality(#[from] DataQualityError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl AuditError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is a data-quality error.
    #[must_use]
    pub const fn is_data_quality(&self) -> bool {
        matches!(self, Self::DataQuality(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
