//! Composite compliance scoring.
//!
//! Four sub-scores, each in `[0, 1]` with 1.0 best:
//!
//! - **coverage**: one minus the severity share of distinct violated rules;
//! - **volume**: one minus the violation count over a normalization constant;
//! - **timeliness**: one minus the average overdue days per deadline rule
//!   over a normalization constant;
//! - **breadth**: one minus the share of catalog rules violated.
//!
//! The composite is their weighted mean. Every sub-score is
//! non-increasing in the violation set, so adding a violation can never
//! raise the composite.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregator::ViolationSet;
use crate::catalog::{RuleCatalog, RuleId};
use crate::error::ConfigurationError;
use crate::value::Value;

/// Relative weights of the four sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    /// Severity-weighted rule coverage.
    pub coverage: f64,
    /// Violation volume.
    pub volume: f64,
    /// Deadline timeliness.
    pub timeliness: f64,
    /// Breadth of violated rules.
    pub breadth: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            coverage: 0.4,
            volume: 0.3,
            timeliness: 0.2,
            breadth: 0.1,
        }
    }
}

impl Weights {
    fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("coverage", self.coverage),
            ("volume", self.volume),
            ("timeliness", self.timeliness),
            ("breadth", self.breadth),
        ]
    }

    /// Sum of all weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.named().iter().map(|(_, w)| w).sum()
    }

    /// Validate weights.
    ///
    /// # Errors
    ///
    /// `InvalidWeight` for a negative or non-finite weight, `ZeroWeightSum`
    /// if every weight is zero, `NonFiniteWeightSum` if finite weights
    /// overflow when added.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (dimension, value) in self.named() {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidWeight { dimension, value });
            }
        }
        let sum = self.sum();
        if !sum.is_finite() {
            return Err(ConfigurationError::NonFiniteWeightSum { value: sum });
        }
        if sum <= 0.0 {
            return Err(ConfigurationError::ZeroWeightSum);
        }
        Ok(())
    }
}

/// Normalization constants for the unbounded sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    /// Violation count at which the volume sub-score reaches zero.
    pub volume: f64,
    /// Average overdue days at which the timeliness sub-score reaches zero.
    pub timeliness: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            volume: 50.0,
            timeliness: 30.0,
        }
    }
}

impl Normalization {
    /// Validate constants.
    ///
    /// # Errors
    ///
    /// `InvalidNormalization` unless both constants are finite and > 0.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (dimension, value) in [("volume", self.volume), ("timeliness", self.timeliness)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigurationError::InvalidNormalization { dimension, value });
            }
        }
        Ok(())
    }
}

/// Scoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Sub-score weights.
    #[serde(default)]
    pub weights: Weights,
    /// Severity in `[0, 1]` per catalog rule.
    pub criticality: BTreeMap<RuleId, f64>,
    /// Normalization constants.
    #[serde(default)]
    pub normalization: Normalization,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl ScoringConfig {
    /// Configuration matching [`RuleCatalog::standard`].
    #[must_use]
    pub fn standard() -> Self {
        let criticality = [
            ("hipaa_auth", 0.8),
            ("hipaa_min_necessary", 0.7),
            ("gdpr_art18_restriction", 0.8),
            ("gdpr_art17_erasure", 0.9),
            ("gdpr_art15_access", 0.7),
            ("hipaa_breach_notification", 0.9),
        ]
        .into_iter()
        .map(|(id, sev)| (RuleId::new(id), sev))
        .collect();
        Self {
            weights: Weights::default(),
            criticality,
            normalization: Normalization::default(),
        }
    }

    /// Default weights and normalization with one severity for every rule
    /// of `catalog`.
    #[must_use]
    pub fn uniform(catalog: &RuleCatalog, severity: f64) -> Self {
        Self {
            weights: Weights::default(),
            criticality: catalog.rule_ids().map(|id| (id.clone(), severity)).collect(),
            normalization: Normalization::default(),
        }
    }

    /// Parses a configuration from JSON. Weights and normalization fall
    /// back to their defaults when absent.
    ///
    /// # Errors
    ///
    /// `Parse` for malformed JSON.
    pub fn from_json(s: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(s).map_err(|e| ConfigurationError::Parse {
            what: "scoring config",
            reason: e.to_string(),
        })
    }

    /// Serializes to pretty JSON.
    ///
    /// # Errors
    ///
    /// `Parse` if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ConfigurationError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigurationError::Parse {
            what: "scoring config",
            reason: e.to_string(),
        })
    }

    /// blake3 hex digest of the compact JSON form.
    ///
    /// # Errors
    ///
    /// `Parse` if serialization fails.
    pub fn fingerprint(&self) -> Result<String, ConfigurationError> {
        let canonical = serde_json::to_vec(self).map_err(|e| ConfigurationError::Parse {
            what: "scoring config",
            reason: e.to_string(),
        })?;
        Ok(blake3::hash(&canonical).to_hex().to_string())
    }

    /// Validate the configuration against `catalog`.
    ///
    /// # Errors
    ///
    /// Any weight, normalization or severity defect, a criticality entry
    /// for a rule outside the catalog, or a catalog rule without one.
    pub fn validate(&self, catalog: &RuleCatalog) -> Result<(), ConfigurationError> {
        self.weights.validate()?;
        self.normalization.validate()?;
        for (rule, &value) in &self.criticality {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidSeverity {
                    rule: rule.clone(),
                    value,
                });
            }
            if !catalog.contains(rule) {
                return Err(ConfigurationError::UnknownCriticalityRule { rule: rule.clone() });
            }
        }
        if let Some(rule) = catalog.rule_ids().find(|id| !self.criticality.contains_key(*id)) {
            return Err(ConfigurationError::MissingCriticality { rule: rule.clone() });
        }
        Ok(())
    }
}

/// The four sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    /// Severity-weighted rule coverage.
    pub coverage: f64,
    /// Violation volume.
    pub volume: f64,
    /// Deadline timeliness.
    pub timeliness: f64,
    /// Breadth of violated rules.
    pub breadth: f64,
}

impl SubScores {
    const PERFECT: Self = Self {
        coverage: 1.0,
        volume: 1.0,
        timeliness: 1.0,
        breadth: 1.0,
    };
}

/// A scored violation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceScore {
    /// Weighted mean of the sub-scores, in `[0, 1]`.
    pub composite: f64,
    /// Individual sub-scores.
    pub sub_scores: SubScores,
    /// Number of violation instances scored.
    pub violation_count: usize,
    /// Number of distinct rules violated.
    pub rules_violated: usize,
    /// Sum of overdue days across deadline violations.
    pub total_overdue_days: i64,
    /// Weights used.
    pub weights: Weights,
    /// Normalization constants used.
    pub normalization: Normalization,
}

/// Validated scorer bound to one catalog.
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
    total_rules: usize,
    deadline_rules: usize,
    total_severity: f64,
    fingerprint: String,
}

impl Scorer {
    /// Validates `config` against `catalog` and builds a scorer.
    ///
    /// # Errors
    ///
    /// See [`ScoringConfig::validate`].
    pub fn new(config: ScoringConfig, catalog: &RuleCatalog) -> Result<Self, ConfigurationError> {
        config.validate(catalog)?;
        let fingerprint = config.fingerprint()?;
        let total_severity: f64 = catalog
            .rule_ids()
            .filter_map(|id| config.criticality.get(id))
            .sum();
        Ok(Self {
            total_rules: catalog.len(),
            deadline_rules: catalog.deadline_rules().count(),
            total_severity,
            fingerprint,
            config,
        })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Fingerprint of the configuration.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Scores a whole violation set.
    #[must_use]
    pub fn score(&self, violations: &ViolationSet) -> ComplianceScore {
        let sub_scores = if violations.is_empty() {
            SubScores::PERFECT
        } else {
            self.sub_scores(violations)
        };
        let weights = self.config.weights;
        let weighted = weights.coverage * sub_scores.coverage
            + weights.volume * sub_scores.volume
            + weights.timeliness * sub_scores.timeliness
            + weights.breadth * sub_scores.breadth;

        ComplianceScore {
            composite: (weighted / weights.sum()).clamp(0.0, 1.0),
            sub_scores,
            violation_count: violations.len(),
            rules_violated: violations.rule_ids().len(),
            total_overdue_days: violations.total_overdue_days(),
            weights,
            normalization: self.config.normalization,
        }
    }

    /// Scores only the violations attributed to `principal`.
    #[must_use]
    pub fn score_principal(&self, violations: &ViolationSet, principal: &Value) -> ComplianceScore {
        self.score(&violations.for_principal(principal))
    }

    #[allow(clippy::cast_precision_loss)]
    fn sub_scores(&self, violations: &ViolationSet) -> SubScores {
        let violated = violations.rule_ids();
        let norm = self.config.normalization;

        let coverage = if self.total_severity > 0.0 {
            let violated_severity: f64 = violated
                .iter()
                .filter_map(|id| self.config.criticality.get(*id))
                .sum();
            1.0 - (violated_severity / self.total_severity).min(1.0)
        } else {
            1.0
        };

        let volume = 1.0 - (violations.len() as f64 / norm.volume).min(1.0);

        let overdue = violations.total_overdue_days();
        let timeliness = if overdue > 0 && self.deadline_rules > 0 {
            let average = overdue as f64 / self.deadline_rules as f64;
            1.0 - (average / norm.timeliness).min(1.0)
        } else {
            1.0
        };

        let breadth = if self.total_rules > 0 {
            1.0 - (violated.len() as f64 / self.total_rules as f64).min(1.0)
        } else {
            1.0
        };

        SubScores {
            coverage,
            volume,
            timeliness,
            breadth,
        }
    }
}
