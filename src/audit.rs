//! Audit runs: evaluate, aggregate and score in one call.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::{RuleOverlap, ViolationSet};
use crate::catalog::{RuleCatalog, RuleId};
use crate::error::{AuditError, AuditResult, ConfigurationError, DataQualityIssue};
use crate::evaluator::{EvaluatorConfig, RuleEvaluator};
use crate::facts::FactStore;
use crate::scoring::{ComplianceScore, Scorer, ScoringConfig};
use crate::time::AuditDate;
use crate::value::Value;

/// Unique identifier of one audit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditRunId(uuid::Uuid);

impl AuditRunId {
    /// Creates a new random run id.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for AuditRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Headline counts for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    /// Facts in the audited store.
    pub fact_count: usize,
    /// Distinct violation instances.
    pub violation_count: usize,
    /// Distinct violating principals.
    pub unique_violators: usize,
    /// Violation instances per rule.
    pub by_rule: BTreeMap<RuleId, usize>,
    /// Events with more than one distinct rule.
    pub overlap_count: usize,
    /// Bindings dropped for bad data.
    pub issue_count: usize,
}

/// Score of one principal's violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalScore {
    /// The principal.
    pub principal: Value,
    /// Their score.
    pub score: ComplianceScore,
}

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Run id.
    pub run_id: AuditRunId,
    /// Reference date for deadline rules.
    pub audit_date: AuditDate,
    /// Fingerprint of the rule catalog.
    pub catalog_fingerprint: String,
    /// Fingerprint of the scoring configuration.
    pub config_fingerprint: String,
    /// Deduplicated violations.
    pub violations: ViolationSet,
    /// Events where more than one rule fired.
    pub overlaps: Vec<RuleOverlap>,
    /// Distinct rule count per event -> number of events.
    pub distinct_rule_distribution: BTreeMap<usize, usize>,
    /// Data-quality issues, in catalog order.
    pub issues: Vec<DataQualityIssue>,
    /// Organisation-wide score.
    pub score: ComplianceScore,
    /// Per-principal scores, ordered by principal.
    pub principal_scores: Vec<PrincipalScore>,
    /// Headline counts.
    pub summary: AuditSummary,
}

impl AuditReport {
    /// Returns true when no rule fired and no data was dropped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.issues.is_empty()
    }

    /// Serializes the report to pretty JSON.
    ///
    /// # Errors
    ///
    /// `Internal` if serialization fails.
    pub fn to_json_pretty(&self) -> AuditResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AuditError::internal(format!("serialize audit report: {e}")))
    }
}

/// A validated catalog, scorer and evaluator configuration.
///
/// All configuration is checked at construction, so [`Auditor::run`]
/// never starts with a bad policy.
#[derive(Debug, Clone)]
pub struct Auditor {
    catalog: RuleCatalog,
    scorer: Scorer,
    evaluator: EvaluatorConfig,
}

impl Auditor {
    /// Builds an auditor.
    ///
    /// # Errors
    ///
    /// Any [`ConfigurationError`] from the scoring or evaluator configuration.
    pub fn new(
        catalog: RuleCatalog,
        scoring: ScoringConfig,
        evaluator: EvaluatorConfig,
    ) -> Result<Self, ConfigurationError> {
        evaluator.validate()?;
        let scorer = Scorer::new(scoring, &catalog)?;
        Ok(Self {
            catalog,
            scorer,
            evaluator,
        })
    }

    /// The built-in catalog with its standard scoring configuration.
    ///
    /// # Errors
    ///
    /// Only if the built-in catalog is invalid.
    pub fn standard() -> Result<Self, ConfigurationError> {
        Self::new(
            RuleCatalog::standard()?,
            ScoringConfig::standard(),
            EvaluatorConfig::default(),
        )
    }

    /// Replaces the evaluator configuration.
    ///
    /// # Errors
    ///
    /// `InvalidWorkers` for zero workers.
    pub fn with_evaluator(mut self, evaluator: EvaluatorConfig) -> Result<Self, ConfigurationError> {
        evaluator.validate()?;
        self.evaluator = evaluator;
        Ok(self)
    }

    /// The rule catalog.
    #[must_use]
    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// The scorer.
    #[must_use]
    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Audits `store` as of `audit_date`.
    ///
    /// # Errors
    ///
    /// `Internal` if the worker pool fails. Bad data never fails a run; it
    /// is reported in [`AuditReport::issues`].
    pub fn run(&self, store: &FactStore, audit_date: AuditDate) -> AuditResult<AuditReport> {
        let run_id = AuditRunId::new();
        info!(
            run_id = %run_id,
            audit_date = %audit_date,
            facts = store.len(),
            rules = self.catalog.len(),
            workers = self.evaluator.workers,
            "starting audit run"
        );

        let evaluation = RuleEvaluator::new(store, audit_date).evaluate(&self.catalog, &self.evaluator)?;
        let violations = ViolationSet::from_raw(evaluation.violations);

        let overlaps = violations.overlaps();
        for overlap in &overlaps {
            warn!(run_id = %run_id, overlap = %overlap, "more than one rule fired for one event");
        }

        let score = self.scorer.score(&violations);
        let principal_scores = violations
            .principals()
            .into_iter()
            .map(|principal| PrincipalScore {
                principal: principal.clone(),
                score: self.scorer.score_principal(&violations, principal),
            })
            .collect();

        let summary = AuditSummary {
            fact_count: store.len(),
            violation_count: violations.len(),
            unique_violators: violations.principals().len(),
            by_rule: violations.count_by_rule(),
            overlap_count: overlaps.len(),
            issue_count: evaluation.issues.len(),
        };

        info!(
            run_id = %run_id,
            violations = summary.violation_count,
            violators = summary.unique_violators,
            overlaps = summary.overlap_count,
            issues = summary.issue_count,
            composite = score.composite,
            "audit run complete"
        );

        Ok(AuditReport {
            run_id,
            audit_date,
            catalog_fingerprint: self.catalog.fingerprint().to_string(),
            config_fingerprint: self.scorer.fingerprint().to_string(),
            distinct_rule_distribution: violations.distinct_rule_distribution(),
            violations,
            overlaps,
            issues: evaluation.issues,
            score,
            principal_scores,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Fact;

    fn date(s: &str) -> AuditDate {
        AuditDate::parse(s).unwrap()
    }

    #[test]
    fn test_empty_store_is_clean() {
        let auditor = Auditor::standard().unwrap();
        let report = auditor.run(&FactStore::new(), date("2025-06-01")).unwrap();
        assert!(report.is_clean());
        assert!((report.score.composite - 1.0).abs() < f64::EPSILON);
        assert!(report.principal_scores.is_empty());
        assert_eq!(report.summary.fact_count, 0);
    }

    #[test]
    fn test_report_summary() {
        let mut store = FactStore::new();
        store.assert(Fact::new("has_role", ["dr_a", "doctor"]));
        store.assert(Fact::new("owns_phi_record", ["pat_1", "rec_1"]));
        store.assert(Fact::new("has_unrestricted_status", ["pat_1", "treatment"]));
        store.assert(Fact::new("read_phi", ["dr_a", "rec_1", "treatment", "e1"]));

        let auditor = Auditor::standard().unwrap();
        let report = auditor.run(&store, date("2025-06-01")).unwrap();
        assert_eq!(report.summary.violation_count, 1);
        assert_eq!(report.summary.unique_violators, 1);
        assert_eq!(report.summary.by_rule.get(&RuleId::new("hipaa_auth")), Some(&1));
        assert_eq!(report.principal_scores.len(), 1);
        assert_eq!(report.principal_scores[0].principal, Value::atom("dr_a"));
        assert_eq!(report.catalog_fingerprint, auditor.catalog().fingerprint());
        assert!(report.score.composite < 1.0);
    }

    #[test]
    fn test_report_serializes() {
        let auditor = Auditor::standard().unwrap();
        let report = auditor.run(&FactStore::new(), date("2025-06-01")).unwrap();
        let json = report.to_json_pretty().unwrap();
        let back: AuditReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.audit_date, report.audit_date);
    }

    #[test]
    fn test_bad_scoring_config_fails_before_run() {
        let mut scoring = ScoringConfig::standard();
        scoring.weights.coverage = f64::INFINITY;
        let err = Auditor::new(
            RuleCatalog::standard().unwrap(),
            scoring,
            EvaluatorConfig::sequential(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidWeight { .. }));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(AuditRunId::new(), AuditRunId::new());
    }
}
