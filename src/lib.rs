//! # ace-audit - Rule-driven compliance auditing
//!
//! Audits a hospital's access and request history against declarative
//! HIPAA and GDPR violation rules, then scores the result.
//!
//! ## Core Concepts
//!
//! - **Fact**: a ground tuple `predicate(arg1, .., argN)` in an indexed, append-only store
//! - **Rule**: positive literals (joins), negative literals (closed-world anti-joins)
//!   and derived constraints, projected to `(principal, object)`
//! - **Violation**: a deduplicated `(rule, principal, object)` instance with provenance
//! - **Score**: a weighted composite of coverage, volume, timeliness and breadth
//!
//! ## Usage
//!
//! ```rust
//! use ace_audit::{AuditDate, Auditor, Event, FactStore, Fact};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = FactStore::new();
//! store.assert(Fact::new("has_role", ["dr_a", "doctor"]));
//! store.assert(Fact::new("owns_phi_record", ["pat_1", "rec_1"]));
//! store.ingest(&Event::ReadPhi {
//!     principal: "dr_a".into(),
//!     record: "rec_1".into(),
//!     purpose: "treatment".into(),
//!     event_id: "e1".into(),
//! })?;
//!
//! let auditor = Auditor::standard()?;
//! let report = auditor.run(&store, AuditDate::parse("2025-06-01")?)?;
//! assert!(report.score.composite < 1.0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data layer
pub mod error;
pub mod facts;
pub mod ingest;
pub mod time;
pub mod value;

// Rules and evaluation
pub mod aggregator;
pub mod catalog;
pub mod evaluator;

// Scoring and runs
pub mod audit;
pub mod scoring;

pub use aggregator::{GroupKey, RuleOverlap, ViolationEntry, ViolationInstance, ViolationRecord, ViolationSet};
pub use audit::{AuditReport, AuditRunId, AuditSummary, Auditor, PrincipalScore};
pub use catalog::{Attribution, Comparison, Constraint, Literal, Projection, Rule, RuleCatalog, RuleId};
pub use error::{AuditError, AuditResult, ConfigurationError, DataQualityError, DataQualityIssue};
pub use evaluator::{Evaluation, EvaluatorConfig, RawViolation, RuleEvaluator, RuleOutcome};
pub use facts::{Binding, Fact, FactStore, Matches, Pattern};
pub use ingest::{Event, KnowledgeBase, RequestKind};
pub use scoring::{ComplianceScore, Normalization, Scorer, ScoringConfig, SubScores, Weights};
pub use time::{days_since, AuditDate};
pub use value::{Term, Value};
