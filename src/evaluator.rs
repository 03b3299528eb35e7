//! Rule evaluation over a frozen fact store.
//!
//! Each rule runs as a staged binding pipeline:
//!
//! 1. positive literals, left to right, as joins;
//! 2. negative literals as anti-joins under the closed-world assumption;
//! 3. derived constraints as filters;
//! 4. projection of the survivors into [`RawViolation`]s.
//!
//! Rules are independent, so a catalog is evaluated on a scoped worker
//! pool. Outcomes are merged in catalog order, which keeps the result
//! identical to a sequential run.

use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::thread;

use crossbeam_channel::{bounded, unbounded};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregator::{GroupKey, ViolationInstance};
use crate::catalog::{Comparison, Constraint, Rule, RuleCatalog};
use crate::error::{AuditError, AuditResult, ConfigurationError, DataQualityError, DataQualityIssue};
use crate::facts::{Binding, FactStore, Pattern};
use crate::time::AuditDate;
use crate::value::{Term, Value};

/// Evaluator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Number of worker threads. `1` evaluates on the calling thread.
    pub workers: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }
}

impl EvaluatorConfig {
    /// Single-threaded evaluation.
    #[must_use]
    pub const fn sequential() -> Self {
        Self { workers: 1 }
    }

    /// Evaluation on `workers` threads.
    #[must_use]
    pub const fn with_workers(workers: usize) -> Self {
        Self { workers }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidWorkers` when `workers` is zero.
    pub const fn validate(&self) -> Result<(), ConfigurationError> {
        if self.workers == 0 {
            return Err(ConfigurationError::InvalidWorkers);
        }
        Ok(())
    }
}

/// One projected rule derivation, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawViolation {
    /// `(rule, principal, object)`.
    pub instance: ViolationInstance,
    /// Originating event id, or the object when the rule projects no event,
    /// qualified by the predicate it was bound from.
    pub event: GroupKey,
    /// Days past the deadline, for rules with an elapsed-day threshold.
    pub overdue_days: Option<i64>,
}

/// Result of evaluating a single rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    /// Projected derivations in discovery order.
    pub violations: Vec<RawViolation>,
    /// Bindings dropped because of bad data.
    pub issues: Vec<DataQualityIssue>,
}

/// Result of evaluating a whole catalog, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// All derivations.
    pub violations: Vec<RawViolation>,
    /// All data-quality issues.
    pub issues: Vec<DataQualityIssue>,
}

impl Evaluation {
    fn absorb(&mut self, outcome: RuleOutcome) {
        self.violations.extend(outcome.violations);
        self.issues.extend(outcome.issues);
    }
}

/// Evaluates rules against one store at one audit date.
#[derive(Debug, Clone, Copy)]
pub struct RuleEvaluator<'a> {
    store: &'a FactStore,
    audit_date: AuditDate,
}

impl<'a> RuleEvaluator<'a> {
    /// Creates an evaluator.
    #[must_use]
    pub const fn new(store: &'a FactStore, audit_date: AuditDate) -> Self {
        Self { store, audit_date }
    }

    /// The audit date used by elapsed-day constraints.
    #[must_use]
    pub const fn audit_date(&self) -> AuditDate {
        self.audit_date
    }

    /// Evaluates every rule of `catalog`.
    ///
    /// # Errors
    ///
    /// - `Configuration` if `config` is invalid or a rule turns out to be
    ///   unsafe at runtime.
    /// - `Internal` if a worker thread cannot be spawned or panics.
    pub fn evaluate(&self, catalog: &RuleCatalog, config: &EvaluatorConfig) -> AuditResult<Evaluation> {
        config.validate()?;
        let workers = config.workers.min(catalog.len());
        let outcomes = if workers <= 1 {
            catalog
                .iter()
                .map(|rule| self.evaluate_rule(rule))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            self.evaluate_parallel(catalog.rules(), workers)?
        };

        let mut evaluation = Evaluation::default();
        for outcome in outcomes {
            evaluation.absorb(outcome);
        }
        Ok(evaluation)
    }

    fn evaluate_parallel(&self, rules: &[Rule], workers: usize) -> AuditResult<Vec<RuleOutcome>> {
        let (job_tx, job_rx) = bounded::<usize>(rules.len());
        let (result_tx, result_rx) = unbounded::<(usize, Result<RuleOutcome, ConfigurationError>)>();
        for idx in 0..rules.len() {
            job_tx
                .send(idx)
                .map_err(|e| AuditError::internal(format!("rule queue closed: {e}")))?;
        }
        drop(job_tx);

        let panicked = thread::scope(|scope| -> AuditResult<usize> {
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("ace-rules-{worker}"))
                    .spawn_scoped(scope, move || {
                        for idx in jobs.iter() {
                            let _ = results.send((idx, self.evaluate_rule(&rules[idx])));
                        }
                    })
                    .map_err(|e| AuditError::internal(format!("spawn rule worker: {e}")))?;
                handles.push(handle);
            }
            Ok(handles.into_iter().filter_map(|h| h.join().err()).count())
        })?;
        drop(result_tx);

        if panicked > 0 {
            return Err(AuditError::internal(format!("{panicked} rule worker(s) panicked")));
        }

        let mut slots: Vec<Option<Result<RuleOutcome, ConfigurationError>>> =
            (0..rules.len()).map(|_| None).collect();
        for (idx, outcome) in result_rx.try_iter() {
            slots[idx] = Some(outcome);
        }
        slots
            .into_iter()
            .zip(rules)
            .map(|(slot, rule)| match slot {
                Some(outcome) => outcome.map_err(AuditError::from),
                None => Err(AuditError::internal(format!("no outcome for rule '{}'", rule.id))),
            })
            .collect()
    }

    /// Evaluates one rule.
    ///
    /// # Errors
    ///
    /// - `UnsafeLiteral` / `UnsafeProjection` if a variable the rule needs is
    ///   unbound when it is reached.
    /// - `InvalidDeadline` if overdue days cannot be represented.
    ///
    /// Catalog validation rules all of these out.
    pub fn evaluate_rule(&self, rule: &Rule) -> Result<RuleOutcome, ConfigurationError> {
        let mut outcome = RuleOutcome::default();
        for pattern in rule.positives() {
            self.check_shape(rule, pattern, &mut outcome.issues);
        }

        let mut bindings = vec![Binding::new()];
        for pattern in rule.positives() {
            bindings = bindings
                .iter()
                .flat_map(|b| self.store.query_bound(pattern, b))
                .collect();
            if bindings.is_empty() {
                break;
            }
        }
        let joined = bindings.len();

        for pattern in rule.negatives() {
            let mut kept = Vec::with_capacity(bindings.len());
            for binding in bindings {
                if let Some(variable) = pattern.unbound_variables(&binding).first() {
                    return Err(ConfigurationError::UnsafeLiteral {
                        rule: rule.id.clone(),
                        literal: format!("not {pattern}"),
                        variable: (*variable).to_string(),
                    });
                }
                if !self.store.holds_bound(pattern, &binding) {
                    kept.push(binding);
                }
            }
            bindings = kept;
        }
        let after_negation = bindings.len();
        let group_source = rule.group_source();

        for binding in bindings {
            let mut overdue_days = None;
            let mut keep = true;
            for constraint in rule.constraints() {
                match self.check_constraint(rule, constraint, &binding)? {
                    Ok(Some(overdue)) => {
                        overdue_days = Some(overdue_days.map_or(overdue, |d: i64| d.max(overdue)));
                    }
                    Ok(None) => {}
                    Err(Rejected::Filtered) => {
                        keep = false;
                        break;
                    }
                    Err(Rejected::Bad(error)) => {
                        warn!(
                            rule = %rule.id,
                            literal = %constraint,
                            error = %error,
                            "dropping binding with bad data"
                        );
                        outcome.issues.push(DataQualityIssue {
                            rule: rule.id.clone(),
                            literal: constraint.to_string(),
                            binding: binding.clone(),
                            error,
                        });
                        keep = false;
                        break;
                    }
                }
            }
            if keep {
                outcome
                    .violations
                    .push(self.project(rule, group_source, &binding, overdue_days)?);
            }
        }

        debug!(
            rule = %rule.id,
            joined,
            after_negation,
            violations = outcome.violations.len(),
            issues = outcome.issues.len(),
            "evaluated rule"
        );
        Ok(outcome)
    }

    fn check_shape(&self, rule: &Rule, pattern: &Pattern, issues: &mut Vec<DataQualityIssue>) {
        let Some(arities) = self.store.arities(&pattern.predicate) else {
            return;
        };
        if arities.contains(&pattern.arity()) {
            return;
        }
        let error = DataQualityError::ShapeMismatch {
            predicate: pattern.predicate.clone(),
            expected: pattern.arity(),
            found: arities.iter().copied().collect(),
        };
        warn!(rule = %rule.id, literal = %pattern, error = %error, "literal never matches");
        issues.push(DataQualityIssue {
            rule: rule.id.clone(),
            literal: pattern.to_string(),
            binding: Binding::new(),
            error,
        });
    }

    /// Outer error: configuration defect. Inner: pass (with overdue days
    /// for deadline constraints) or rejection.
    fn check_constraint(
        &self,
        rule: &Rule,
        constraint: &Constraint,
        binding: &Binding,
    ) -> Result<Result<Option<i64>, Rejected>, ConfigurationError> {
        let unsafe_literal = |variable: &str| ConfigurationError::UnsafeLiteral {
            rule: rule.id.clone(),
            literal: constraint.to_string(),
            variable: variable.to_string(),
        };

        match constraint {
            Constraint::ElapsedDays { since, op, days } => {
                let value = binding.get(since).ok_or_else(|| unsafe_literal(since))?;
                let elapsed = match self.audit_date.elapsed_since(value) {
                    Ok(elapsed) => elapsed,
                    Err(e) => return Ok(Err(Rejected::Bad(e))),
                };
                if !op.accepts(elapsed.cmp(days)) {
                    return Ok(Err(Rejected::Filtered));
                }
                if !matches!(op, Comparison::Gt | Comparison::Ge) {
                    return Ok(Ok(None));
                }
                let overdue = elapsed
                    .checked_sub(*days)
                    .ok_or_else(|| ConfigurationError::InvalidDeadline {
                        rule: rule.id.clone(),
                        days: *days,
                    })?;
                Ok(Ok(Some(overdue)))
            }
            Constraint::Compare { left, op, right } => {
                let left = resolve(left, binding).map_err(unsafe_literal)?;
                let right = resolve(right, binding).map_err(unsafe_literal)?;
                match compare_values(left, *op, right) {
                    Ok(true) => Ok(Ok(None)),
                    Ok(false) => Ok(Err(Rejected::Filtered)),
                    Err(e) => Ok(Err(Rejected::Bad(e))),
                }
            }
        }
    }

    /// Builds the violation for one surviving binding. An attributed
    /// principal comes from the first matching fact, else the fallback.
    fn project(
        &self,
        rule: &Rule,
        group_source: &str,
        binding: &Binding,
        overdue_days: Option<i64>,
    ) -> Result<RawViolation, ConfigurationError> {
        let lookup = |role: &'static str, binding: &Binding, variable: &str| {
            binding
                .get(variable)
                .cloned()
                .ok_or_else(|| ConfigurationError::UnsafeProjection {
                    rule: rule.id.clone(),
                    role,
                    variable: variable.to_string(),
                })
        };
        let projection = &rule.projection;
        let principal = match &projection.attribution {
            None => lookup("principal", binding, &projection.principal)?,
            Some(attribution) => match self.store.query_bound(&attribution.via, binding).next() {
                Some(attributed) => lookup("principal", &attributed, &projection.principal)?,
                None => lookup("fallback", binding, &attribution.fallback)?,
            },
        };
        let object = lookup("object", binding, &projection.object)?;
        let event = match &projection.event {
            Some(variable) => lookup("event", binding, variable)?,
            None => object.clone(),
        };
        Ok(RawViolation {
            instance: ViolationInstance {
                rule: rule.id.clone(),
                principal,
                object,
            },
            event: GroupKey::new(group_source, event),
            overdue_days,
        })
    }
}

enum Rejected {
    Filtered,
    Bad(DataQualityError),
}

fn resolve<'b>(term: &'b Term, binding: &'b Binding) -> Result<&'b Value, &'b str> {
    match term {
        Term::Const(value) => Ok(value),
        Term::Var(name) => binding.get(name).ok_or(name.as_str()),
        Term::Wildcard => Err("_"),
    }
}

/// Equality works across kinds; ordering only between two atoms or two ints.
fn compare_values(left: &Value, op: Comparison, right: &Value) -> Result<bool, DataQualityError> {
    if op.is_equality() {
        let ordering = if left == right { Ordering::Equal } else { Ordering::Less };
        return Ok(op.accepts(ordering));
    }
    let ordering = match (left, right) {
        (Value::Atom(a), Value::Atom(b)) => a.cmp(b),
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        _ => {
            return Err(DataQualityError::Incomparable {
                left: left.to_string(),
                right: right.to_string(),
            })
        }
    };
    Ok(op.accepts(ordering))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Literal, Projection, RuleId};
    use crate::facts::Fact;

    fn date(s: &str) -> AuditDate {
        AuditDate::parse(s).unwrap()
    }

    fn auth_store(assigned: bool) -> FactStore {
        let mut store = FactStore::new();
        store.assert(Fact::new("has_role", ["dr_a", "doctor"]));
        store.assert(Fact::new("owns_phi_record", ["pat_1", "rec_1"]));
        store.assert(Fact::new("read_phi", ["dr_a", "rec_1", "treatment", "e1"]));
        if assigned {
            store.assert(Fact::new("is_doctor_of", ["dr_a", "pat_1"]));
        }
        store
    }

    fn catalog() -> RuleCatalog {
        RuleCatalog::standard().unwrap()
    }

    #[test]
    fn test_unassigned_doctor_fires_auth() {
        let store = auth_store(false);
        let evaluator = RuleEvaluator::new(&store, date("2025-06-01"));
        let rule = catalog().get(&RuleId::new("hipaa_auth")).cloned().unwrap();
        let outcome = evaluator.evaluate_rule(&rule).unwrap();
        assert_eq!(outcome.violations.len(), 1);
        let v = &outcome.violations[0];
        assert_eq!(v.instance, ViolationInstance::new("hipaa_auth", "dr_a", "rec_1"));
        assert_eq!(v.event, GroupKey::new("read_phi", "e1"));
        assert_eq!(v.overdue_days, None);
    }

    #[test]
    fn test_assigned_doctor_does_not_fire() {
        let store = auth_store(true);
        let evaluator = RuleEvaluator::new(&store, date("2025-06-01"));
        let rule = catalog().get(&RuleId::new("hipaa_auth")).cloned().unwrap();
        assert!(evaluator.evaluate_rule(&rule).unwrap().violations.is_empty());
    }

    fn access_store(request_date: &str) -> FactStore {
        let mut store = FactStore::new();
        store.assert(Fact::new("owns_phi_record", ["pat_1", "rec_1"]));
        store.assert(Fact::new("is_doctor_of", ["dr_a", "pat_1"]));
        store.assert(Fact::new(
            "request_access",
            ["pat_1", "rec_1", "q1", request_date],
        ));
        store
    }

    #[test]
    fn test_deadline_is_strict() {
        let rule = catalog().get(&RuleId::new("gdpr_art15_access")).cloned().unwrap();

        let on_time = access_store("2025-01-01");
        let outcome = RuleEvaluator::new(&on_time, date("2025-01-31"))
            .evaluate_rule(&rule)
            .unwrap();
        assert!(outcome.violations.is_empty());

        let late = RuleEvaluator::new(&on_time, date("2025-02-01"))
            .evaluate_rule(&rule)
            .unwrap();
        assert_eq!(late.violations.len(), 1);
        assert_eq!(late.violations[0].overdue_days, Some(1));
        assert_eq!(
            late.violations[0].instance,
            ViolationInstance::new("gdpr_art15_access", "dr_a", "q1")
        );
    }

    #[test]
    fn test_fulfilled_request_does_not_fire() {
        let rule = catalog().get(&RuleId::new("gdpr_art15_access")).cloned().unwrap();
        let mut store = access_store("2025-01-01");
        store.assert(Fact::new("request_fulfilled", ["q1"]));
        let outcome = RuleEvaluator::new(&store, date("2025-06-01"))
            .evaluate_rule(&rule)
            .unwrap();
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn test_unassigned_patient_request_falls_back_to_patient() {
        let rule = catalog().get(&RuleId::new("gdpr_art15_access")).cloned().unwrap();
        let mut store = FactStore::new();
        store.assert(Fact::new("owns_phi_record", ["pat_1", "rec_1"]));
        store.assert(Fact::new("request_access", ["pat_1", "rec_1", "q1", "2025-01-01"]));
        let outcome = RuleEvaluator::new(&store, date("2025-03-01"))
            .evaluate_rule(&rule)
            .unwrap();
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(
            outcome.violations[0].instance,
            ViolationInstance::new("gdpr_art15_access", "pat_1", "q1")
        );
        assert_eq!(outcome.violations[0].event, GroupKey::new("request_access", "q1"));
    }

    #[test]
    fn test_two_doctors_yield_one_violation_for_first_assigned() {
        let rule = catalog().get(&RuleId::new("gdpr_art15_access")).cloned().unwrap();
        let mut store = access_store("2025-01-01");
        store.assert(Fact::new("is_doctor_of", ["dr_0", "pat_1"]));
        let outcome = RuleEvaluator::new(&store, date("2025-03-01"))
            .evaluate_rule(&rule)
            .unwrap();
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(
            outcome.violations[0].instance,
            ViolationInstance::new("gdpr_art15_access", "dr_a", "q1")
        );
    }

    #[test]
    fn test_unrepresentable_overdue_days_is_an_error() {
        let rule = Rule::new(
            "always_late",
            vec![
                Literal::positive(
                    "request_access",
                    vec![Term::var("P"), Term::Wildcard, Term::var("Q"), Term::var("T")],
                ),
                Literal::Constraint(Constraint::elapsed_days("T", Comparison::Gt, i64::MIN)),
            ],
            Projection::new("P", "Q"),
        );
        let store = access_store("2025-01-01");
        let err = RuleEvaluator::new(&store, date("2025-03-01"))
            .evaluate_rule(&rule)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidDeadline { days: i64::MIN, .. }));

        let mut lenient = rule;
        lenient.body[1] = Literal::Constraint(Constraint::elapsed_days("T", Comparison::Lt, i64::MAX));
        let outcome = RuleEvaluator::new(&store, date("2025-03-01"))
            .evaluate_rule(&lenient)
            .unwrap();
        assert_eq!(outcome.violations[0].overdue_days, None);
    }

    #[test]
    fn test_malformed_date_drops_only_that_binding() {
        let rule = catalog().get(&RuleId::new("gdpr_art15_access")).cloned().unwrap();
        let mut store = access_store("2025-01-01");
        store.assert(Fact::new("request_access", ["pat_1", "rec_1", "q2", "2025-13-45"]));
        let outcome = RuleEvaluator::new(&store, date("2025-06-01"))
            .evaluate_rule(&rule)
            .unwrap();
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.issues.len(), 1);
        let issue = &outcome.issues[0];
        assert_eq!(issue.rule, RuleId::new("gdpr_art15_access"));
        assert_eq!(issue.binding.get("Q"), Some(&Value::atom("q2")));
        assert!(matches!(issue.error, DataQualityError::MalformedDate { .. }));
    }

    #[test]
    fn test_shape_mismatch_reported_once() {
        let rule = catalog().get(&RuleId::new("hipaa_auth")).cloned().unwrap();
        let mut store = auth_store(false);
        store.assert(Fact::new("owns_phi_record", ["pat_2"]));
        let outcome = RuleEvaluator::new(&store, date("2025-06-01"))
            .evaluate_rule(&rule)
            .unwrap();
        assert!(outcome.issues.is_empty());

        let mut odd = FactStore::new();
        odd.assert(Fact::new("has_role", ["dr_a", "doctor"]));
        odd.assert(Fact::new("read_phi", ["dr_a", "rec_1", "e1"]));
        let outcome = RuleEvaluator::new(&odd, date("2025-06-01"))
            .evaluate_rule(&rule)
            .unwrap();
        assert_eq!(outcome.issues.len(), 1);
        assert!(matches!(
            outcome.issues[0].error,
            DataQualityError::ShapeMismatch { expected: 4, .. }
        ));
    }

    #[test]
    fn test_compare_constraint() {
        let rule = Rule::new(
            "self_read",
            vec![
                Literal::positive("read_phi", vec![Term::var("S"), Term::var("R"), Term::Wildcard, Term::var("E")]),
                Literal::positive("owns_phi_record", vec![Term::var("P"), Term::var("R")]),
                Literal::Constraint(Constraint::compare(Term::var("S"), Comparison::Eq, Term::var("P"))),
            ],
            Projection::new("S", "R").with_event("E"),
        );
        let mut store = FactStore::new();
        store.assert(Fact::new("owns_phi_record", ["pat_1", "rec_1"]));
        store.assert(Fact::new("read_phi", ["pat_1", "rec_1", "portal", "e1"]));
        store.assert(Fact::new("read_phi", ["dr_a", "rec_1", "portal", "e2"]));
        let outcome = RuleEvaluator::new(&store, date("2025-06-01"))
            .evaluate_rule(&rule)
            .unwrap();
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].event, GroupKey::new("read_phi", "e1"));
    }

    #[test]
    fn test_ordering_across_kinds_is_incomparable() {
        let err = compare_values(&Value::atom("a"), Comparison::Lt, &Value::from(3)).unwrap_err();
        assert!(matches!(err, DataQualityError::Incomparable { .. }));
        assert!(compare_values(&Value::atom("a"), Comparison::Ne, &Value::from(3)).unwrap());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let store = FactStore::new();
        let err = RuleEvaluator::new(&store, date("2025-06-01"))
            .evaluate(&catalog(), &EvaluatorConfig::with_workers(0))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut store = auth_store(false);
        store.assert(Fact::new("has_role", ["dr_a", "nurse"]));
        store.assert(Fact::new("read_attribute", ["dr_a", "rec_1", "genome"]));
        store.assert(Fact::new("role_can_access_type", ["doctor", "genome"]));
        let evaluator = RuleEvaluator::new(&store, date("2025-06-01"));
        let catalog = catalog();
        let sequential = evaluator
            .evaluate(&catalog, &EvaluatorConfig::sequential())
            .unwrap();
        let parallel = evaluator
            .evaluate(&catalog, &EvaluatorConfig::with_workers(4))
            .unwrap();
        assert_eq!(sequential, parallel);
        assert!(!sequential.violations.is_empty());
    }
}
