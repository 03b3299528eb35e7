//! Rule definitions: tagged literals, derived constraints and projections.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::facts::Pattern;
use crate::value::Term;

/// Reserved predicate name. Rules may never read their own output.
pub const VIOLATION_PREDICATE: &str = "violation";

/// Stable rule identifier, e.g. `hipaa_auth`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Creates a rule identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Comparison operator for derived constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Comparison {
    /// Applies the operator to an ordering of `left` relative to `right`.
    #[must_use]
    pub const fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Ne => !matches!(ordering, Ordering::Equal),
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Le => !matches!(ordering, Ordering::Greater),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Ge => !matches!(ordering, Ordering::Less),
        }
    }

    /// Returns true for operators that only test equality.
    #[must_use]
    pub const fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }

    /// Operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A named comparison over variables bound by positive literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Whole days from the date bound to `since` until the audit date,
    /// compared against `days`.
    ElapsedDays {
        /// Variable holding a `YYYY-MM-DD` date.
        since: String,
        /// Comparison applied as `elapsed <op> days`.
        op: Comparison,
        /// Threshold in days.
        days: i64,
    },

    /// `left <op> right` over two terms.
    Compare {
        /// Left operand.
        left: Term,
        /// Operator.
        op: Comparison,
        /// Right operand.
        right: Term,
    },
}

impl Constraint {
    /// Creates an elapsed-day constraint.
    #[must_use]
    pub fn elapsed_days(since: impl Into<String>, op: Comparison, days: i64) -> Self {
        Self::ElapsedDays {
            since: since.into(),
            op,
            days,
        }
    }

    /// Creates a term comparison.
    #[must_use]
    pub const fn compare(left: Term, op: Comparison, right: Term) -> Self {
        Self::Compare { left, op, right }
    }

    /// Variables referenced by this constraint.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Self::ElapsedDays { since, .. } => vec![since.as_str()],
            Self::Compare { left, right, .. } => {
                left.variable().into_iter().chain(right.variable()).collect()
            }
        }
    }

    fn has_wildcard(&self) -> bool {
        matches!(
            self,
            Self::Compare { left: Term::Wildcard, .. } | Self::Compare { right: Term::Wildcard, .. }
        )
    }

    /// Returns the threshold if this is a deadline (elapsed-day) constraint.
    #[must_use]
    pub const fn deadline_days(&self) -> Option<i64> {
        match self {
            Self::ElapsedDays { days, .. } => Some(*days),
            Self::Compare { .. } => None,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElapsedDays { since, op, days } => {
                write!(f, "elapsed_days({since}) {op} {days}")
            }
            Self::Compare { left, op, right } => write!(f, "{left} {op} {right}"),
        }
    }
}

/// One element of a rule body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    /// Join: keep bindings extended by every matching fact.
    Positive(Pattern),
    /// Anti-join: drop bindings for which the fully bound pattern holds.
    Negative(Pattern),
    /// Filter: drop bindings for which the constraint is false.
    Constraint(Constraint),
}

impl Literal {
    /// Creates a positive literal.
    #[must_use]
    pub fn positive(predicate: impl Into<String>, args: Vec<Term>) -> Self {
        Self::Positive(Pattern::new(predicate, args))
    }

    /// Creates a negative literal.
    #[must_use]
    pub fn negative(predicate: impl Into<String>, args: Vec<Term>) -> Self {
        Self::Negative(Pattern::new(predicate, args))
    }

    /// Predicate referenced by a positive or negative literal.
    #[must_use]
    pub fn predicate(&self) -> Option<&str> {
        match self {
            Self::Positive(p) | Self::Negative(p) => Some(&p.predicate),
            Self::Constraint(_) => None,
        }
    }

    /// Variables referenced by this literal.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Self::Positive(p) | Self::Negative(p) => p.variables().collect(),
            Self::Constraint(c) => c.variables(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive(p) => write!(f, "{p}"),
            Self::Negative(p) => write!(f, "not {p}"),
            Self::Constraint(c) => write!(f, "{c}"),
        }
    }
}

/// Resolves a violation's principal after the body has fired.
///
/// The body decides *whether* a violation exists. The attribution decides
/// *who* answers for it: the first fact matching `via` under the surviving
/// binding supplies the principal, in assertion order. When nothing
/// matches, the variable named by `fallback` is used instead. Either way
/// one binding yields exactly one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribution {
    /// Pattern binding the projection's principal variable.
    pub via: Pattern,
    /// Body-bound variable used when `via` matches nothing.
    pub fallback: String,
}

impl Attribution {
    /// Creates an attribution.
    #[must_use]
    pub fn new(via: Pattern, fallback: impl Into<String>) -> Self {
        Self {
            via,
            fallback: fallback.into(),
        }
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} else {}", self.via, self.fallback)
    }
}

/// Which bound variables become the violation's `(Principal, ObjectID)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Projection {
    /// Variable naming the accountable principal.
    pub principal: String,
    /// Variable naming the violating object (record, request, breach).
    pub object: String,
    /// Variable naming the originating event, used for overlap grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Binds `principal` outside the body. See [`Attribution`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

impl Projection {
    /// Creates a projection without an event variable.
    #[must_use]
    pub fn new(principal: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            object: object.into(),
            event: None,
            attribution: None,
        }
    }

    /// Sets the event variable.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Resolves the principal through `attribution` instead of the body.
    #[must_use]
    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = Some(attribution);
        self
    }

    /// Variable whose binding keys overlap groups: the event, else the object.
    #[must_use]
    pub fn group_variable(&self) -> &str {
        self.event.as_deref().unwrap_or(&self.object)
    }

    /// Projected variables the body itself must bind.
    fn body_roles(&self) -> impl Iterator<Item = (&'static str, &str)> {
        let principal = match &self.attribution {
            Some(a) => ("fallback", a.fallback.as_str()),
            None => ("principal", self.principal.as_str()),
        };
        [Some(principal), Some(("object", self.object.as_str())), self.event.as_deref().map(|v| ("event", v))]
            .into_iter()
            .flatten()
    }
}

/// A declarative violation rule.
///
/// The body is staged by the evaluator: positive literals in written order,
/// then negative literals, then constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier.
    pub id: RuleId,
    /// Optional policy citation or human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tagged body literals.
    pub body: Vec<Literal>,
    /// Violation projection.
    pub projection: Projection,
}

impl Rule {
    /// Creates a rule. Call [`Rule::validate`] (or build a catalog) before use.
    #[must_use]
    pub fn new(id: impl Into<RuleId>, body: Vec<Literal>, projection: Projection) -> Self {
        Self {
            id: id.into(),
            description: None,
            body,
            projection,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Positive literals in written order.
    pub fn positives(&self) -> impl Iterator<Item = &Pattern> {
        self.body.iter().filter_map(|l| match l {
            Literal::Positive(p) => Some(p),
            _ => None,
        })
    }

    /// Negative literals in written order.
    pub fn negatives(&self) -> impl Iterator<Item = &Pattern> {
        self.body.iter().filter_map(|l| match l {
            Literal::Negative(p) => Some(p),
            _ => None,
        })
    }

    /// Derived constraints in written order.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.body.iter().filter_map(|l| match l {
            Literal::Constraint(c) => Some(c),
            _ => None,
        })
    }

    /// Threshold of the first deadline constraint, if any.
    #[must_use]
    pub fn deadline_days(&self) -> Option<i64> {
        self.constraints().find_map(Constraint::deadline_days)
    }

    /// Returns true if violations of this rule carry overdue days.
    #[must_use]
    pub fn is_deadline_rule(&self) -> bool {
        self.deadline_days().is_some()
    }

    /// Predicate of the first positive literal binding the group variable.
    ///
    /// Identifiers are only unique within one kind of record, so overlap
    /// groups are keyed by this predicate as well as the bound value.
    #[must_use]
    pub fn group_source(&self) -> &str {
        let variable = self.projection.group_variable();
        self.positives()
            .find(|p| p.variables().any(|v| v == variable))
            .map_or("", |p| p.predicate.as_str())
    }

    /// Variables bound by the positive literals.
    #[must_use]
    pub fn bound_variables(&self) -> BTreeSet<&str> {
        self.positives().flat_map(|p| p.variables()).collect()
    }

    /// Checks the rule for configuration defects.
    ///
    /// # Errors
    ///
    /// - `EmptyRuleId` for a blank identifier.
    /// - `NoPositiveLiteral` if nothing can seed bindings.
    /// - `RecursiveRule` if any literal reads the reserved violation predicate.
    /// - `UnsafeLiteral` if a negative literal or constraint references a
    ///   variable no positive literal binds.
    /// - `UnsafeProjection` likewise for projected variables, and for an
    ///   attribution that does not bind the principal or reads unbound
    ///   variables.
    /// - `InvalidDeadline` for a negative elapsed-day threshold.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConfigurationError::EmptyRuleId);
        }
        if self.positives().next().is_none() {
            return Err(ConfigurationError::NoPositiveLiteral {
                rule: self.id.clone(),
            });
        }
        if let Some(predicate) = self
            .body
            .iter()
            .filter_map(Literal::predicate)
            .find(|p| *p == VIOLATION_PREDICATE)
        {
            return Err(ConfigurationError::RecursiveRule {
                rule: self.id.clone(),
                predicate: predicate.to_string(),
            });
        }

        if let Some(constraint) = self.constraints().find(|c| c.has_wildcard()) {
            return Err(ConfigurationError::UnsafeLiteral {
                rule: self.id.clone(),
                literal: constraint.to_string(),
                variable: "_".to_string(),
            });
        }

        if let Some(days) = self.constraints().filter_map(Constraint::deadline_days).find(|d| *d < 0) {
            return Err(ConfigurationError::InvalidDeadline {
                rule: self.id.clone(),
                days,
            });
        }

        let bound = self.bound_variables();
        for literal in &self.body {
            if matches!(literal, Literal::Positive(_)) {
                continue;
            }
            if let Some(variable) = literal.variables().into_iter().find(|v| !bound.contains(v)) {
                return Err(ConfigurationError::UnsafeLiteral {
                    rule: self.id.clone(),
                    literal: literal.to_string(),
                    variable: variable.to_string(),
                });
            }
        }
        for (role, variable) in self.projection.body_roles() {
            if !bound.contains(variable) {
                return Err(ConfigurationError::UnsafeProjection {
                    rule: self.id.clone(),
                    role,
                    variable: variable.to_string(),
                });
            }
        }
        if let Some(attribution) = &self.projection.attribution {
            let principal = self.projection.principal.as_str();
            if bound.contains(principal) || attribution.via.variables().all(|v| v != principal) {
                return Err(ConfigurationError::UnsafeProjection {
                    rule: self.id.clone(),
                    role: "principal",
                    variable: principal.to_string(),
                });
            }
            if let Some(variable) = attribution
                .via
                .variables()
                .find(|v| *v != principal && !bound.contains(v))
            {
                return Err(ConfigurationError::UnsafeProjection {
                    rule: self.id.clone(),
                    role: "attribution",
                    variable: variable.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}, {}) :- ",
            self.id, self.projection.principal, self.projection.object
        )?;
        for (i, literal) in self.body.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{literal}")?;
        }
        Ok(())
    }
}
