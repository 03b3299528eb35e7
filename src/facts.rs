//! Run-scoped fact store.
//!
//! The store holds ground [`Fact`] tuples and answers [`Pattern`] queries
//! with lazy, insertion-ordered streams of variable [`Binding`]s.
//!
//! Facts are append-only: re-asserting an identical fact is a no-op and
//! nothing is ever overwritten or removed. Every predicate keeps one hash
//! index per argument position, and a query scans only the smallest row
//! list among its bound positions, so per-literal lookups stay sub-linear
//! in the total fact count.
//!
//! The store has no interior mutability. The write phase needs `&mut self`;
//! evaluation only needs `&self`, so a populated store can be shared across
//! evaluator threads without locks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Term, Value};

/// Variable assignments produced by matching patterns against facts.
pub type Binding = BTreeMap<String, Value>;

const NO_ROWS: &[usize] = &[];

/// An immutable ground tuple `predicate(arg1, .., argN)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fact {
    /// Predicate name.
    pub predicate: String,
    /// Ground arguments.
    pub args: Vec<Value>,
}

impl Fact {
    /// Creates a fact from anything convertible into values.
    ///
    /// ```
    /// use ace_audit::Fact;
    ///
    /// let fact = Fact::new("has_role", ["doc_1", "doctor"]);
    /// assert_eq!(fact.arity(), 2);
    /// ```
    #[must_use]
    pub fn new<I, V>(predicate: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            predicate: predicate.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of arguments.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// A predicate pattern: `predicate(term1, .., termN)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pattern {
    /// Predicate name.
    pub predicate: String,
    /// Argument terms.
    pub args: Vec<Term>,
}

impl Pattern {
    /// Creates a pattern.
    #[must_use]
    pub fn new(predicate: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
        }
    }

    /// Number of argument terms.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Variables mentioned by this pattern, in argument order (may repeat).
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(Term::variable)
    }

    /// Variables of this pattern that `binding` leaves unbound.
    #[must_use]
    pub fn unbound_variables<'a>(&'a self, binding: &Binding) -> Vec<&'a str> {
        self.variables()
            .filter(|v| !binding.contains_key(*v))
            .collect()
    }

    /// Replaces every variable bound in `binding` with its value.
    #[must_use]
    pub fn substitute(&self, binding: &Binding) -> Self {
        let args = self
            .args
            .iter()
            .map(|term| match term {
                Term::Var(name) => binding
                    .get(name)
                    .map_or_else(|| term.clone(), |v| Term::Const(v.clone())),
                other => other.clone(),
            })
            .collect();
        Self {
            predicate: self.predicate.clone(),
            args,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, term) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{term}")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Default)]
struct PredicateIndex {
    rows: Vec<usize>,
    by_arg: Vec<HashMap<Value, Vec<usize>>>,
    arities: BTreeSet<usize>,
}

impl PredicateIndex {
    fn insert(&mut self, row: usize, fact: &Fact) {
        self.rows.push(row);
        self.arities.insert(fact.arity());
        if self.by_arg.len() < fact.arity() {
            self.by_arg.resize_with(fact.arity(), HashMap::new);
        }
        for (pos, value) in fact.args.iter().enumerate() {
            self.by_arg[pos].entry(value.clone()).or_default().push(row);
        }
    }

    /// Smallest candidate row list among the bound positions of `args`.
    fn candidates<'a>(&'a self, args: &[Term]) -> &'a [usize] {
        let mut best: &[usize] = &self.rows;
        for (pos, term) in args.iter().enumerate() {
            let Term::Const(value) = term else {
                continue;
            };
            let rows = self
                .by_arg
                .get(pos)
                .and_then(|m| m.get(value))
                .map_or(NO_ROWS, Vec::as_slice);
            if rows.len() < best.len() {
                best = rows;
            }
            if best.is_empty() {
                break;
            }
        }
        best
    }
}

/// Unifies a substituted pattern with fact arguments, extending `base`.
fn unify(pattern: &[Term], args: &[Value], base: &Binding) -> Option<Binding> {
    if pattern.len() != args.len() {
        return None;
    }
    let mut out = base.clone();
    for (term, value) in pattern.iter().zip(args) {
        match term {
            Term::Wildcard => {}
            Term::Const(expected) => {
                if expected != value {
                    return None;
                }
            }
            Term::Var(name) => match out.get(name) {
                Some(bound) if bound != value => return None,
                Some(_) => {}
                None => {
                    out.insert(name.clone(), value.clone());
                }
            },
        }
    }
    Some(out)
}

/// Lazy stream of bindings for one pattern query.
///
/// Produced by [`FactStore::query`] and [`FactStore::query_bound`]. Each
/// item is the base binding extended with the variables of one matching fact.
#[derive(Debug)]
pub struct Matches<'a> {
    facts: &'a [Fact],
    rows: std::slice::Iter<'a, usize>,
    pattern: Pattern,
    base: Binding,
}

impl Iterator for Matches<'_> {
    type Item = Binding;

    fn next(&mut self) -> Option<Self::Item> {
        for &row in self.rows.by_ref() {
            let fact = &self.facts[row];
            if let Some(binding) = unify(&self.pattern.args, &fact.args, &self.base) {
                return Some(binding);
            }
        }
        None
    }
}

/// Append-only, indexed, run-scoped fact store.
#[derive(Debug, Default)]
pub struct FactStore {
    facts: Vec<Fact>,
    predicates: HashMap<String, PredicateIndex>,
}

impl FactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fact. Returns `false` if an identical fact was already present.
    pub fn assert(&mut self, fact: Fact) -> bool {
        if self.contains(&fact) {
            return false;
        }
        let row = self.facts.len();
        self.predicates
            .entry(fact.predicate.clone())
            .or_default()
            .insert(row, &fact);
        self.facts.push(fact);
        true
    }

    /// Adds every fact, returning how many were new.
    pub fn assert_all<I>(&mut self, facts: I) -> usize
    where
        I: IntoIterator<Item = Fact>,
    {
        facts
            .into_iter()
            .map(|fact| usize::from(self.assert(fact)))
            .sum()
    }

    /// Returns true if an identical fact is stored.
    #[must_use]
    pub fn contains(&self, fact: &Fact) -> bool {
        let Some(index) = self.predicates.get(&fact.predicate) else {
            return false;
        };
        let ground: Vec<Term> = fact.args.iter().cloned().map(Term::Const).collect();
        index
            .candidates(&ground)
            .iter()
            .any(|&row| self.facts[row] == *fact)
    }

    /// Streams a binding for every fact matching `pattern`.
    #[must_use]
    pub fn query(&self, pattern: &Pattern) -> Matches<'_> {
        self.query_bound(pattern, &Binding::new())
    }

    /// Substitutes the variables bound in `binding` into `pattern`, then
    /// streams `binding` extended by every matching fact.
    #[must_use]
    pub fn query_bound(&self, pattern: &Pattern, binding: &Binding) -> Matches<'_> {
        let pattern = pattern.substitute(binding);
        let rows = self
            .predicates
            .get(&pattern.predicate)
            .map_or(NO_ROWS, |index| index.candidates(&pattern.args));
        Matches {
            facts: &self.facts,
            rows: rows.iter(),
            pattern,
            base: binding.clone(),
        }
    }

    /// Closed-world check: true iff `pattern` matches at least one fact.
    #[must_use]
    pub fn holds(&self, pattern: &Pattern) -> bool {
        self.query(pattern).next().is_some()
    }

    /// [`FactStore::holds`] after substituting `binding` into `pattern`.
    #[must_use]
    pub fn holds_bound(&self, pattern: &Pattern, binding: &Binding) -> bool {
        self.query_bound(pattern, binding).next().is_some()
    }

    /// Arities observed for `predicate`, or `None` if it has no facts.
    #[must_use]
    pub fn arities(&self, predicate: &str) -> Option<&BTreeSet<usize>> {
        self.predicates.get(predicate).map(|index| &index.arities)
    }

    /// Number of facts stored under `predicate`.
    #[must_use]
    pub fn predicate_count(&self, predicate: &str) -> usize {
        self.predicates
            .get(predicate)
            .map_or(0, |index| index.rows.len())
    }

    /// Iterates all facts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter()
    }

    /// Total number of facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if the store holds no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

impl Extend<Fact> for FactStore {
    fn extend<T: IntoIterator<Item = Fact>>(&mut self, iter: T) {
        self.assert_all(iter);
    }
}

impl FromIterator<Fact> for FactStore {
    fn from_iter<T: IntoIterator<Item = Fact>>(iter: T) -> Self {
        let mut store = Self::new();
        store.assert_all(iter);
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hospital() -> FactStore {
        [
            Fact::new("has_role", ["doc_1", "doctor"]),
            Fact::new("has_role", ["doc_2", "doctor"]),
            Fact::new("has_role", ["bclerk_1", "billing_clerk"]),
            Fact::new("is_doctor_of", ["doc_1", "pat_1"]),
            Fact::new("owns_phi_record", ["pat_1", "phi_rec_1"]),
            Fact::new("owns_phi_record", ["pat_2", "phi_rec_2"]),
        ]
        .into_iter()
        .collect()
    }

    fn pat(predicate: &str, args: Vec<Term>) -> Pattern {
        Pattern::new(predicate, args)
    }

    #[test]
    fn test_assert_is_idempotent() {
        let mut store = FactStore::new();
        assert!(store.assert(Fact::new("request_fulfilled", ["req_1"])));
        assert!(!store.assert(Fact::new("request_fulfilled", ["req_1"])));
        assert_eq!(store.len(), 1);
        assert_eq!(store.predicate_count("request_fulfilled"), 1);
    }

    #[test]
    fn test_query_binds_free_variables_in_insertion_order() {
        let store = hospital();
        let doctors: Vec<Value> = store
            .query(&pat("has_role", vec![Term::var("P"), Term::constant("doctor")]))
            .map(|b| b["P"].clone())
            .collect();
        assert_eq!(doctors, vec![Value::atom("doc_1"), Value::atom("doc_2")]);
    }

    #[test]
    fn test_query_with_no_matching_constant_is_empty() {
        let store = hospital();
        let q = pat("has_role", vec![Term::var("P"), Term::constant("nurse")]);
        assert_eq!(store.query(&q).count(), 0);
        assert!(!store.holds(&q));
    }

    #[test]
    fn test_unknown_predicate_is_empty() {
        let store = hospital();
        assert!(!store.holds(&pat("breach_discovered", vec![Term::Wildcard; 3])));
        assert!(store.arities("breach_discovered").is_none());
    }

    #[test]
    fn test_repeated_variable_must_unify() {
        let mut store = FactStore::new();
        store.assert(Fact::new("same", ["a", "a"]));
        store.assert(Fact::new("same", ["a", "b"]));
        let q = pat("same", vec![Term::var("X"), Term::var("X")]);
        let hits: Vec<Binding> = store.query(&q).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["X"], Value::atom("a"));
    }

    #[test]
    fn test_wildcard_binds_nothing() {
        let store = hospital();
        let q = pat("owns_phi_record", vec![Term::Wildcard, Term::var("R")]);
        let hits: Vec<Binding> = store.query(&q).collect();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|b| b.len() == 1 && b.contains_key("R")));
    }

    #[test]
    fn test_arity_must_match() {
        let store = hospital();
        let q = pat("has_role", vec![Term::var("P")]);
        assert_eq!(store.query(&q).count(), 0);
        let arities: Vec<usize> = store.arities("has_role").unwrap().iter().copied().collect();
        assert_eq!(arities, vec![2]);
    }

    #[test]
    fn test_query_bound_substitutes_and_extends() {
        let store = hospital();
        let mut base = Binding::new();
        base.insert("R".to_string(), Value::atom("phi_rec_2"));
        let q = pat("owns_phi_record", vec![Term::var("P"), Term::var("R")]);
        let hits: Vec<Binding> = store.query_bound(&q, &base).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["P"], Value::atom("pat_2"));
        assert_eq!(hits[0]["R"], Value::atom("phi_rec_2"));
    }

    #[test]
    fn test_holds_bound_for_anti_join() {
        let store = hospital();
        let q = pat("is_doctor_of", vec![Term::var("D"), Term::var("P")]);
        let mut b = Binding::new();
        b.insert("D".to_string(), Value::atom("doc_1"));
        b.insert("P".to_string(), Value::atom("pat_1"));
        assert!(store.holds_bound(&q, &b));
        b.insert("P".to_string(), Value::atom("pat_2"));
        assert!(!store.holds_bound(&q, &b));
    }

    #[test]
    fn test_contains_uses_exact_tuple() {
        let store = hospital();
        assert!(store.contains(&Fact::new("is_doctor_of", ["doc_1", "pat_1"])));
        assert!(!store.contains(&Fact::new("is_doctor_of", ["doc_1", "pat_2"])));
    }

    #[test]
    fn test_pattern_display_and_unbound_variables() {
        let q = pat(
            "read_phi",
            vec![Term::var("D"), Term::var("R"), Term::Wildcard, Term::constant("e1")],
        );
        assert_eq!(q.to_string(), "read_phi(D, R, _, 'e1')");
        let mut b = Binding::new();
        b.insert("D".to_string(), Value::atom("doc_1"));
        assert_eq!(q.unbound_variables(&b), vec!["R"]);
    }

    #[test]
    fn test_store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FactStore>();
    }
}
