//! Violation aggregation.
//!
//! Raw violations from every rule are deduplicated by
//! `(rule, principal, object)`. Grouping by originating event exposes rule
//! overlaps, which are reported and never resolved. Event ids are only
//! unique within one kind of record, so a group is keyed by the predicate
//! the id came from as well as the id itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::RuleId;
use crate::evaluator::RawViolation;
use crate::value::Value;

/// Identity of a violation: which rule fired, against whom, on what.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViolationInstance {
    /// Rule that fired.
    pub rule: RuleId,
    /// Accountable principal.
    pub principal: Value,
    /// Violating object (record, request, breach).
    pub object: Value,
}

impl ViolationInstance {
    /// Creates an instance.
    #[must_use]
    pub fn new(rule: impl Into<RuleId>, principal: impl Into<Value>, object: impl Into<Value>) -> Self {
        Self {
            rule: rule.into(),
            principal: principal.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for ViolationInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.rule, self.principal, self.object)
    }
}

/// Merged provenance of one violation instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    /// Group keys (event ids, or the object) of every derivation.
    pub events: BTreeSet<GroupKey>,
    /// Largest number of days past the deadline, for deadline rules.
    pub overdue_days: Option<i64>,
}

impl ViolationRecord {
    fn merge(&mut self, event: GroupKey, overdue_days: Option<i64>) {
        self.events.insert(event);
        self.overdue_days = match (self.overdue_days, overdue_days) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Unit of the single-rule-per-event check: an id qualified by the
/// predicate that introduced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    /// Predicate the id was bound from, e.g. `read_phi`.
    pub source: String,
    /// Event id, or the object when the rule projects no event.
    pub id: Value,
}

impl GroupKey {
    /// Creates a group key.
    #[must_use]
    pub fn new(source: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// More than one distinct rule fired for the same originating event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOverlap {
    /// Event id (or object) shared by the violations.
    pub group: GroupKey,
    /// Distinct rules that fired for it.
    pub rules: BTreeSet<RuleId>,
}

impl fmt::Display for RuleOverlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<&str> = self.rules.iter().map(RuleId::as_str).collect();
        write!(f, "{} rules fired for '{}': {}", rules.len(), self.group, rules.join(", "))
    }
}

/// Flat serialized form of one violation: instance fields plus provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEntry {
    /// Identity.
    #[serde(flatten)]
    pub instance: ViolationInstance,
    /// Provenance.
    #[serde(flatten)]
    pub record: ViolationRecord,
}

/// Deduplicated violations, ordered by instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ViolationEntry>", into = "Vec<ViolationEntry>")]
pub struct ViolationSet {
    entries: BTreeMap<ViolationInstance, ViolationRecord>,
}

impl From<Vec<ViolationEntry>> for ViolationSet {
    fn from(entries: Vec<ViolationEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.instance, e.record)).collect(),
        }
    }
}

impl From<ViolationSet> for Vec<ViolationEntry> {
    fn from(set: ViolationSet) -> Self {
        set.entries
            .into_iter()
            .map(|(instance, record)| ViolationEntry { instance, record })
            .collect()
    }
}

impl ViolationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deduplicates raw violations, merging their provenance.
    #[must_use]
    pub fn from_raw<I>(raw: I) -> Self
    where
        I: IntoIterator<Item = RawViolation>,
    {
        let mut set = Self::new();
        for violation in raw {
            set.insert(violation);
        }
        set
    }

    /// Adds one raw violation. Returns true if its instance was new.
    pub fn insert(&mut self, violation: RawViolation) -> bool {
        let RawViolation {
            instance,
            event,
            overdue_days,
        } = violation;
        let is_new = !self.entries.contains_key(&instance);
        self.entries
            .entry(instance)
            .or_default()
            .merge(event, overdue_days);
        is_new
    }

    /// Removes an instance, returning its record.
    pub fn remove(&mut self, instance: &ViolationInstance) -> Option<ViolationRecord> {
        self.entries.remove(instance)
    }

    /// Looks up an instance.
    #[must_use]
    pub fn get(&self, instance: &ViolationInstance) -> Option<&ViolationRecord> {
        self.entries.get(instance)
    }

    /// Returns true if the instance is present.
    #[must_use]
    pub fn contains(&self, instance: &ViolationInstance) -> bool {
        self.entries.contains_key(instance)
    }

    /// Number of distinct instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no violations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates instances in order.
    pub fn iter(&self) -> impl Iterator<Item = (&ViolationInstance, &ViolationRecord)> {
        self.entries.iter()
    }

    /// Distinct rules with at least one violation.
    #[must_use]
    pub fn rule_ids(&self) -> BTreeSet<&RuleId> {
        self.entries.keys().map(|i| &i.rule).collect()
    }

    /// Instance count per rule.
    #[must_use]
    pub fn count_by_rule(&self) -> BTreeMap<RuleId, usize> {
        let mut counts = BTreeMap::new();
        for instance in self.entries.keys() {
            *counts.entry(instance.rule.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Distinct violating principals.
    #[must_use]
    pub fn principals(&self) -> BTreeSet<&Value> {
        self.entries.keys().map(|i| &i.principal).collect()
    }

    /// The subset of violations attributed to `principal`.
    #[must_use]
    pub fn for_principal(&self, principal: &Value) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(i, _)| &i.principal == principal)
                .map(|(i, r)| (i.clone(), r.clone()))
                .collect(),
        }
    }

    /// Sum of overdue days over all deadline violations.
    #[must_use]
    pub fn total_overdue_days(&self) -> i64 {
        self.entries.values().filter_map(|r| r.overdue_days).sum()
    }

    /// Distinct rules per originating event.
    #[must_use]
    pub fn groups(&self) -> BTreeMap<GroupKey, BTreeSet<RuleId>> {
        let mut groups: BTreeMap<GroupKey, BTreeSet<RuleId>> = BTreeMap::new();
        for (instance, record) in &self.entries {
            for event in &record.events {
                groups
                    .entry(event.clone())
                    .or_default()
                    .insert(instance.rule.clone());
            }
        }
        groups
    }

    /// Histogram: distinct rule count per group -> number of groups.
    #[must_use]
    pub fn distinct_rule_distribution(&self) -> BTreeMap<usize, usize> {
        let mut histogram = BTreeMap::new();
        for rules in self.groups().values() {
            *histogram.entry(rules.len()).or_insert(0) += 1;
        }
        histogram
    }

    /// Every group where more than one distinct rule fired.
    #[must_use]
    pub fn overlaps(&self) -> Vec<RuleOverlap> {
        self.groups()
            .into_iter()
            .filter(|(_, rules)| rules.len() > 1)
            .map(|(group, rules)| RuleOverlap { group, rules })
            .collect()
    }
}

impl<'a> IntoIterator for &'a ViolationSet {
    type Item = (&'a ViolationInstance, &'a ViolationRecord);
    type IntoIter = std::collections::btree_map::Iter<'a, ViolationInstance, ViolationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<RawViolation> for ViolationSet {
    fn from_iter<T: IntoIterator<Item = RawViolation>>(iter: T) -> Self {
        Self::from_raw(iter)
    }
}
