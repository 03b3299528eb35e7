//! Rule catalog: the ordered, validated set of violation rules.
//!
//! Catalogs are plain JSON so policy can be edited without recompiling.
//! Construction always validates; a [`RuleCatalog`] value is therefore
//! known to be mode-safe and free of recursion.

mod rule;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use rule::{Attribution, Comparison, Constraint, Literal, Projection, Rule, RuleId, VIOLATION_PREDICATE};

use crate::error::ConfigurationError;

const STANDARD_RULES: &str = include_str!("standard_rules.json");

#[derive(Serialize)]
struct CatalogRef<'a> {
    rules: &'a [Rule],
}

#[derive(Deserialize)]
struct CatalogFile {
    rules: Vec<Rule>,
}

/// An immutable, validated, ordered list of rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCatalog {
    rules: Vec<Rule>,
    fingerprint: String,
}

impl RuleCatalog {
    /// Validates `rules` and builds a catalog. An empty catalog is valid.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found: a per-rule defect
    /// from [`Rule::validate`] or a duplicate rule identifier.
    pub fn new(rules: Vec<Rule>) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::with_capacity(rules.len());
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.id.clone()) {
                return Err(ConfigurationError::DuplicateRule {
                    rule: rule.id.clone(),
                });
            }
        }
        let canonical = serde_json::to_vec(&CatalogRef { rules: &rules }).map_err(|e| {
            ConfigurationError::Parse {
                what: "rule catalog",
                reason: e.to_string(),
            }
        })?;
        let fingerprint = blake3::hash(&canonical).to_hex().to_string();
        Ok(Self { rules, fingerprint })
    }

    /// The built-in hospital catalog (HIPAA and GDPR rules).
    ///
    /// # Errors
    ///
    /// Only if the embedded catalog fails to parse or validate.
    pub fn standard() -> Result<Self, ConfigurationError> {
        Self::from_json(STANDARD_RULES)
    }

    /// Parses and validates a catalog from `{"rules": [...]}` JSON.
    ///
    /// # Errors
    ///
    /// `Parse` for malformed JSON, otherwise as [`RuleCatalog::new`].
    pub fn from_json(s: &str) -> Result<Self, ConfigurationError> {
        let file: CatalogFile =
            serde_json::from_str(s).map_err(|e| ConfigurationError::Parse {
                what: "rule catalog",
                reason: e.to_string(),
            })?;
        Self::new(file.rules)
    }

    /// Reads a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, otherwise as [`RuleCatalog::from_json`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Serializes the catalog to pretty JSON, readable by [`RuleCatalog::from_json`].
    ///
    /// # Errors
    ///
    /// `Parse` if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ConfigurationError> {
        serde_json::to_string_pretty(&CatalogRef { rules: &self.rules }).map_err(|e| {
            ConfigurationError::Parse {
                what: "rule catalog",
                reason: e.to_string(),
            }
        })
    }

    /// blake3 hex digest of the canonical (compact) JSON form.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Rules in catalog order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Iterates rules in catalog order.
    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    /// Looks up a rule by id.
    #[must_use]
    pub fn get(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.iter().find(|r| &r.id == id)
    }

    /// Returns true if a rule with this id exists.
    #[must_use]
    pub fn contains(&self, id: &RuleId) -> bool {
        self.get(id).is_some()
    }

    /// Rule ids in catalog order.
    pub fn rule_ids(&self) -> impl Iterator<Item = &RuleId> {
        self.rules.iter().map(|r| &r.id)
    }

    /// Ids of rules carrying an elapsed-day constraint.
    pub fn deadline_rules(&self) -> impl Iterator<Item = &RuleId> {
        self.rules
            .iter()
            .filter(|r| r.is_deadline_rule())
            .map(|r| &r.id)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the catalog holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleCatalog {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
