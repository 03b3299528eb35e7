//! Values stored in facts and terms used in rule patterns.
//!
//! Fact arguments are ground [`Value`]s. Rule patterns are built from
//! [`Term`]s, which are either variables, constants or the anonymous
//! wildcard.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A ground value held by a fact argument.
///
/// Values are totally ordered and hashable so they can key the fact store's
/// argument indexes and the violation set.
///
/// # Examples
///
/// ```
/// use ace_audit::Value;
///
/// let role = Value::atom("doctor");
/// assert!(role.is_atom());
/// assert_eq!(role.as_atom(), Some("doctor"));
/// assert_eq!(Value::from(7).as_int(), Some(7));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Symbolic constant: identifiers, role names, dates in `YYYY-MM-DD` form.
    Atom(String),
    /// Integer constant.
    Int(i64),
    /// Ordered list of values (e.g. the patients affected by a breach).
    List(Vec<Value>),
}

impl Value {
    /// Creates an atom.
    #[must_use]
    pub fn atom(s: impl Into<String>) -> Self {
        Self::Atom(s.into())
    }

    /// Creates a list of atoms.
    #[must_use]
    pub fn atoms<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::Atom(s.into())).collect())
    }

    /// Returns true if this is an atom.
    #[must_use]
    pub const fn is_atom(&self) -> bool {
        matches!(self, Self::Atom(_))
    }

    /// Returns true if this is an integer.
    #[must_use]
    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// Returns true if this is a list.
    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Returns the atom text, if this is an atom.
    #[must_use]
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Self::Atom(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the integer, if this is an integer.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Atom(_) => "atom",
            Self::Int(_) => "int",
            Self::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Atom(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Atom(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

/// A term in a rule pattern.
///
/// Serialized as `{"var": "D"}`, `{"const": "doctor"}` or `"_"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// Named logic variable. Bound by the first positive literal that mentions it.
    Var(String),
    /// Constant that a matching fact argument must equal.
    Const(Value),
    /// Anonymous position: matches anything and binds nothing.
    #[serde(rename = "_")]
    Wildcard,
}

impl Term {
    /// Creates a variable term.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// Creates a constant term.
    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Const(value.into())
    }

    /// Returns the variable name, if this term is a variable.
    #[must_use]
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Var(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => write!(f, "{name}"),
            Self::Const(Value::Atom(a)) => write!(f, "'{a}'"),
            Self::Const(v) => write!(f, "{v}"),
            Self::Wildcard => write!(f, "_"),
        }
    }
}
