//! Policy rule primitives.
//!
//! # Purpose
//! Defines the positional rule tuple shared by the store, the casbin model
//! and the sync protocol, plus the wildcard sentinel used by filtered
//! operations.
//!
//! # Key invariants
//! - A rule carries between one and [`MAX_FIELDS`] values.
//! - Absent trailing fields are not represented in `values`, but every
//!   matcher compares them as the empty string. A column cleared by a rewrite
//!   reads back as `""` when later columns are set.
//! - The section (`p` or `g`) is derived from the first character of the ptype.
use crate::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

/// Number of positional value columns (`v0..v5`).
pub const MAX_FIELDS: usize = 6;

/// Policy section a ptype belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    #[serde(rename = "p")]
    Policy,
    #[serde(rename = "g")]
    Grouping,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Policy => "p",
            Section::Grouping => "g",
        }
    }

    /// Resolve the section of a ptype such as `p`, `p2`, `g` or `g2`.
    pub fn of_ptype(ptype: &str) -> AuthzResult<Self> {
        match ptype.as_bytes().first() {
            Some(b'p') => Ok(Section::Policy),
            Some(b'g') => Ok(Section::Grouping),
            _ => Err(AuthzError::UnknownSection(ptype.to_string())),
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Section {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "p" => Ok(Section::Policy),
            "g" => Ok(Section::Grouping),
            _ => Err(AuthzError::UnknownSection(value.to_string())),
        }
    }
}

/// One persisted policy row: a ptype plus its leading positional values.
///
/// # Example
/// ```rust
/// use warden_authz::PolicyRule;
///
/// let rule = PolicyRule::new("p", ["role::1", "/menu", "GET"]).expect("rule");
/// assert_eq!(rule.field(1), Some("/menu"));
/// assert_eq!(rule.field(3), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub ptype: String,
    pub values: Vec<String>,
}

impl PolicyRule {
    /// Build a rule, validating the field count.
    ///
    /// # Errors
    /// - [`AuthzError::EmptyRule`] when no values are given.
    /// - [`AuthzError::TooManyFields`] when more than [`MAX_FIELDS`] are given.
    pub fn new<I, S>(ptype: impl Into<String>, values: I) -> AuthzResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        validate_fields(&values)?;
        Ok(Self {
            ptype: ptype.into(),
            values,
        })
    }

    pub fn section(&self) -> AuthzResult<Section> {
        Section::of_ptype(&self.ptype)
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.ptype)?;
        for value in &self.values {
            write!(f, ", {value}")?;
        }
        Ok(())
    }
}

/// Check that a positional value list fits the `v0..v5` columns.
pub fn validate_fields(values: &[String]) -> AuthzResult<()> {
    if values.is_empty() {
        return Err(AuthzError::EmptyRule);
    }
    if values.len() > MAX_FIELDS {
        return Err(AuthzError::TooManyFields(values.len()));
    }
    Ok(())
}

/// Per-field constraint used by filtered removal and update.
///
/// `Any` is the wildcard sentinel. Converting from `&str` treats `""` as a
/// wildcard; use [`FieldMatch::exact`] to match a literal empty value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldMatch {
    Any,
    Exact(String),
}

impl FieldMatch {
    pub fn exact(value: impl Into<String>) -> Self {
        FieldMatch::Exact(value.into())
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            FieldMatch::Any => true,
            FieldMatch::Exact(expected) => value.unwrap_or("") == expected,
        }
    }

    pub fn as_exact(&self) -> Option<&str> {
        match self {
            FieldMatch::Any => None,
            FieldMatch::Exact(value) => Some(value),
        }
    }
}

impl From<&str> for FieldMatch {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            FieldMatch::Any
        } else {
            FieldMatch::Exact(value.to_string())
        }
    }
}

impl From<String> for FieldMatch {
    fn from(value: String) -> Self {
        if value.is_empty() {
            FieldMatch::Any
        } else {
            FieldMatch::Exact(value)
        }
    }
}

impl From<Option<String>> for FieldMatch {
    fn from(value: Option<String>) -> Self {
        value.map(FieldMatch::from).unwrap_or(FieldMatch::Any)
    }
}

/// Convenience for call sites holding plain strings.
pub fn field_matches<S: AsRef<str>>(values: &[S]) -> Vec<FieldMatch> {
    values
        .iter()
        .map(|value| FieldMatch::from(value.as_ref()))
        .collect()
}

/// Validate a filtered window and return the covered column range.
///
/// The window starts at `field_index` and spans `len` columns; it must stay
/// inside `v0..v5` and cover at least one column.
pub fn field_window(field_index: usize, len: usize) -> AuthzResult<std::ops::Range<usize>> {
    let end = field_index + len;
    if len == 0 || field_index >= MAX_FIELDS || end > MAX_FIELDS {
        return Err(AuthzError::InvalidFieldWindow { field_index, len });
    }
    Ok(field_index..end)
}
