//! Row predicates shared by the store backends.
//!
//! Three shapes of match are used when deleting or rewriting rows:
//! - leading: the first `n` fields equal a given prefix
//! - window: fields `field_index..` equal a list where empty entries are
//!   wildcards
//! - column-wise: every column falls in the set of values a rule list has
//!   in that column
//!
//! Absent trailing fields compare as the empty string everywhere.
use crate::rule::FieldMatch;

/// True when the first `prefix.len()` fields of `values` equal `prefix`.
pub fn matches_leading<S: AsRef<str>>(values: &[String], prefix: &[S]) -> bool {
    prefix.iter().enumerate().all(|(index, expected)| {
        expected.as_ref() == values.get(index).map_or("", String::as_str)
    })
}

/// True when every non-wildcard entry of `window` equals the field at
/// `field_index + i`.
pub fn matches_window(values: &[String], field_index: usize, window: &[FieldMatch]) -> bool {
    window.iter().enumerate().all(|(offset, expected)| {
        expected.matches(values.get(field_index + offset).map(String::as_str))
    })
}

/// Column-wise matcher built by transposing a rule list.
///
/// A row matches when, for every column shared by all rules, its value equals
/// any value seen in that column. Distinct rules that share column values in
/// different positions therefore also match rows that were never listed.
#[derive(Debug, Clone)]
pub struct ColumnMatcher {
    columns: Vec<Vec<String>>,
}

impl ColumnMatcher {
    pub fn new(rules: &[Vec<String>]) -> Self {
        let width = rules.iter().map(Vec::len).min().unwrap_or(0);
        let columns = (0..width)
            .map(|column| rules.iter().map(|rule| rule[column].clone()).collect())
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[Vec<String>] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn matches(&self, values: &[String]) -> bool {
        self.columns.iter().enumerate().all(|(column, allowed)| {
            values
                .get(column)
                .is_some_and(|value| allowed.contains(value))
        })
    }
}
