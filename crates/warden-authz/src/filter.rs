//! Rule filters for partial loads and filtered mutations.
//!
//! An empty inclusion list means "no constraint" for that column; a non-empty
//! list matches any of its values.
use crate::rule::{FieldMatch, MAX_FIELDS, field_window};
use crate::{AuthzError, AuthzResult, PolicyRule};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ptype: Vec<String>,
    pub fields: [Vec<String>; MAX_FIELDS],
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptype(mut self, ptype: impl Into<String>) -> Self {
        self.ptype.push(ptype.into());
        self
    }

    /// Constrain column `index` to the given values.
    ///
    /// # Errors
    /// [`AuthzError::InvalidFieldWindow`] when `index` is not a valid column
    /// (`0..6`).
    pub fn field<I, S>(mut self, index: usize, values: I) -> AuthzResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(column) = self.fields.get_mut(index) else {
            return Err(AuthzError::InvalidFieldWindow {
                field_index: index,
                len: 1,
            });
        };
        column.extend(values.into_iter().map(Into::into));
        Ok(self)
    }

    /// Build the filter implied by a `(field_index, values)` window.
    ///
    /// Wildcard entries leave their column unconstrained.
    pub fn from_window(ptype: &str, field_index: usize, values: &[FieldMatch]) -> AuthzResult<Self> {
        let window = field_window(field_index, values.len())?;
        let mut filter = Filter::new().ptype(ptype);
        for (column, value) in window.zip(values) {
            if let Some(exact) = value.as_exact() {
                filter.fields[column].push(exact.to_string());
            }
        }
        Ok(filter)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.ptype.is_empty() && self.fields.iter().all(Vec::is_empty)
    }

    pub fn matches(&self, rule: &PolicyRule) -> bool {
        if !self.ptype.is_empty() && !self.ptype.contains(&rule.ptype) {
            return false;
        }
        self.fields.iter().enumerate().all(|(index, allowed)| {
            allowed.is_empty()
                || rule
                    .field(index)
                    .is_some_and(|value| allowed.iter().any(|candidate| candidate == value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::field_matches;

    fn rule(ptype: &str, values: &[&str]) -> PolicyRule {
        PolicyRule::new(ptype, values.iter().copied()).unwrap()
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::new();
        assert!(filter.is_unconstrained());
        assert!(filter.matches(&rule("p", &["a", "b", "c"])));
        assert!(filter.matches(&rule("g", &["a", "b"])));
    }

    #[test]
    fn inclusion_lists_are_ored_per_column() {
        let filter = Filter::new()
            .ptype("p")
            .field(0, ["role::1", "role::2"])
            .unwrap();
        assert!(filter.matches(&rule("p", &["role::2", "/menu", "GET"])));
        assert!(!filter.matches(&rule("p", &["role::3", "/menu", "GET"])));
        assert!(!filter.matches(&rule("g", &["role::1", "role::2"])));
    }

    #[test]
    fn constrained_column_requires_present_field() {
        let filter = Filter::new().field(3, ["x"]).unwrap();
        assert!(!filter.matches(&rule("p", &["a", "b", "c"])));
    }

    #[test]
    fn out_of_range_column_is_an_error() {
        let err = Filter::new().field(MAX_FIELDS, ["x"]).unwrap_err();
        assert_eq!(
            err,
            AuthzError::InvalidFieldWindow {
                field_index: 6,
                len: 1
            }
        );
    }

    #[test]
    fn window_skips_wildcards() {
        let filter = Filter::from_window("p", 1, &field_matches(&["", "GET"])).unwrap();
        assert_eq!(filter.ptype, vec!["p".to_string()]);
        assert!(filter.fields[1].is_empty());
        assert_eq!(filter.fields[2], vec!["GET".to_string()]);
    }

    #[test]
    fn window_rejects_out_of_range() {
        assert!(Filter::from_window("p", 5, &field_matches(&["a", "b"])).is_err());
    }
}
