//! In-memory implementation of the policy store.
//!
//! # Purpose
//! Keeps policy rows in a `BTreeMap` keyed by a process-assigned row id and
//! guarded by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - replicas sharing one process (the demo and the integration tests)
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - Each call holds the write lock for its whole duration. Multi-step calls
//!   work on a copy of the rows and swap it in only on success, which gives
//!   them the same all-or-nothing behavior as a database transaction.
//! - Row ids increase monotonically, so loads return rows in insertion order.
use super::{PolicyStore, StoreError, StoreResult, rewrite_width};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use warden_authz::{
    ColumnMatcher, FieldMatch, Filter, PolicyRule, field_window, matches_leading, matches_window,
    validate_fields,
};

#[derive(Debug, Clone, Default)]
struct Rows {
    next_id: i64,
    rows: BTreeMap<i64, PolicyRule>,
}

impl Rows {
    fn contains(&self, ptype: &str, values: &[String]) -> bool {
        self.rows
            .values()
            .any(|rule| rule.ptype == ptype && rule.values == values)
    }

    fn insert(&mut self, ptype: &str, values: &[String]) -> StoreResult<()> {
        validate_fields(values)?;
        if self.contains(ptype, values) {
            return Err(StoreError::Conflict(format!(
                "rule exists: {}",
                PolicyRule {
                    ptype: ptype.to_string(),
                    values: values.to_vec(),
                }
            )));
        }
        self.next_id += 1;
        self.rows.insert(
            self.next_id,
            PolicyRule {
                ptype: ptype.to_string(),
                values: values.to_vec(),
            },
        );
        Ok(())
    }

    fn delete_where(&mut self, mut predicate: impl FnMut(&PolicyRule) -> bool) -> u64 {
        let before = self.rows.len();
        self.rows.retain(|_, rule| !predicate(rule));
        (before - self.rows.len()) as u64
    }

    fn update(&mut self, ptype: &str, old: &[String], new: &[String]) -> StoreResult<()> {
        validate_fields(new)?;
        let ids: Vec<i64> = self
            .rows
            .iter()
            .filter(|(_, rule)| rule.ptype == ptype && matches_leading(&rule.values, old))
            .map(|(id, _)| *id)
            .collect();
        let id = match ids.as_slice() {
            [] => {
                return Err(StoreError::NotFound(format!(
                    "no {ptype} rule with fields {old:?}"
                )));
            }
            [id] => *id,
            _ => {
                return Err(StoreError::Conflict(format!(
                    "{} {ptype} rules match fields {old:?}",
                    ids.len()
                )));
            }
        };
        let values = rewrite_fields(&self.rows[&id].values, old, new);
        let duplicate = self
            .rows
            .iter()
            .any(|(other, rule)| *other != id && rule.ptype == ptype && rule.values == values);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "rule exists: {ptype} {values:?}"
            )));
        }
        if let Some(rule) = self.rows.get_mut(&id) {
            rule.values = values;
        }
        Ok(())
    }
}

/// Columns `0..max(old, new)` take the new value or are cleared; columns
/// past that keep their value. Cleared columns followed by kept ones read
/// back as empty strings, trailing ones are dropped. This mirrors how the
/// Postgres backend writes `NULL` and loads it back.
fn rewrite_fields(current: &[String], old: &[String], new: &[String]) -> Vec<String> {
    let width = rewrite_width(old, new);
    let mut slots: Vec<Option<String>> = current.iter().cloned().map(Some).collect();
    if slots.len() < width {
        slots.resize(width, None);
    }
    for (index, slot) in slots.iter_mut().enumerate().take(width) {
        *slot = new.get(index).cloned();
    }
    while slots.last().is_some_and(Option::is_none) {
        slots.pop();
    }
    slots.into_iter().map(Option::unwrap_or_default).collect()
}

/// Non-durable policy store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<Rows>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with rules; duplicates are a conflict.
    pub async fn with_rules(rules: &[PolicyRule]) -> StoreResult<Self> {
        let store = Self::new();
        store.save_all(rules).await?;
        Ok(store)
    }

    pub async fn row_count(&self) -> usize {
        self.state.read().await.rows.len()
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn load_all(&self) -> StoreResult<Vec<PolicyRule>> {
        let state = self.state.read().await;
        Ok(state.rows.values().cloned().collect())
    }

    async fn load_filtered(&self, filter: &Filter) -> StoreResult<Vec<PolicyRule>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .values()
            .filter(|rule| filter.matches(rule))
            .cloned()
            .collect())
    }

    async fn save_all(&self, rules: &[PolicyRule]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let mut next = Rows {
            next_id: state.next_id,
            rows: BTreeMap::new(),
        };
        for rule in rules {
            next.insert(&rule.ptype, &rule.values)?;
        }
        *state = next;
        Ok(())
    }

    async fn add_rule(&self, ptype: &str, values: &[String]) -> StoreResult<()> {
        self.state.write().await.insert(ptype, values)
    }

    async fn add_rules(&self, ptype: &str, rules: &[Vec<String>]) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        for rule in rules {
            next.insert(ptype, rule)?;
        }
        *state = next;
        Ok(())
    }

    async fn remove_rule(&self, ptype: &str, values: &[String]) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let removed =
            state.delete_where(|rule| rule.ptype == ptype && matches_leading(&rule.values, values));
        Ok(removed > 0)
    }

    async fn remove_rules(&self, ptype: &str, rules: &[Vec<String>]) -> StoreResult<u64> {
        if rules.is_empty() {
            return Ok(0);
        }
        let matcher = ColumnMatcher::new(rules);
        let mut state = self.state.write().await;
        Ok(state.delete_where(|rule| rule.ptype == ptype && matcher.matches(&rule.values)))
    }

    async fn remove_filtered(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[FieldMatch],
    ) -> StoreResult<bool> {
        if field_window(field_index, values.len()).is_err() {
            return Ok(false);
        }
        let mut state = self.state.write().await;
        let removed = state.delete_where(|rule| {
            rule.ptype == ptype && matches_window(&rule.values, field_index, values)
        });
        Ok(removed > 0)
    }

    async fn update_rule(&self, ptype: &str, old: &[String], new: &[String]) -> StoreResult<()> {
        self.state.write().await.update(ptype, old, new)
    }

    async fn update_rules(
        &self,
        ptype: &str,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> StoreResult<()> {
        if old.len() != new.len() {
            return Err(StoreError::LengthMismatch {
                old: old.len(),
                new: new.len(),
            });
        }
        let mut state = self.state.write().await;
        let mut next = state.clone();
        for (old_rule, new_rule) in old.iter().zip(new) {
            next.update(ptype, old_rule, new_rule)?;
        }
        *state = next;
        Ok(())
    }

    async fn update_filtered(
        &self,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        values: &[FieldMatch],
    ) -> StoreResult<Vec<Vec<String>>> {
        let filter = Filter::from_window(ptype, field_index, values)
            .map_err(|err| StoreError::InvalidFilter(err.to_string()))?;
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let old_rules: Vec<Vec<String>> = next
            .rows
            .values()
            .filter(|rule| filter.matches(rule))
            .map(|rule| rule.values.clone())
            .collect();
        if !old_rules.is_empty() {
            let matcher = ColumnMatcher::new(&old_rules);
            next.delete_where(|rule| rule.ptype == ptype && matcher.matches(&rule.values));
        }
        for rule in new_rules {
            next.insert(ptype, rule)?;
        }
        *state = next;
        Ok(old_rules)
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_authz::field_matches;

    fn v(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r", "/a", "GET"])).await.unwrap();
        let err = store.add_rule("p", &v(&["r", "/a", "GET"])).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.row_count().await, 1);
    }

    #[tokio::test]
    async fn add_rules_rolls_back_on_conflict() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r", "/a", "GET"])).await.unwrap();
        let err = store
            .add_rules("p", &[v(&["r", "/b", "GET"]), v(&["r", "/a", "GET"])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.row_count().await, 1);
    }

    #[tokio::test]
    async fn remove_rule_matches_leading_fields() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r", "/a", "GET"])).await.unwrap();
        store.add_rule("p", &v(&["r", "/a", "POST"])).await.unwrap();
        store.add_rule("p", &v(&["q", "/a", "GET"])).await.unwrap();
        assert!(store.remove_rule("p", &v(&["r", "/a"])).await.unwrap());
        let rules = store.load_all().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].values, v(&["q", "/a", "GET"]));
        assert!(!store.remove_rule("p", &v(&["r", "/a"])).await.unwrap());
    }

    #[tokio::test]
    async fn remove_rules_is_column_wise() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["a", "/x", "GET"])).await.unwrap();
        store.add_rule("p", &v(&["b", "/y", "POST"])).await.unwrap();
        store.add_rule("p", &v(&["a", "/y", "POST"])).await.unwrap();
        store.add_rule("p", &v(&["c", "/x", "GET"])).await.unwrap();
        let removed = store
            .remove_rules("p", &[v(&["a", "/x", "GET"]), v(&["b", "/y", "POST"])])
            .await
            .unwrap();
        // The unlisted `a, /y, POST` row goes too.
        assert_eq!(removed, 3);
        assert_eq!(store.row_count().await, 1);
        assert_eq!(store.remove_rules("p", &[]).await.unwrap(), 0);
        assert_eq!(store.row_count().await, 1);
    }

    #[tokio::test]
    async fn remove_filtered_fails_closed_on_bad_window() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r", "/a", "GET"])).await.unwrap();
        assert!(!store.remove_filtered("p", 5, &field_matches(&["a", "b"])).await.unwrap());
        assert!(!store.remove_filtered("p", 0, &[]).await.unwrap());
        assert_eq!(store.row_count().await, 1);
        assert!(store.remove_filtered("p", 1, &field_matches(&["", "GET"])).await.unwrap());
        assert_eq!(store.row_count().await, 0);
    }

    #[tokio::test]
    async fn update_rule_clears_positions_past_new_rule() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r", "/a", "GET", "x"])).await.unwrap();
        store
            .update_rule("p", &v(&["r", "/a", "GET", "x"]), &v(&["r", "/b"]))
            .await
            .unwrap();
        assert_eq!(store.load_all().await.unwrap()[0].values, v(&["r", "/b"]));
    }

    #[tokio::test]
    async fn update_rule_keeps_fields_past_the_rewrite() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r", "/a", "GET"])).await.unwrap();
        store.update_rule("p", &v(&["r"]), &v(&["s"])).await.unwrap();
        assert_eq!(store.load_all().await.unwrap()[0].values, v(&["s", "/a", "GET"]));
    }

    #[tokio::test]
    async fn update_rule_keeps_columns_past_a_short_match() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r", "/a", "GET", "x", "y"])).await.unwrap();
        store
            .update_rule("p", &v(&["r", "/a", "GET"]), &v(&["r", "/b"]))
            .await
            .unwrap();
        assert_eq!(
            store.load_all().await.unwrap()[0].values,
            v(&["r", "/b", "", "x", "y"])
        );
    }

    #[test]
    fn rewrite_fields_drops_only_trailing_cleared_columns() {
        assert_eq!(rewrite_fields(&v(&["a", "b", "c"]), &v(&["a", "b", "c"]), &v(&["z"])), v(&["z"]));
        assert_eq!(
            rewrite_fields(&v(&["a", "b"]), &v(&["a", "b"]), &v(&["z", ""])),
            v(&["z", ""])
        );
        assert_eq!(
            rewrite_fields(&v(&["a", "b", "c", "d"]), &v(&["a"]), &v(&["z", "y", "x"])),
            v(&["z", "y", "x", "d"])
        );
    }

    #[tokio::test]
    async fn update_rule_rejects_ambiguous_match() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r", "/a", "GET"])).await.unwrap();
        store.add_rule("p", &v(&["r", "/a", "POST"])).await.unwrap();
        let err = store
            .update_rule("p", &v(&["r", "/a"]), &v(&["r", "/b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_rules_is_atomic() {
        let store = InMemoryStore::new();
        store.add_rule("g", &v(&["u1", "r1"])).await.unwrap();
        let err = store
            .update_rules(
                "g",
                &[v(&["u1", "r1"]), v(&["u9", "r9"])],
                &[v(&["u1", "r2"]), v(&["u9", "r8"])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.load_all().await.unwrap()[0].values, v(&["u1", "r1"]));

        let err = store
            .update_rules("g", &[v(&["u1", "r1"])], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LengthMismatch { old: 1, new: 0 }));
    }

    #[tokio::test]
    async fn update_filtered_returns_replaced_rows() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["r::1", "/a", "GET"])).await.unwrap();
        store.add_rule("p", &v(&["r::2", "/a", "GET"])).await.unwrap();
        let old = store
            .update_filtered(
                "p",
                &[v(&["r::1", "/b", "GET"])],
                0,
                &field_matches(&["r::1"]),
            )
            .await
            .unwrap();
        assert_eq!(old, vec![v(&["r::1", "/a", "GET"])]);
        let rules: Vec<Vec<String>> = store
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|rule| rule.values)
            .collect();
        assert_eq!(rules, vec![v(&["r::2", "/a", "GET"]), v(&["r::1", "/b", "GET"])]);

        let err = store
            .update_filtered("p", &[], 6, &field_matches(&["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn load_filtered_keeps_insertion_order() {
        let store = InMemoryStore::new();
        store.add_rule("p", &v(&["b", "/a", "GET"])).await.unwrap();
        store.add_rule("g", &v(&["u", "b"])).await.unwrap();
        store.add_rule("p", &v(&["a", "/a", "GET"])).await.unwrap();
        let rules = store.load_filtered(&Filter::new().ptype("p")).await.unwrap();
        let subjects: Vec<&str> = rules.iter().filter_map(|rule| rule.field(0)).collect();
        assert_eq!(subjects, vec!["b", "a"]);
        assert!(!store.is_durable());
        assert_eq!(store.backend_name(), "memory");
    }
}
