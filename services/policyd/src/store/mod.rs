//! Durable policy rule storage.
//!
//! # Purpose
//! Defines the [`PolicyStore`] contract shared by the in-memory and Postgres
//! backends. Every call runs in its own transaction; there is no atomicity
//! across calls.
//!
//! # Matching rules
//! - `remove_rule` and `update_rule` match rows whose leading fields equal the
//!   given fields exactly (trailing fields of the row are not compared).
//! - `remove_rules` transposes the rule list into per-column value sets and
//!   deletes every row whose columns each fall in the corresponding set. This
//!   is coarser than exact tuple deletion and can remove rows that were never
//!   listed.
//! - `remove_filtered` and `update_filtered` use a `(field_index, values)`
//!   window where [`FieldMatch::Any`] is a wildcard.
use async_trait::async_trait;
use thiserror::Error;
use warden_authz::{AuthzError, FieldMatch, Filter, PolicyRule};

pub mod adapter;
pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("rule lists differ in length: {old} old vs {new} new")]
    LengthMismatch { old: usize, new: usize },
    #[error(transparent)]
    InvalidRule(#[from] AuthzError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Every stored rule, ascending by row identity.
    async fn load_all(&self) -> StoreResult<Vec<PolicyRule>>;
    /// Rules matching `filter`, ascending by row identity.
    async fn load_filtered(&self, filter: &Filter) -> StoreResult<Vec<PolicyRule>>;
    /// Replace the entire rule set.
    async fn save_all(&self, rules: &[PolicyRule]) -> StoreResult<()>;

    /// Insert one rule; a duplicate tuple is a [`StoreError::Conflict`].
    async fn add_rule(&self, ptype: &str, values: &[String]) -> StoreResult<()>;
    /// Insert many rules atomically.
    async fn add_rules(&self, ptype: &str, rules: &[Vec<String>]) -> StoreResult<()>;

    /// Delete rows whose leading fields equal `values`.
    async fn remove_rule(&self, ptype: &str, values: &[String]) -> StoreResult<bool>;
    /// Column-wise bulk delete; returns the number of rows removed.
    async fn remove_rules(&self, ptype: &str, rules: &[Vec<String>]) -> StoreResult<u64>;
    /// Delete rows matching the window. An out-of-range window deletes
    /// nothing and returns `false`.
    async fn remove_filtered(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[FieldMatch],
    ) -> StoreResult<bool>;

    /// Rewrite the single row whose leading fields equal `old`.
    async fn update_rule(&self, ptype: &str, old: &[String], new: &[String]) -> StoreResult<()>;
    /// Pairwise [`PolicyStore::update_rule`] in one transaction.
    async fn update_rules(
        &self,
        ptype: &str,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> StoreResult<()>;
    /// Replace the rows matching the window with `new_rules` and return the
    /// rows that matched.
    async fn update_filtered(
        &self,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        values: &[FieldMatch],
    ) -> StoreResult<Vec<Vec<String>>>;

    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

/// Full width of a rewrite: every column either side populated.
pub(crate) fn rewrite_width(old: &[String], new: &[String]) -> usize {
    old.len().max(new.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let errors = vec![
            StoreError::NotFound("rule".into()),
            StoreError::Conflict("rule".into()),
            StoreError::InvalidFilter("window".into()),
            StoreError::LengthMismatch { old: 1, new: 2 },
            StoreError::InvalidRule(AuthzError::EmptyRule),
            StoreError::Unexpected(anyhow::anyhow!("boom")),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn rewrite_width_covers_both_sides() {
        let short = vec!["a".to_string()];
        let long = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(rewrite_width(&short, &long), 3);
        assert_eq!(rewrite_width(&long, &short), 3);
    }
}
