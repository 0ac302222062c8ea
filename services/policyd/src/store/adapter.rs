//! Casbin adapter over a [`PolicyStore`].
//!
//! # Purpose and responsibility
//! Lets a `casbin::Enforcer` load and persist its policy through whichever
//! store backend the replica runs with.
//!
//! # Key invariants
//! - Rows that do not fit the model (unknown ptype or wrong width) are
//!   skipped on load and logged; they stay in the store untouched.
//! - A scoped adapter loads only the rows its [`Filter`] selects and reports
//!   itself as filtered.
//! - Store errors are wrapped in `casbin::error::AdapterError`.
use super::{PolicyStore, StoreError};
use async_trait::async_trait;
use casbin::error::AdapterError;
use casbin::{Adapter, Filter as CasbinFilter, Model};
use std::sync::Arc;
use warden_authz::{FieldMatch, Filter, MODEL_PTYPES, PolicyRule};

pub struct StoreAdapter {
    store: Arc<dyn PolicyStore>,
    scope: Option<Filter>,
    filtered: bool,
}

impl StoreAdapter {
    /// Adapter loading every stored rule.
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            scope: None,
            filtered: false,
        }
    }

    /// Adapter loading only the rules `filter` selects.
    pub fn scoped(store: Arc<dyn PolicyStore>, filter: Filter) -> Self {
        Self {
            store,
            scope: Some(filter),
            filtered: false,
        }
    }
}

/// Insert `rules` into a casbin model, skipping any the model cannot hold.
/// Returns the number inserted.
pub fn load_rules<I>(model: &mut dyn Model, rules: I) -> usize
where
    I: IntoIterator<Item = PolicyRule>,
{
    let mut loaded = 0;
    for rule in rules {
        let Ok(section) = warden_authz::check_model_rule(&rule.ptype, &rule.values) else {
            tracing::warn!(%rule, "skipping policy rule the model cannot evaluate");
            continue;
        };
        if model.add_policy(section.as_str(), &rule.ptype, rule.values) {
            loaded += 1;
        }
    }
    loaded
}

/// Every rule held by a casbin model, `p` before `g`.
pub fn model_rules(model: &dyn Model) -> Vec<PolicyRule> {
    MODEL_PTYPES
        .iter()
        .flat_map(|(section, ptype, _)| {
            model
                .get_policy(section.as_str(), ptype)
                .into_iter()
                .map(|values| PolicyRule {
                    ptype: ptype.to_string(),
                    values,
                })
        })
        .collect()
}

fn adapter_error(err: StoreError) -> casbin::Error {
    AdapterError(Box::new(err)).into()
}

/// casbin's positional filter: a non-empty entry must equal the field.
fn matches_casbin_filter(rule: &PolicyRule, filter: &CasbinFilter<'_>) -> bool {
    let wanted = match rule.ptype.as_bytes().first() {
        Some(b'p') => &filter.p,
        Some(b'g') => &filter.g,
        _ => return false,
    };
    wanted
        .iter()
        .enumerate()
        .all(|(index, value)| value.is_empty() || rule.field(index) == Some(*value))
}

#[async_trait]
impl Adapter for StoreAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        let rules = match &self.scope {
            Some(filter) => self.store.load_filtered(filter).await,
            None => self.store.load_all().await,
        }
        .map_err(adapter_error)?;
        let total = rules.len();
        let loaded = load_rules(m, rules);
        self.filtered = self.scope.is_some();
        tracing::debug!(
            total,
            loaded,
            backend = self.store.backend_name(),
            filtered = self.filtered,
            "policy rules read from store"
        );
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn Model,
        f: CasbinFilter<'a>,
    ) -> casbin::Result<()> {
        let rules = self.store.load_all().await.map_err(adapter_error)?;
        load_rules(
            m,
            rules
                .into_iter()
                .filter(|rule| matches_casbin_filter(rule, &f)),
        );
        self.filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        self.store
            .save_all(&model_rules(m))
            .await
            .map_err(adapter_error)
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        self.store.save_all(&[]).await.map_err(adapter_error)
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    async fn add_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        match self.store.add_rule(ptype, &rule).await {
            Ok(()) => Ok(true),
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(err) => Err(adapter_error(err)),
        }
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        match self.store.add_rules(ptype, &rules).await {
            Ok(()) => Ok(true),
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(err) => Err(adapter_error(err)),
        }
    }

    async fn remove_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        self.store
            .remove_rule(ptype, &rule)
            .await
            .map_err(adapter_error)
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let removed = self
            .store
            .remove_rules(ptype, &rules)
            .await
            .map_err(adapter_error)?;
        Ok(removed > 0)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        let values: Vec<FieldMatch> = field_values.into_iter().map(FieldMatch::from).collect();
        self.store
            .remove_filtered(ptype, field_index, &values)
            .await
            .map_err(adapter_error)
    }
}
