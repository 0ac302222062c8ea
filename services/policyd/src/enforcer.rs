//! RBAC decision engine with store persistence and replica sync.
//!
//! # Purpose and responsibility
//! Owns one replica's `casbin::Enforcer`, answers `enforce` queries from it,
//! and drives every mutation through three steps:
//! (a) apply to the casbin model, (b) write to the [`PolicyStore`],
//! (c) broadcast.
//!
//! # Lifecycle
//! `Unloaded` after construction, `Loaded` after [`Enforcer::load_policy`],
//! `FilteredLoaded` after [`Enforcer::load_filtered_policy`]. A filtered
//! engine may mutate but never [`Enforcer::save_policy`]; a full reload
//! returns it to `Loaded`.
//!
//! # Key invariants and assumptions
//! - `enforce` never touches the store or the bus.
//! - Loads build a fresh casbin enforcer through [`StoreAdapter`] and swap it
//!   in whole, so queries never see a half-loaded policy.
//! - Local mutations hold the watcher guard from step (a) through step (c),
//!   so remote messages are applied strictly between local mutations.
//! - Steps (a) and (b) are not atomic. A failed store write leaves memory
//!   ahead of the store; it is logged and surfaced, not rolled back.
//! - Remote messages are applied to memory only; the originator already
//!   persisted them.
use crate::store::adapter::{StoreAdapter, load_rules, model_rules};
use crate::store::{PolicyStore, StoreError};
use crate::sync::{SyncError, SyncEvent, SyncHandler, SyncMessage, SyncPermit, Watcher};
use async_trait::async_trait;
use casbin::{CoreApi, MemoryAdapter, Model, RbacApi};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use warden_authz::{
    AuthzError, FieldMatch, Filter, GROUPING_PTYPE, MODEL_PTYPES, PERMISSION_PTYPE, PolicyRule,
    Section, casbin_model, check_model_rule, decode_snapshot, encode_snapshot, field_window,
    matches_window, model_section,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loaded,
    FilteredLoaded,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("policy is not loaded")]
    NotLoaded,
    #[error("cannot save a filtered policy; load the full policy first")]
    FilteredSave,
    #[error(transparent)]
    Authz(#[from] AuthzError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Casbin(#[from] casbin::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

struct Core {
    casbin: Option<casbin::Enforcer>,
    state: EngineState,
}

impl Core {
    fn loaded_mut(&mut self) -> EngineResult<&mut casbin::Enforcer> {
        self.casbin.as_mut().ok_or(EngineError::NotLoaded)
    }

    fn install(&mut self, enforcer: casbin::Enforcer, state: EngineState) -> usize {
        self.casbin = Some(enforcer);
        self.state = state;
        self.record_len()
    }

    fn len(&self) -> usize {
        let Some(enforcer) = self.casbin.as_ref() else {
            return 0;
        };
        let model = enforcer.get_model();
        MODEL_PTYPES
            .iter()
            .map(|(section, ptype, _)| model.get_policy(section.as_str(), ptype).len())
            .sum()
    }

    fn record_len(&self) -> usize {
        let len = self.len();
        metrics::gauge!("warden_policy_rules").set(len as f64);
        len
    }
}

async fn build_enforcer<A>(adapter: A) -> EngineResult<casbin::Enforcer>
where
    A: casbin::Adapter + 'static,
{
    let model = casbin_model().await?;
    Ok(casbin::Enforcer::new(model, adapter).await?)
}

/// Rebuild role links after a grouping change.
fn relink(enforcer: &mut casbin::Enforcer, sec: Section) -> EngineResult<()> {
    if sec == Section::Grouping {
        enforcer.build_role_links()?;
    }
    Ok(())
}

/// Add every rule, or none if any is already present.
fn add_rules(
    enforcer: &mut casbin::Enforcer,
    sec: Section,
    ptype: &str,
    rules: &[Vec<String>],
) -> EngineResult<bool> {
    let model = enforcer.get_mut_model();
    if rules
        .iter()
        .any(|rule| model.has_policy(sec.as_str(), ptype, rule.clone()))
    {
        return Ok(false);
    }
    for rule in rules {
        model.add_policy(sec.as_str(), ptype, rule.clone());
    }
    relink(enforcer, sec)?;
    Ok(true)
}

/// Remove every rule, or none if any is missing.
fn remove_rules(
    enforcer: &mut casbin::Enforcer,
    sec: Section,
    ptype: &str,
    rules: &[Vec<String>],
) -> EngineResult<bool> {
    let model = enforcer.get_mut_model();
    if !rules
        .iter()
        .all(|rule| model.has_policy(sec.as_str(), ptype, rule.clone()))
    {
        return Ok(false);
    }
    for rule in rules {
        model.remove_policy(sec.as_str(), ptype, rule.clone());
    }
    relink(enforcer, sec)?;
    Ok(true)
}

/// Remove the rules matching the window and return them.
fn remove_matching(
    enforcer: &mut casbin::Enforcer,
    sec: Section,
    ptype: &str,
    field_index: usize,
    values: &[FieldMatch],
) -> EngineResult<Vec<Vec<String>>> {
    field_window(field_index, values.len())?;
    let model = enforcer.get_mut_model();
    let matching: Vec<Vec<String>> = model
        .get_policy(sec.as_str(), ptype)
        .into_iter()
        .filter(|rule| matches_window(rule, field_index, values))
        .collect();
    for rule in &matching {
        model.remove_policy(sec.as_str(), ptype, rule.clone());
    }
    if !matching.is_empty() {
        relink(enforcer, sec)?;
    }
    Ok(matching)
}

/// Replace `old` with `new`. Returns `false` when `old` is absent.
fn replace_rule(
    enforcer: &mut casbin::Enforcer,
    sec: Section,
    ptype: &str,
    old: &[String],
    new: &[String],
) -> EngineResult<bool> {
    let model = enforcer.get_mut_model();
    if !model.remove_policy(sec.as_str(), ptype, old.to_vec()) {
        return Ok(false);
    }
    model.add_policy(sec.as_str(), ptype, new.to_vec());
    relink(enforcer, sec)?;
    Ok(true)
}

fn check_rules(ptype: &str, rules: &[Vec<String>]) -> EngineResult<Section> {
    let sec = model_section(ptype)?;
    for rule in rules {
        check_model_rule(ptype, rule)?;
    }
    Ok(sec)
}

/// State shared between the engine handle and its sync handler.
struct EngineInner {
    store: Arc<dyn PolicyStore>,
    core: RwLock<Core>,
}

impl EngineInner {
    async fn reload(&self) -> EngineResult<()> {
        let enforcer = build_enforcer(StoreAdapter::new(Arc::clone(&self.store))).await?;
        let len = self.core.write().install(enforcer, EngineState::Loaded);
        tracing::info!(rules = len, backend = self.store.backend_name(), "policy loaded");
        Ok(())
    }

    async fn reload_filtered(&self, filter: &Filter) -> EngineResult<()> {
        let adapter = StoreAdapter::scoped(Arc::clone(&self.store), filter.clone());
        let enforcer = build_enforcer(adapter).await?;
        let len = self
            .core
            .write()
            .install(enforcer, EngineState::FilteredLoaded);
        tracing::info!(rules = len, "filtered policy loaded");
        Ok(())
    }

    async fn install_snapshot(&self, model_text: &str) -> EngineResult<()> {
        let rules = decode_snapshot(model_text)?;
        let mut enforcer = build_enforcer(MemoryAdapter::default()).await?;
        load_rules(enforcer.get_mut_model(), rules);
        enforcer.build_role_links()?;
        let len = self.core.write().install(enforcer, EngineState::Loaded);
        tracing::info!(rules = len, "policy snapshot installed");
        Ok(())
    }

    /// Replay a peer's mutation against memory.
    async fn apply_remote(&self, event: SyncEvent) -> EngineResult<()> {
        if self.core.read().state == EngineState::Unloaded {
            tracing::debug!(method = event.method(), "policy not loaded; ignoring sync message");
            return Ok(());
        }
        match event {
            SyncEvent::FullReload => return self.reload().await,
            SyncEvent::SaveModel { model_text } => return self.install_snapshot(&model_text).await,
            SyncEvent::AddOne { ptype, rule, .. } => {
                let rules = [rule];
                let sec = check_rules(&ptype, &rules)?;
                let mut core = self.core.write();
                add_rules(core.loaded_mut()?, sec, &ptype, &rules)?;
            }
            SyncEvent::RemoveOne { ptype, rule, .. } => {
                let sec = model_section(&ptype)?;
                let mut core = self.core.write();
                remove_rules(core.loaded_mut()?, sec, &ptype, &[rule])?;
            }
            SyncEvent::RemoveFiltered {
                ptype,
                field_index,
                values,
                ..
            } => {
                let sec = model_section(&ptype)?;
                let mut core = self.core.write();
                remove_matching(core.loaded_mut()?, sec, &ptype, field_index, &values)?;
            }
            SyncEvent::AddMany { ptype, rules, .. } => {
                let sec = check_rules(&ptype, &rules)?;
                let mut core = self.core.write();
                let enforcer = core.loaded_mut()?;
                // A peer applies what it can; rules it already holds are skipped.
                for rule in rules {
                    add_rules(enforcer, sec, &ptype, &[rule])?;
                }
            }
            SyncEvent::RemoveMany { ptype, rules, .. } => {
                let sec = model_section(&ptype)?;
                let mut core = self.core.write();
                let enforcer = core.loaded_mut()?;
                for rule in rules {
                    remove_rules(enforcer, sec, &ptype, &[rule])?;
                }
            }
        }
        self.core.read().record_len();
        Ok(())
    }
}

/// Sync handler registered with the watcher; applies peer mutations.
struct EngineSyncHandler {
    inner: Arc<EngineInner>,
}

#[async_trait]
impl SyncHandler for EngineSyncHandler {
    async fn apply(&self, message: SyncMessage) -> anyhow::Result<()> {
        self.inner.apply_remote(message.event).await?;
        Ok(())
    }
}

/// One replica's decision engine.
///
/// # Example
/// ```rust
/// use policyd::enforcer::Enforcer;
/// use policyd::store::memory::InMemoryStore;
/// use std::sync::Arc;
///
/// # async fn demo() -> Result<(), policyd::enforcer::EngineError> {
/// let enforcer = Enforcer::new(Arc::new(InMemoryStore::new()));
/// enforcer.load_policy().await?;
/// enforcer.add_permission_for_user("role::1", "/menu", "GET").await?;
/// enforcer.add_role_for_user("user::1", "role::1").await?;
/// assert!(enforcer.enforce("user::1", "/menu", "GET"));
/// # Ok(())
/// # }
/// ```
pub struct Enforcer {
    inner: Arc<EngineInner>,
    watcher: Option<Arc<Watcher>>,
}

impl Enforcer {
    /// Engine without replication.
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                core: RwLock::new(Core {
                    casbin: None,
                    state: EngineState::Unloaded,
                }),
            }),
            watcher: None,
        }
    }

    /// Engine that broadcasts through `watcher` and registers itself as the
    /// watcher's handler.
    pub async fn with_watcher(store: Arc<dyn PolicyStore>, watcher: Arc<Watcher>) -> Self {
        let mut enforcer = Self::new(store);
        watcher
            .set_handler(Arc::new(EngineSyncHandler {
                inner: Arc::clone(&enforcer.inner),
            }))
            .await;
        enforcer.watcher = Some(watcher);
        enforcer
    }

    pub fn watcher(&self) -> Option<&Arc<Watcher>> {
        self.watcher.as_ref()
    }

    pub fn origin_id(&self) -> Option<&str> {
        self.watcher.as_deref().map(Watcher::origin_id)
    }

    pub fn state(&self) -> EngineState {
        self.inner.core.read().state
    }

    pub fn policy_len(&self) -> usize {
        self.inner.core.read().len()
    }

    /// Snapshot of every rule in memory, `p` before `g`.
    pub fn rules(&self) -> Vec<PolicyRule> {
        let core = self.inner.core.read();
        core.casbin
            .as_ref()
            .map(|enforcer| model_rules(enforcer.get_model()))
            .unwrap_or_default()
    }

    /// Decide whether `subject` may perform `action` on `object`.
    ///
    /// An unloaded engine denies everything.
    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> bool {
        let allowed = match self.inner.core.read().casbin.as_ref() {
            None => false,
            Some(enforcer) => enforcer
                .enforce((subject, object, action))
                .unwrap_or_else(|err| {
                    tracing::warn!(error = %err, subject, object, action, "enforce failed; denying");
                    false
                }),
        };
        let decision = if allowed { "allow" } else { "deny" };
        metrics::counter!("warden_enforce_total", "decision" => decision).increment(1);
        allowed
    }

    /// Replace memory with the full stored policy.
    pub async fn load_policy(&self) -> EngineResult<()> {
        let _permit = self.permit().await;
        self.inner.reload().await
    }

    /// Replace memory with the stored rules matching `filter`.
    pub async fn load_filtered_policy(&self, filter: &Filter) -> EngineResult<()> {
        let _permit = self.permit().await;
        self.inner.reload_filtered(filter).await
    }

    /// Persist the whole in-memory policy and broadcast it.
    ///
    /// # Errors
    /// - [`EngineError::FilteredSave`] when only a filtered subset is loaded.
    pub async fn save_policy(&self) -> EngineResult<()> {
        let permit = self.permit().await;
        let rules = {
            let core = self.inner.core.read();
            match (core.state, core.casbin.as_ref()) {
                (EngineState::FilteredLoaded, _) => return Err(EngineError::FilteredSave),
                (EngineState::Loaded, Some(enforcer)) => model_rules(enforcer.get_model()),
                _ => return Err(EngineError::NotLoaded),
            }
        };
        let model_text = encode_snapshot(&rules)?;
        self.inner
            .store
            .save_all(&rules)
            .await
            .map_err(|err| diverged("save_policy", err))?;
        if let Some(permit) = &permit {
            match permit.publish(SyncEvent::SaveModel { model_text }).await {
                Err(err) if err.is_payload_too_large() => {
                    tracing::info!(error = %err, "policy snapshot too large; broadcasting reload");
                    permit.publish(SyncEvent::FullReload).await?;
                }
                other => other?,
            }
        }
        record_mutation("save_policy");
        Ok(())
    }

    /// Add one rule. Returns `false` if it is already present.
    pub async fn add_policy(&self, ptype: &str, rule: &[String]) -> EngineResult<bool> {
        let sec = check_model_rule(ptype, rule)?;
        let permit = self.permit().await;
        {
            let mut core = self.inner.core.write();
            if !add_rules(core.loaded_mut()?, sec, ptype, &[rule.to_vec()])? {
                return Ok(false);
            }
        }
        self.inner
            .store
            .add_rule(ptype, rule)
            .await
            .map_err(|err| diverged("add_policy", err))?;
        let event = SyncEvent::AddOne {
            sec,
            ptype: ptype.to_string(),
            rule: rule.to_vec(),
        };
        self.finish(&permit, "add_policy", event).await?;
        Ok(true)
    }

    /// Remove one rule. Returns `false` if it was not present.
    pub async fn remove_policy(&self, ptype: &str, rule: &[String]) -> EngineResult<bool> {
        let sec = model_section(ptype)?;
        let permit = self.permit().await;
        {
            let mut core = self.inner.core.write();
            if !remove_rules(core.loaded_mut()?, sec, ptype, &[rule.to_vec()])? {
                return Ok(false);
            }
        }
        let removed = self
            .inner
            .store
            .remove_rule(ptype, rule)
            .await
            .map_err(|err| diverged("remove_policy", err))?;
        if !removed {
            tracing::warn!(ptype, ?rule, "rule missing from policy store during remove");
        }
        let event = SyncEvent::RemoveOne {
            sec,
            ptype: ptype.to_string(),
            rule: rule.to_vec(),
        };
        self.finish(&permit, "remove_policy", event).await?;
        Ok(true)
    }

    /// Add all rules, or none if any is already present.
    pub async fn add_policies(&self, ptype: &str, rules: &[Vec<String>]) -> EngineResult<bool> {
        let sec = check_rules(ptype, rules)?;
        if rules.is_empty() {
            return Ok(false);
        }
        let permit = self.permit().await;
        {
            let mut core = self.inner.core.write();
            if !add_rules(core.loaded_mut()?, sec, ptype, rules)? {
                return Ok(false);
            }
        }
        self.inner
            .store
            .add_rules(ptype, rules)
            .await
            .map_err(|err| diverged("add_policies", err))?;
        let event = SyncEvent::AddMany {
            sec,
            ptype: ptype.to_string(),
            rules: rules.to_vec(),
        };
        self.finish(&permit, "add_policies", event).await?;
        Ok(true)
    }

    /// Remove all rules, or none if any is missing.
    ///
    /// The store side uses the column-wise matcher and may remove rows that
    /// were not listed.
    pub async fn remove_policies(&self, ptype: &str, rules: &[Vec<String>]) -> EngineResult<bool> {
        let sec = model_section(ptype)?;
        if rules.is_empty() {
            return Ok(false);
        }
        let permit = self.permit().await;
        {
            let mut core = self.inner.core.write();
            if !remove_rules(core.loaded_mut()?, sec, ptype, rules)? {
                return Ok(false);
            }
        }
        let removed = self
            .inner
            .store
            .remove_rules(ptype, rules)
            .await
            .map_err(|err| diverged("remove_policies", err))?;
        if removed as usize != rules.len() {
            tracing::warn!(
                ptype,
                listed = rules.len(),
                removed,
                "column-wise remove touched a different number of rows"
            );
        }
        let event = SyncEvent::RemoveMany {
            sec,
            ptype: ptype.to_string(),
            rules: rules.to_vec(),
        };
        self.finish(&permit, "remove_policies", event).await?;
        Ok(true)
    }

    /// Remove rules matching the `(field_index, values)` window from memory
    /// and from the store.
    ///
    /// The store is always written, since a filtered engine holds only part
    /// of the policy. Returns `true` when either side removed something.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidFieldWindow`] when the window leaves `v0..v5`.
    pub async fn remove_filtered_policy(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[FieldMatch],
    ) -> EngineResult<bool> {
        let sec = model_section(ptype)?;
        field_window(field_index, values.len())?;
        let permit = self.permit().await;
        let removed_in_memory = {
            let mut core = self.inner.core.write();
            !remove_matching(core.loaded_mut()?, sec, ptype, field_index, values)?.is_empty()
        };
        let removed_in_store = self
            .inner
            .store
            .remove_filtered(ptype, field_index, values)
            .await
            .map_err(|err| diverged("remove_filtered_policy", err))?;
        if !removed_in_memory && !removed_in_store {
            return Ok(false);
        }
        let event = SyncEvent::RemoveFiltered {
            sec,
            ptype: ptype.to_string(),
            field_index,
            values: values.to_vec(),
        };
        self.finish(&permit, "remove_filtered_policy", event).await?;
        Ok(true)
    }

    /// Rewrite `old` as `new`. Peers are told to reload.
    pub async fn update_policy(
        &self,
        ptype: &str,
        old: &[String],
        new: &[String],
    ) -> EngineResult<bool> {
        let sec = check_model_rule(ptype, new)?;
        let permit = self.permit().await;
        {
            let mut core = self.inner.core.write();
            if !replace_rule(core.loaded_mut()?, sec, ptype, old, new)? {
                return Ok(false);
            }
        }
        self.inner
            .store
            .update_rule(ptype, old, new)
            .await
            .map_err(|err| diverged("update_policy", err))?;
        self.finish(&permit, "update_policy", SyncEvent::FullReload)
            .await?;
        Ok(true)
    }

    /// Replace the rules matching the window with `new_rules` and return the
    /// stored rules that were replaced. Peers are told to reload.
    pub async fn update_filtered_policies(
        &self,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        values: &[FieldMatch],
    ) -> EngineResult<Vec<Vec<String>>> {
        let sec = check_rules(ptype, new_rules)?;
        field_window(field_index, values.len())?;
        let permit = self.permit().await;
        {
            let mut core = self.inner.core.write();
            let enforcer = core.loaded_mut()?;
            remove_matching(enforcer, sec, ptype, field_index, values)?;
            let model = enforcer.get_mut_model();
            for rule in new_rules {
                model.add_policy(sec.as_str(), ptype, rule.clone());
            }
            relink(enforcer, sec)?;
        }
        let old_rules = self
            .inner
            .store
            .update_filtered(ptype, new_rules, field_index, values)
            .await
            .map_err(|err| diverged("update_filtered_policies", err))?;
        self.finish(&permit, "update_filtered_policies", SyncEvent::FullReload)
            .await?;
        Ok(old_rules)
    }

    pub fn has_policy(&self, ptype: &str, rule: &[String]) -> bool {
        let Ok(sec) = model_section(ptype) else {
            return false;
        };
        let core = self.inner.core.read();
        core.casbin.as_ref().is_some_and(|enforcer| {
            enforcer
                .get_model()
                .has_policy(sec.as_str(), ptype, rule.to_vec())
        })
    }

    /// All rules of `ptype`, insertion order.
    pub fn policies(&self, ptype: &str) -> Vec<Vec<String>> {
        let Ok(sec) = model_section(ptype) else {
            return Vec::new();
        };
        let core = self.inner.core.read();
        core.casbin
            .as_ref()
            .map(|enforcer| enforcer.get_model().get_policy(sec.as_str(), ptype))
            .unwrap_or_default()
    }

    pub async fn add_role_for_user(&self, user: &str, role: &str) -> EngineResult<bool> {
        self.add_policy(GROUPING_PTYPE, &[user.to_string(), role.to_string()])
            .await
    }

    pub async fn delete_role_for_user(&self, user: &str, role: &str) -> EngineResult<bool> {
        self.remove_policy(GROUPING_PTYPE, &[user.to_string(), role.to_string()])
            .await
    }

    pub async fn add_permission_for_user(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> EngineResult<bool> {
        self.add_policy(PERMISSION_PTYPE, &permission(subject, object, action))
            .await
    }

    pub async fn delete_permission_for_user(
        &self,
        subject: &str,
        object: &str,
        action: &str,
    ) -> EngineResult<bool> {
        self.remove_policy(PERMISSION_PTYPE, &permission(subject, object, action))
            .await
    }

    pub fn roles_for_user(&self, user: &str) -> Vec<String> {
        self.with_casbin(|enforcer| enforcer.get_roles_for_user(user, None))
    }

    pub fn users_for_role(&self, role: &str) -> Vec<String> {
        self.with_casbin(|enforcer| enforcer.get_users_for_role(role, None))
    }

    pub fn implicit_roles_for_user(&self, user: &str) -> Vec<String> {
        self.with_casbin(|enforcer| enforcer.get_implicit_roles_for_user(user, None))
    }

    pub fn implicit_permissions_for_user(&self, user: &str) -> Vec<Vec<String>> {
        self.with_casbin(|enforcer| enforcer.get_implicit_permissions_for_user(user, None))
    }

    /// Close the watcher, if any.
    pub async fn close(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.close().await;
        }
    }

    /// Role queries may update casbin's role cache, so they take the write
    /// lock.
    fn with_casbin<T: Default>(&self, query: impl FnOnce(&mut casbin::Enforcer) -> T) -> T {
        let mut core = self.inner.core.write();
        core.casbin.as_mut().map(query).unwrap_or_default()
    }

    async fn permit(&self) -> Option<SyncPermit<'_>> {
        match &self.watcher {
            Some(watcher) => Some(watcher.lock().await),
            None => None,
        }
    }

    async fn finish(
        &self,
        permit: &Option<SyncPermit<'_>>,
        op: &'static str,
        event: SyncEvent,
    ) -> EngineResult<()> {
        if let Some(permit) = permit {
            permit.publish(event).await?;
        }
        record_mutation(op);
        self.inner.core.read().record_len();
        Ok(())
    }
}

fn permission(subject: &str, object: &str, action: &str) -> [String; 3] {
    [subject.to_string(), object.to_string(), action.to_string()]
}

fn record_mutation(op: &'static str) {
    metrics::counter!("warden_policy_mutations_total", "op" => op).increment(1);
}

fn diverged(op: &'static str, err: StoreError) -> EngineError {
    tracing::warn!(
        error = %err,
        op,
        "policy store write failed after in-memory change; a full reload is recommended"
    );
    EngineError::Store(err)
}
