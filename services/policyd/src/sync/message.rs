//! Sync message wire codec.
//!
//! Payloads are UTF-8 JSON objects:
//! `{"method", "origin_id", "sec", "ptype", "field_index", "rules", "model_text"}`.
//! Method names follow the classic watcher vocabulary so mixed fleets keep
//! talking to each other. The shape of `rules` depends on the method:
//!
//! | method | `rules` |
//! |---|---|
//! | `Update`, `UpdateForSavePolicy` | unused |
//! | `UpdateForAddPolicy`, `UpdateForRemovePolicy` | `["v0", "v1", ...]` |
//! | `UpdateForRemoveFilteredPolicy` | `["v0", null, ...]` (`null` or `""` is a wildcard) |
//! | `UpdateForAddPolicies`, `UpdateForRemovePolicies` | `[["v0", ...], ...]` |
use super::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_authz::{FieldMatch, Section};

pub const METHOD_UPDATE: &str = "Update";
pub const METHOD_ADD_POLICY: &str = "UpdateForAddPolicy";
pub const METHOD_REMOVE_POLICY: &str = "UpdateForRemovePolicy";
pub const METHOD_REMOVE_FILTERED: &str = "UpdateForRemoveFilteredPolicy";
pub const METHOD_SAVE_POLICY: &str = "UpdateForSavePolicy";
pub const METHOD_ADD_POLICIES: &str = "UpdateForAddPolicies";
pub const METHOD_REMOVE_POLICIES: &str = "UpdateForRemovePolicies";

/// What a replica should replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Reload everything from the policy store.
    FullReload,
    AddOne {
        sec: Section,
        ptype: String,
        rule: Vec<String>,
    },
    RemoveOne {
        sec: Section,
        ptype: String,
        rule: Vec<String>,
    },
    RemoveFiltered {
        sec: Section,
        ptype: String,
        field_index: usize,
        values: Vec<FieldMatch>,
    },
    /// Replace the whole in-memory model from policy text.
    SaveModel { model_text: String },
    AddMany {
        sec: Section,
        ptype: String,
        rules: Vec<Vec<String>>,
    },
    RemoveMany {
        sec: Section,
        ptype: String,
        rules: Vec<Vec<String>>,
    },
}

impl SyncEvent {
    pub fn method(&self) -> &'static str {
        match self {
            SyncEvent::FullReload => METHOD_UPDATE,
            SyncEvent::AddOne { .. } => METHOD_ADD_POLICY,
            SyncEvent::RemoveOne { .. } => METHOD_REMOVE_POLICY,
            SyncEvent::RemoveFiltered { .. } => METHOD_REMOVE_FILTERED,
            SyncEvent::SaveModel { .. } => METHOD_SAVE_POLICY,
            SyncEvent::AddMany { .. } => METHOD_ADD_POLICIES,
            SyncEvent::RemoveMany { .. } => METHOD_REMOVE_POLICIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub origin_id: String,
    pub event: SyncEvent,
}

/// Result of decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Known(SyncMessage),
    /// A well-formed envelope carrying a method this build does not know.
    Unknown { method: String, origin_id: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    method: String,
    origin_id: String,
    #[serde(default)]
    sec: String,
    #[serde(default)]
    ptype: String,
    #[serde(default = "no_field_index")]
    field_index: i64,
    #[serde(default)]
    rules: Value,
    #[serde(default)]
    model_text: String,
}

fn no_field_index() -> i64 {
    -1
}

impl SyncMessage {
    pub fn new(origin_id: impl Into<String>, event: SyncEvent) -> Self {
        Self {
            origin_id: origin_id.into(),
            event,
        }
    }

    pub fn method(&self) -> &'static str {
        self.event.method()
    }

    pub fn encode(&self) -> Result<String, SyncError> {
        let mut wire = WireMessage {
            method: self.method().to_string(),
            origin_id: self.origin_id.clone(),
            sec: String::new(),
            ptype: String::new(),
            field_index: no_field_index(),
            rules: Value::Null,
            model_text: String::new(),
        };
        match &self.event {
            SyncEvent::FullReload => {}
            SyncEvent::AddOne { sec, ptype, rule } | SyncEvent::RemoveOne { sec, ptype, rule } => {
                wire.sec = sec.to_string();
                wire.ptype = ptype.clone();
                wire.rules = serde_json::to_value(rule)?;
            }
            SyncEvent::RemoveFiltered {
                sec,
                ptype,
                field_index,
                values,
            } => {
                wire.sec = sec.to_string();
                wire.ptype = ptype.clone();
                wire.field_index = i64::try_from(*field_index)
                    .map_err(|_| SyncError::Malformed("field_index overflow".to_string()))?;
                wire.rules = Value::Array(
                    values
                        .iter()
                        .map(|value| match value.as_exact() {
                            Some(exact) => Value::String(exact.to_string()),
                            None => Value::Null,
                        })
                        .collect(),
                );
            }
            SyncEvent::SaveModel { model_text } => {
                wire.model_text = model_text.clone();
            }
            SyncEvent::AddMany { sec, ptype, rules }
            | SyncEvent::RemoveMany { sec, ptype, rules } => {
                wire.sec = sec.to_string();
                wire.ptype = ptype.clone();
                wire.rules = serde_json::to_value(rules)?;
            }
        }
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decode a payload. Unknown methods are not an error; malformed
    /// envelopes or payloads are.
    pub fn decode(payload: &str) -> Result<Decoded, SyncError> {
        let wire: WireMessage = serde_json::from_str(payload)?;
        let event = match wire.method.as_str() {
            METHOD_UPDATE => SyncEvent::FullReload,
            METHOD_ADD_POLICY => SyncEvent::AddOne {
                sec: parse_sec(&wire.sec)?,
                ptype: wire.ptype,
                rule: serde_json::from_value(wire.rules)?,
            },
            METHOD_REMOVE_POLICY => SyncEvent::RemoveOne {
                sec: parse_sec(&wire.sec)?,
                ptype: wire.ptype,
                rule: serde_json::from_value(wire.rules)?,
            },
            METHOD_REMOVE_FILTERED => {
                let field_index = usize::try_from(wire.field_index).map_err(|_| {
                    SyncError::Malformed(format!("negative field_index {}", wire.field_index))
                })?;
                let values: Vec<Option<String>> = serde_json::from_value(wire.rules)?;
                SyncEvent::RemoveFiltered {
                    sec: parse_sec(&wire.sec)?,
                    ptype: wire.ptype,
                    field_index,
                    values: values.into_iter().map(FieldMatch::from).collect(),
                }
            }
            METHOD_SAVE_POLICY => SyncEvent::SaveModel {
                model_text: wire.model_text,
            },
            METHOD_ADD_POLICIES => SyncEvent::AddMany {
                sec: parse_sec(&wire.sec)?,
                ptype: wire.ptype,
                rules: serde_json::from_value(wire.rules)?,
            },
            METHOD_REMOVE_POLICIES => SyncEvent::RemoveMany {
                sec: parse_sec(&wire.sec)?,
                ptype: wire.ptype,
                rules: serde_json::from_value(wire.rules)?,
            },
            _ => {
                return Ok(Decoded::Unknown {
                    method: wire.method,
                    origin_id: wire.origin_id,
                });
            }
        };
        Ok(Decoded::Known(SyncMessage {
            origin_id: wire.origin_id,
            event,
        }))
    }
}

fn parse_sec(sec: &str) -> Result<Section, SyncError> {
    sec.parse()
        .map_err(|_| SyncError::Malformed(format!("unknown sec `{sec}`")))
}
