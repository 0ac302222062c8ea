//! Serialized policy snapshots carried by save broadcasts.
//!
//! A snapshot is the JSON array of every rule in memory. Values are JSON
//! strings, so commas, quotes and line breaks inside a value survive intact.
use crate::rule::validate_fields;
use crate::{AuthzError, AuthzResult, PolicyRule};

pub fn encode_snapshot(rules: &[PolicyRule]) -> AuthzResult<String> {
    serde_json::to_string(rules).map_err(|err| AuthzError::InvalidSnapshot(err.to_string()))
}

/// Parse a snapshot, rejecting rules that do not fit `v0..v5`.
pub fn decode_snapshot(text: &str) -> AuthzResult<Vec<PolicyRule>> {
    let rules: Vec<PolicyRule> =
        serde_json::from_str(text).map_err(|err| AuthzError::InvalidSnapshot(err.to_string()))?;
    for rule in &rules {
        validate_fields(&rule.values)?;
    }
    Ok(rules)
}
