//! Casbin model definition for Warden's flat RBAC.
//!
//! # Purpose and responsibility
//! Holds the model text every replica builds its `casbin::Enforcer` from and
//! the shape checks applied before a rule is handed to casbin.
//!
//! # Where it fits
//! `policyd` builds one model per load and feeds it rules from the policy
//! store; the checks here keep rules that casbin could not evaluate out of
//! memory.
//!
//! # Key invariants
//! - Requests are `(subject, object, action)`; object and action match
//!   exactly, the subject through the `g` role closure.
//! - Only `p` (three fields) and `g` (two fields) are evaluated.
use crate::rule::{PolicyRule, Section, validate_fields};
use crate::{AuthzError, AuthzResult};
use casbin::prelude::DefaultModel;

const MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

pub const PERMISSION_PTYPE: &str = "p";
pub const GROUPING_PTYPE: &str = "g";

/// Every ptype the model evaluates, with its section and field count.
pub const MODEL_PTYPES: [(Section, &str, usize); 2] = [
    (Section::Policy, PERMISSION_PTYPE, 3),
    (Section::Grouping, GROUPING_PTYPE, 2),
];

pub fn casbin_model_string() -> &'static str {
    MODEL
}

/// Parse a fresh model. Each enforcer needs its own instance.
pub async fn casbin_model() -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(MODEL).await
}

/// Resolve the section of `ptype`, rejecting ptypes the model does not define.
pub fn model_section(ptype: &str) -> AuthzResult<Section> {
    MODEL_PTYPES
        .iter()
        .find(|(_, known, _)| *known == ptype)
        .map(|(section, _, _)| *section)
        .ok_or_else(|| AuthzError::UnsupportedPtype(ptype.to_string()))
}

/// Check that `values` is a rule casbin can evaluate under `ptype`.
pub fn check_model_rule(ptype: &str, values: &[String]) -> AuthzResult<Section> {
    validate_fields(values)?;
    let Some((section, _, arity)) = MODEL_PTYPES.iter().find(|(_, known, _)| *known == ptype)
    else {
        return Err(AuthzError::UnsupportedPtype(ptype.to_string()));
    };
    if values.len() != *arity {
        return Err(AuthzError::RuleShape {
            ptype: ptype.to_string(),
            expected: *arity,
            actual: values.len(),
        });
    }
    Ok(*section)
}

impl PolicyRule {
    /// True when the rule fits the casbin model.
    pub fn fits_model(&self) -> bool {
        check_model_rule(&self.ptype, &self.values).is_ok()
    }
}
