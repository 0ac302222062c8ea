//! Warden RBAC primitives shared by the policy daemon and its replicas.
//!
//! # Purpose
//! Centralizes the rule tuple, filters, row matchers, the casbin model every
//! replica evaluates authorization queries with, and the snapshot codec used
//! to broadcast a saved policy.
//!
//! # How it fits
//! `policyd` persists [`PolicyRule`] rows and loads them into a
//! `casbin::Enforcer` built from [`casbin_model`]. Nothing in this crate
//! performs I/O.
//!
//! # Key invariants
//! - Rules carry one to six positional values (`v0..v5`).
//! - Absent trailing fields compare as empty strings.
//! - Only `p` and `g` rules of the model's width are evaluated.
//!
//! # Examples
//! ```rust
//! use warden_authz::{PolicyRule, check_model_rule, decode_snapshot, encode_snapshot};
//!
//! let rule = PolicyRule::new("p", ["role::1", "/menu", "GET"]).unwrap();
//! assert!(check_model_rule(&rule.ptype, &rule.values).is_ok());
//! let text = encode_snapshot(&[rule.clone()]).unwrap();
//! assert_eq!(decode_snapshot(&text).unwrap(), vec![rule]);
//! ```
//!
//! # Common pitfalls
//! - `ColumnMatcher` matches column by column, so it can select rows that
//!   were never listed when rules share values in different positions.
//! - `FieldMatch::from("")` is a wildcard; use `FieldMatch::exact("")` for a
//!   literal empty value.

mod casbin_model;
mod errors;
mod filter;
mod matcher;
mod rule;
mod snapshot;

pub use casbin_model::{
    GROUPING_PTYPE, MODEL_PTYPES, PERMISSION_PTYPE, casbin_model, casbin_model_string,
    check_model_rule, model_section,
};
pub use errors::{AuthzError, AuthzResult};
pub use filter::Filter;
pub use matcher::{ColumnMatcher, matches_leading, matches_window};
pub use rule::{
    FieldMatch, MAX_FIELDS, PolicyRule, Section, field_matches, field_window, validate_fields,
};
pub use snapshot::{decode_snapshot, encode_snapshot};
