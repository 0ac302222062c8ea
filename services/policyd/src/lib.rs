//! Replicated RBAC policy daemon library crate.
//!
//! # Purpose
//! Exposes the policy store backends, the decision engine, the cross-instance
//! sync watcher, configuration, and observability for use by the binary,
//! demos and tests.
//!
//! # Notes
//! Module boundaries follow the three layers a replica is built from: storage
//! ([`store`]), the in-memory engine ([`enforcer`]) and replication ([`sync`]).
//! [`app`] wires them together from a [`config::PolicydConfig`].
pub mod app;
pub mod config;
pub mod enforcer;
pub mod observability;
pub mod store;
pub mod sync;
