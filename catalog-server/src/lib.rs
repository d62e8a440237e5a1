//! # Catalog Server
//!
//! A single process hosting multiple independent catalog plugins behind one
//! HTTP surface. Each plugin describes a family of assets, loads entries
//! from configured sources, and is served through a uniform
//! discovery / read / mutate / action API. On top of that core the server
//! layers governance: lifecycle state machines, versioning with environment
//! bindings, approval workflows, provenance, and an append-only audit log.
//!
//! ## Architecture
//!
//! - `plugins` — the plugin contract, registry and per-plugin instances
//! - `config_store` — persisted source configs (file, cluster object, memory)
//! - `capabilities` — the V2 capability documents UI/CLI consume
//! - `management` — source CRUD, refresh, diagnostics and `:action` dispatch
//! - `governance` — lifecycle, policies, approvals, versions, audit
//! - `scheduler` / `retention` — background refresh and audit retention
//! - `middleware` / `handlers` / `server` — the HTTP surface
//!
//! The request path composes panic recovery, request id, access log,
//! tenancy, and role extraction ahead of every handler; reads are open,
//! mutations require the operator role.

pub mod capabilities;
pub mod config;
pub mod config_store;
pub mod error;
pub mod governance;
pub mod handlers;
pub mod management;
pub mod middleware;
pub mod plugins;
pub mod request_context;
pub mod retention;
pub mod scheduler;
pub mod server;

pub use server::{create_app, create_server};
