//! # Catalog Core SDK
//!
//! Shared building blocks for catalog plugins and the hosting server.
//! A catalog plugin describes one family of assets (MCP servers, models,
//! prompt templates, ...) and loads entries from configured sources. This
//! crate holds everything a plugin needs that is independent of the HTTP
//! surface:
//!
//! - **Records**: the opaque entity model produced by source providers
//! - **Sources**: source configuration, provider trait, and status reporting
//! - **Secrets**: resolution of `secretRef` objects inside source properties
//! - **Validation**: the layered pipeline run against proposed source configs
//! - **Overlays**: user-applied mutations kept aside from upstream data
//! - **Capabilities**: the machine-readable V2 document UI/CLI consume
//! - **Actions**: declared, discoverable, dry-runnable mutations
//! - **Filtering and pagination**: the list-query surface shared by all kinds
//!
//! The server crate composes these into per-plugin instances; out-of-tree
//! plugins depend on this crate alone.

pub mod actions;
pub mod capabilities;
pub mod error;
pub mod filter;
pub mod overlay;
pub mod pagination;
pub mod providers;
pub mod record;
pub mod secrets;
pub mod source;
pub mod validation;

pub use actions::{ActionDefinition, ActionRequest, ActionResult, ActionScope, ActionStatus};
pub use capabilities::PluginCapabilitiesV2;
pub use error::CoreError;
pub use filter::FilterQuery;
pub use overlay::{OverlayKey, OverlayRecord, OverlayStore};
pub use record::{PropertyValue, Provenance, Record};
pub use secrets::SecretResolver;
pub use source::{SourceConfig, SourceContext, SourceProvider, SourceState, SourceStatus};
pub use validation::{LayerResult, ValidationMode, ValidationOutcome};
