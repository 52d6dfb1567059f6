//! Shared framework for the Roda pipeline agents.
//!
//! Every stage of the pipeline is an agent: a bounded batch job that loads
//! its settings from config files and environment variables, talks to the
//! object store, the relational store, the counter service and (for the
//! publishers) the chain, and exits. This crate provides the settings
//! loader, the tracing/metrics plumbing and the adapters for all external
//! collaborators; the agents themselves only contain stage logic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Settings and the layered configuration loader
pub mod settings;

mod agent;
pub use agent::*;

/// The `decl_settings!` macro and its support code
pub mod macros;

mod metrics;
pub use metrics::*;

/// Object-store adapter (S3 in deployment, local files in tests)
pub mod store;

/// Object-store key layout for every artifact the pipeline touches
pub mod layout;

mod checkpoint;
pub use checkpoint::*;

mod counter;
pub use counter::*;

/// Relational-store (Airtable) REST adapter
pub mod airtable;

mod notify;
pub use notify::*;

pub use settings::Settings;
