//! Domain model shared by every stage of the Roda chain pipeline.
//!
//! This crate holds the canonical record types (routes, contacts, credits,
//! payments), the identifiers that tie them together, the integrity-error
//! taxonomy, and the small set of date helpers every agent needs. It has no
//! I/O: adapters for the object store, the relational store and the chain
//! live in `roda-base` and `roda-celo`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod types;

/// Date parsing/formatting helpers shared by all stages
pub mod utils;

pub use error::*;
pub use types::*;
