//! Celo client for the Roda publishers.
//!
//! Wraps `ethers` with the pieces the pipeline needs: an HTTP transport
//! with bounded exponential-backoff retries, HD-wallet derivation from the
//! master mnemonic, dynamic bindings for the route/credit contracts (the
//! ABIs live in the object store, not in this repo), and a serial
//! transaction sender that owns the nonce for one publisher batch.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod contract;
mod error;
mod provider;
mod signer;
mod tx;

pub use contract::*;
pub use error::*;
pub use provider::*;
pub use signer::*;
pub use tx::*;
