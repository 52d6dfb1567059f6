//! The address synchronizer reconciles the GPS-device to chain-address map
//! with the contacts table, deriving and persisting an address for every
//! contact that lacks one.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eyre::Result;

use roda_base::agent_main;

use crate::sync::AddressSync;

mod settings;
mod sync;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    agent_main::<AddressSync>().await
}
