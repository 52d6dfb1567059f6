//! The extractor authenticates against the Tribu fleet API and lands the
//! day's raw GPS routes for one source family in the object store, where
//! the transformer picks them up.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eyre::Result;

use roda_base::agent_main;

use crate::extractor::Extractor;

mod extractor;
mod settings;
mod tribu;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    agent_main::<Extractor>().await
}
