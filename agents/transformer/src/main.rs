//! The transformer turns a day of raw GPS routes into canonical delivery
//! routes: it filters implausible rows, reconciles distance against
//! duration, splits oversized routes with distance and duration conserved,
//! assigns each route a monotonically issued identifier and a destination
//! chain address, and publishes the canonical partition atomically.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eyre::Result;

use roda_base::agent_main;

use crate::transformer::Transformer;

mod params;
mod pipeline;
mod settings;
mod transformer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    agent_main::<Transformer>().await
}
