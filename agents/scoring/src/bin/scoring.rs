//! Computes the day's client scores, social-graph adjustments included,
//! and lands them as the daily scores CSV.

#![forbid(unsafe_code)]

use eyre::Result;

use roda_base::agent_main;
use scoring::ScoringEngine;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    agent_main::<ScoringEngine>().await
}
