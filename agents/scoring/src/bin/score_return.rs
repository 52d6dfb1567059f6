//! Writes the day's adjusted scores back to the contacts table.

#![forbid(unsafe_code)]

use eyre::Result;

use roda_base::agent_main;
use scoring::ScoreReturn;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    agent_main::<ScoreReturn>().await
}
