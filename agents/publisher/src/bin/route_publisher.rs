//! Publishes the day's canonical routes to the chain as NFTs, resuming
//! from the per-day checkpoint object.

#![forbid(unsafe_code)]

use eyre::Result;

use publisher::routes::RoutePublisher;
use roda_base::agent_main;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    agent_main::<RoutePublisher>().await
}
