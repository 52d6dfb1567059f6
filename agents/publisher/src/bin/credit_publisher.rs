//! Publishes non-published credits from the relational store to the chain.

#![forbid(unsafe_code)]

use eyre::Result;

use publisher::credits::CreditPublisher;
use roda_base::agent_main;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    agent_main::<CreditPublisher>().await
}
