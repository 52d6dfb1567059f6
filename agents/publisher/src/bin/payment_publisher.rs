//! Publishes non-published payments whose parent credit is already on
//! chain.

#![forbid(unsafe_code)]

use eyre::Result;

use publisher::payments::PaymentPublisher;
use roda_base::agent_main;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    agent_main::<PaymentPublisher>().await
}
