//! The blockchain publishers: three agents translating pending records into
//! chain transactions, one per record, signed by the master account.
//!
//! All three share the same machinery — one nonce-owning [`TxSender`] per
//! batch, a wall-clock budget that stops the batch cleanly at 90% of the
//! configured timeout, and per-record idempotency signals (the relational
//! store's published flag for credits and payments, the per-day checkpoint
//! object for routes). They differ only in where records come from and how
//! a revert is interpreted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ethers::types::Address;
use eyre::{Result, WrapErr};

use roda_base::settings::ContractInfo;
use roda_base::store::ObjectStore;
use roda_celo::{
    connect, derive_wallet, ReceiptPolicy, RodaLedger, TxSender, MASTER_ACCOUNT_INDEX,
};

mod settings;
pub use settings::PublisherSettings;

/// The route publisher agent
pub mod routes;

/// The credit publisher agent
pub mod credits;

/// The payment publisher agent
pub mod payments;

/// Default invocation budget: fourteen minutes, matching the execution
/// harness's fifteen-minute cap with headroom.
pub const DEFAULT_TIMEOUT_SECS: u64 = 840;

/// Wall-clock budget of one publisher invocation. The batch stops cleanly
/// once 90% of the budget is spent so there is always time to flush
/// progress.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    started: Instant,
    limit: Duration,
}

impl Budget {
    /// Start the clock on a fresh budget.
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    /// Whether the batch must stop before taking another record.
    pub fn exhausted(&self) -> bool {
        self.started.elapsed() > self.limit.mul_f64(0.9)
    }
}

/// Everything a publisher needs to talk to the chain for one batch.
pub struct ChainSession {
    /// Bound contract
    pub ledger: RodaLedger,
    /// Serial sender owning the account nonce
    pub sender: TxSender,
    /// Master mnemonic, for deriving client addresses on demand
    pub mnemonic: String,
}

/// Resolve credentials, connect to the RPC endpoint for the configured
/// environment, bind the contract and prepare the nonce-owning sender.
pub async fn open_chain_session(
    settings: &PublisherSettings,
    store: &dyn ObjectStore,
    contract: &ContractInfo,
) -> Result<ChainSession> {
    let credentials = settings.celo_credentials(store).await?;
    let provider = connect(credentials.rpc_url(settings.environment))
        .wrap_err("connecting to the rpc endpoint")?;
    let address: Address = contract
        .address
        .parse()
        .wrap_err_with(|| format!("invalid contract address {:?}", contract.address))?;
    let ledger = RodaLedger::new(address, &contract.abi, provider.clone())?;
    let wallet = derive_wallet(&credentials.mnemonic, MASTER_ACCOUNT_INDEX)
        .wrap_err("deriving the master account")?;
    let sender = TxSender::start(provider, wallet, ReceiptPolicy::default()).await?;
    Ok(ChainSession {
        ledger,
        sender,
        mnemonic: credentials.mnemonic,
    })
}

/// Whether a flag cell fetched outside the typed projection is set. The
/// store hands back checkboxes as booleans and legacy sentinel columns as
/// strings; both count.
pub(crate) fn flag_is_set(extra: &HashMap<String, serde_json::Value>, field: &str) -> bool {
    match extra.get(field) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => matches!(
            s.trim().to_ascii_uppercase().as_str(),
            "VERDADERO" | "TRUE" | "SÍ" | "SI"
        ),
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn zero_budget_is_immediately_exhausted() {
        let budget = Budget::start(Duration::ZERO);
        assert!(budget.exhausted());
    }

    #[test]
    fn generous_budget_is_not_exhausted() {
        let budget = Budget::start(Duration::from_secs(3600));
        assert!(!budget.exhausted());
    }

    #[test]
    fn flags_accept_checkboxes_and_sentinels() {
        let extra: HashMap<String, serde_json::Value> = serde_json::from_value(json!({
            "PublishedToCeloStaging": true,
            "PublishedToCeloProduction": "VERDADERO",
            "Legacy": "FALSO",
            "Numeric": 1,
        }))
        .unwrap();
        assert!(flag_is_set(&extra, "PublishedToCeloStaging"));
        assert!(flag_is_set(&extra, "PublishedToCeloProduction"));
        assert!(flag_is_set(&extra, "Numeric"));
        assert!(!flag_is_set(&extra, "Legacy"));
        assert!(!flag_is_set(&extra, "Missing"));
    }
}
