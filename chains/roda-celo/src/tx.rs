use std::sync::Arc;
use std::time::{Duration, Instant};

use ethers::contract::ContractCall;
use ethers::providers::Middleware;
use ethers::signers::Signer;
use ethers::types::{Address, BlockNumber, TransactionReceipt, TxHash, U256, U64};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::provider::CeloProvider;
use crate::signer::CeloWallet;
use crate::ChainClientError;

/// Extra gas added on top of the node's estimate.
const GAS_ESTIMATE_MARGIN: u64 = 100_000;

/// Receipt-polling knobs.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptPolicy {
    /// Seconds between receipt queries
    pub poll_interval: Duration,
    /// Overall wall-clock budget for one receipt
    pub receipt_timeout: Duration,
    /// Tolerated "not found" errors before giving up
    pub max_not_found: u32,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            receipt_timeout: Duration::from_secs(300),
            max_not_found: 5,
        }
    }
}

/// Metadata of one accepted transaction.
#[derive(Debug, Clone)]
pub struct TxAcceptance {
    /// Nonce the transaction was sent with
    pub nonce: u64,
    /// Gas price used, wei
    pub gas_price: U256,
    /// Transaction hash
    pub tx_hash: TxHash,
}

/// Serial transaction sender owning the account nonce for one batch.
///
/// The nonce is read once, from the node's *pending* count, when the sender
/// is built; it is incremented locally only after a confirmed receipt, so
/// an abort anywhere leaves the next invocation to re-read it. Two senders
/// over the same account must never run concurrently.
#[derive(Debug)]
pub struct TxSender {
    provider: Arc<CeloProvider>,
    wallet: CeloWallet,
    chain_id: U64,
    nonce: U256,
    policy: ReceiptPolicy,
}

impl TxSender {
    /// Prepare a sender for one batch: resolve the chain id and the pending
    /// nonce of the wallet's account.
    pub async fn start(
        provider: Arc<CeloProvider>,
        wallet: CeloWallet,
        policy: ReceiptPolicy,
    ) -> Result<Self, ChainClientError> {
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| ChainClientError::Provider(e.to_string()))?;
        let chain_id = U64::from(chain_id.as_u64());
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let nonce = provider
            .get_transaction_count(wallet.address(), Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| ChainClientError::Provider(e.to_string()))?;
        debug!(account = ?wallet.address(), %nonce, "Prepared transaction sender");
        Ok(Self {
            provider,
            wallet,
            chain_id,
            nonce,
            policy,
        })
    }

    /// The publishing account.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// The nonce the next transaction will be sent with.
    pub fn next_nonce(&self) -> u64 {
        self.nonce.as_u64()
    }

    /// Estimate, price, sign, submit one contract call and wait for its
    /// receipt. The nonce advances only on success.
    pub async fn submit(
        &mut self,
        call: ContractCall<CeloProvider, ()>,
    ) -> Result<TxAcceptance, ChainClientError> {
        let call = call.from(self.wallet.address()).legacy();

        let estimated = call
            .estimate_gas()
            .await
            .map_err(|e| ChainClientError::classify(e.to_string()))?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| ChainClientError::Provider(e.to_string()))?;

        let mut tx = call.tx.clone();
        tx.set_nonce(self.nonce);
        tx.set_gas(estimated + U256::from(GAS_ESTIMATE_MARGIN));
        tx.set_gas_price(gas_price);
        tx.set_chain_id(self.chain_id);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ChainClientError::Provider(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let tx_hash = {
            let pending = self
                .provider
                .send_raw_transaction(raw)
                .await
                .map_err(|e| ChainClientError::classify(e.to_string()))?;
            *pending
        };
        info!(nonce = %self.nonce, %gas_price, ?tx_hash, "Dispatched transaction, awaiting receipt");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        if receipt.status == Some(U64::zero()) {
            return Err(ChainClientError::Reverted(format!(
                "transaction {tx_hash:?} was mined but reverted"
            )));
        }

        let acceptance = TxAcceptance {
            nonce: self.nonce.as_u64(),
            gas_price,
            tx_hash,
        };
        self.nonce += U256::one();
        Ok(acceptance)
    }

    /// Poll for a receipt until it appears, the node keeps claiming the
    /// transaction does not exist past the attempt limit, or the poll
    /// budget runs out.
    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<TransactionReceipt, ChainClientError> {
        let started = Instant::now();
        let mut not_found_attempts = 0;
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    info!(?tx_hash, block = ?receipt.block_number, "Transaction confirmed");
                    return Ok(receipt);
                }
                Ok(None) => {
                    debug!(?tx_hash, "Still waiting for transaction to be mined");
                }
                Err(e) if e.to_string().contains("not found") => {
                    not_found_attempts += 1;
                    warn!(?tx_hash, not_found_attempts, "Transaction not found, retrying");
                    if not_found_attempts >= self.policy.max_not_found {
                        return Err(ChainClientError::ReceiptNotFound {
                            tx_hash: format!("{tx_hash:?}"),
                            attempts: not_found_attempts,
                        });
                    }
                }
                Err(e) => return Err(ChainClientError::Provider(e.to_string())),
            }

            if started.elapsed() > self.policy.receipt_timeout {
                return Err(ChainClientError::ReceiptTimeout {
                    tx_hash: format!("{tx_hash:?}"),
                    timeout_secs: self.policy.receipt_timeout.as_secs(),
                });
            }
            sleep(self.policy.poll_interval).await;
        }
    }
}
