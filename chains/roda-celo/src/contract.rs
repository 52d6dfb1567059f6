use std::sync::Arc;

use ethers::abi::Abi;
use ethers::contract::{Contract, ContractCall, ContractError};
use ethers::types::{Address, U256};
use eyre::{Result, WrapErr};

use crate::provider::CeloProvider;
use crate::ChainClientError;

/// Dynamic bindings for the Roda contracts.
///
/// The ABI is deployment configuration, stored next to the contract address
/// in the credentials area of the object store, so the bindings are built at
/// runtime instead of with `abigen!`. Every mutating method is idempotent on
/// chain by its id argument (ERC-721 uniqueness for routes and credits, a
/// payment-id check for payments).
#[derive(Debug, Clone)]
pub struct RodaLedger {
    contract: Contract<CeloProvider>,
}

impl RodaLedger {
    /// Bind the contract at `address` with the given ABI JSON.
    pub fn new(
        address: Address,
        abi: &serde_json::Value,
        provider: Arc<CeloProvider>,
    ) -> Result<Self> {
        let abi: Abi =
            serde_json::from_value(abi.clone()).wrap_err("parsing contract ABI")?;
        Ok(Self {
            contract: Contract::new(address, abi, provider),
        })
    }

    /// The bound contract address.
    pub fn address(&self) -> Address {
        self.contract.address()
    }

    /// `recordRoute(to, routeId, _timestampStart, _timestampEnd, _distance)`
    pub fn record_route(
        &self,
        to: Address,
        route_id: u64,
        timestamp_start: i64,
        timestamp_end: i64,
        distance: i64,
    ) -> Result<ContractCall<CeloProvider, ()>> {
        self.contract
            .method(
                "recordRoute",
                (
                    to,
                    U256::from(route_id),
                    U256::from(timestamp_start),
                    U256::from(timestamp_end),
                    U256::from(distance),
                ),
            )
            .wrap_err("binding recordRoute")
    }

    /// `issueCredit(to, creditId, _principal, totalRepaymentAmount,
    /// _issuanceDate, _creditTerm)`
    #[allow(clippy::too_many_arguments)]
    pub fn issue_credit(
        &self,
        to: Address,
        credit_id: u64,
        principal: i64,
        total_repayment: i64,
        issuance_date: i64,
        credit_term_days: u32,
    ) -> Result<ContractCall<CeloProvider, ()>> {
        self.contract
            .method(
                "issueCredit",
                (
                    to,
                    U256::from(credit_id),
                    U256::from(principal),
                    U256::from(total_repayment),
                    U256::from(issuance_date),
                    U256::from(credit_term_days),
                ),
            )
            .wrap_err("binding issueCredit")
    }

    /// `recordPayment(creditId, paymentId, paymentAmount, paymentDate)`
    pub fn record_payment(
        &self,
        credit_id: u64,
        payment_id: u64,
        amount: U256,
        payment_date: i64,
    ) -> Result<ContractCall<CeloProvider, ()>> {
        self.contract
            .method(
                "recordPayment",
                (
                    U256::from(credit_id),
                    U256::from(payment_id),
                    amount,
                    U256::from(payment_date),
                ),
            )
            .wrap_err("binding recordPayment")
    }

    /// Read the outstanding balance of a credit. Used to clamp a payment
    /// that reverted with an arithmetic overflow.
    pub async fn outstanding_balance(&self, credit_id: u64) -> Result<U256, ChainClientError> {
        let call: ContractCall<CeloProvider, U256> = self
            .contract
            .method("outstandingBalance", U256::from(credit_id))
            .map_err(|e| ChainClientError::Provider(e.to_string()))?;
        call.call().await.map_err(contract_error)
    }
}

fn contract_error(e: ContractError<CeloProvider>) -> ChainClientError {
    ChainClientError::classify(e.to_string())
}
