use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::U256;
use eyre::{Result, WrapErr};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use roda_base::airtable::{
    fields, publishable_payments_formula, AirtableClient, ListQuery, Record,
};
use roda_base::{Agent, AgentOutcome, CoreMetrics};
use roda_core::utils::validate_date;
use roda_core::Payment;

use crate::settings::PublisherSettings;
use crate::{flag_is_set, open_chain_session, Budget, ChainSession, DEFAULT_TIMEOUT_SECS};

const PAYMENTS_TABLE: &str = "Pagos";
const PAYMENTS_VIEW: &str = "PAYMENT_TO_CELO_PIPELINE_VIEW";

#[derive(Debug, Deserialize)]
struct PaymentFields {
    #[serde(rename = "ID Pagos", deserialize_with = "fields::u64_lenient")]
    payment_id: u64,
    #[serde(rename = "ID Credito Nocode", deserialize_with = "fields::u64_lenient")]
    credit_id: u64,
    #[serde(rename = "Fecha de pago")]
    payment_date: String,
    #[serde(rename = "MONTO", deserialize_with = "fields::u64_lenient")]
    amount: u64,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// The PaymentPublisher stage: record every publishable payment against
/// its on-chain credit.
pub struct PaymentPublisher {
    settings: PublisherSettings,
    metrics: Arc<CoreMetrics>,
    budget: Duration,
}

#[async_trait]
impl Agent for PaymentPublisher {
    const AGENT_NAME: &'static str = "payment-publisher";

    type Settings = PublisherSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self> {
        let budget = match &settings.timeout {
            Some(t) => Duration::from_secs(t.parse().wrap_err("invalid timeout setting")?),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        Ok(Self {
            settings,
            metrics,
            budget,
        })
    }

    async fn run(self) -> Result<AgentOutcome> {
        let store = self.settings.object_store()?;
        let airtable = self.settings.airtable(&store).await?;
        let flag_field = self.settings.environment.published_flag_field();
        let credit_flag_field = self.settings.environment.credit_published_flag_field();

        info!(view = PAYMENTS_VIEW, "Fetching publishable payments");
        let records: Vec<Record<PaymentFields>> = airtable
            .list(
                PAYMENTS_TABLE,
                ListQuery {
                    view: PAYMENTS_VIEW,
                    fields: &[
                        "ID Pagos",
                        "ID Credito Nocode",
                        "Fecha de pago",
                        "MONTO",
                        flag_field.as_str(),
                        credit_flag_field.as_str(),
                    ],
                    formula: Some(publishable_payments_formula(&flag_field, &credit_flag_field)),
                },
            )
            .await
            .wrap_err("fetching payments")?;
        if records.is_empty() {
            info!("No payments pending publication");
            return Ok(AgentOutcome::Complete);
        }

        let payments: Vec<(String, Payment)> = records
            .iter()
            .map(|r| {
                payment_from_fields(&r.fields, &flag_field, &credit_flag_field)
                    .map(|p| (r.id.clone(), p))
            })
            .collect::<Result<_>>()?;
        info!(count = payments.len(), "About to publish payments");

        let contract = self.settings.credit_contract(&store).await?;
        let mut session = open_chain_session(&self.settings, &store, &contract).await?;
        let budget = Budget::start(self.budget);

        let mut published = 0usize;
        for (index, (record_id, payment)) in payments.iter().enumerate() {
            if payment.published_flag {
                self.metrics.transactions("payment", "skipped").inc();
                continue;
            }
            // A payment can never precede its credit. The view formula
            // already excludes these; seeing one anyway means the store is
            // mid-update, so the rest of the batch cannot be trusted.
            if !payment.credit_published_flag {
                warn!(
                    payment_id = payment.payment_id,
                    credit_id = payment.credit_id,
                    "Parent credit not on chain yet, stopping the batch"
                );
                return Ok(AgentOutcome::Partial {
                    published,
                    pending: payments.len() - index,
                });
            }
            if budget.exhausted() {
                return Ok(AgentOutcome::Partial {
                    published,
                    pending: payments.len() - index,
                });
            }

            self.publish_one(&airtable, &mut session, record_id, payment, &flag_field)
                .await?;
            published += 1;
        }

        Ok(AgentOutcome::Complete)
    }
}

impl PaymentPublisher {
    /// Publish one payment, applying the per-kind revert policy: an
    /// arithmetic overflow is retried once with the amount clamped to the
    /// credit's outstanding balance, and a generic revert means the chain
    /// already accounted this payment.
    async fn publish_one(
        &self,
        airtable: &AirtableClient,
        session: &mut ChainSession,
        record_id: &str,
        payment: &Payment,
        flag_field: &str,
    ) -> Result<()> {
        let date_ts = payment
            .date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc()
            .timestamp();
        let call = session.ledger.record_payment(
            payment.credit_id,
            payment.payment_id,
            U256::from(payment.amount),
            date_ts,
        )?;

        info!(
            payment_id = payment.payment_id,
            credit_id = payment.credit_id,
            nonce = session.sender.next_nonce(),
            "Publishing payment"
        );
        match session.sender.submit(call).await {
            Ok(_) => {
                self.mark_published(airtable, record_id, flag_field).await?;
                self.metrics.transactions("payment", "confirmed").inc();
                Ok(())
            }
            Err(e) if e.is_already_recorded() => {
                info!(payment_id = payment.payment_id, "Payment already on chain");
                self.mark_published(airtable, record_id, flag_field).await?;
                self.metrics.transactions("payment", "already_recorded").inc();
                Ok(())
            }
            Err(roda_celo::ChainClientError::ArithmeticOverflow(_)) => {
                // The amount exceeds what is left on the credit; pay the
                // outstanding balance instead. One corrective retry only.
                let outstanding = session.ledger.outstanding_balance(payment.credit_id).await?;
                warn!(
                    payment_id = payment.payment_id,
                    credit_id = payment.credit_id,
                    %outstanding,
                    "Overflow revert, clamping amount to the outstanding balance"
                );
                let retry = session.ledger.record_payment(
                    payment.credit_id,
                    payment.payment_id,
                    outstanding,
                    date_ts,
                )?;
                session
                    .sender
                    .submit(retry)
                    .await
                    .wrap_err("publishing payment clamped to the outstanding balance")?;
                self.mark_published(airtable, record_id, flag_field).await?;
                self.metrics.transactions("payment", "clamped").inc();
                Ok(())
            }
            Err(roda_celo::ChainClientError::Reverted(reason)) => {
                // A plain revert on a payment means the contract already
                // accounted it under a prior transaction.
                info!(
                    payment_id = payment.payment_id,
                    reason, "Payment revert treated as already accounted"
                );
                self.mark_published(airtable, record_id, flag_field).await?;
                self.metrics.transactions("payment", "already_recorded").inc();
                Ok(())
            }
            Err(e) => {
                warn!(payment_id = payment.payment_id, error = %e, "Payment publication failed");
                Err(e).wrap_err("publishing payment")
            }
        }
    }

    async fn mark_published(
        &self,
        airtable: &AirtableClient,
        record_id: &str,
        flag_field: &str,
    ) -> Result<()> {
        airtable
            .update(PAYMENTS_TABLE, record_id, &json!({ flag_field: true }))
            .await
            .wrap_err("setting the published flag")
    }
}

/// Coerce one view row into the domain payment.
fn payment_from_fields(
    fields: &PaymentFields,
    flag_field: &str,
    credit_flag_field: &str,
) -> Result<Payment> {
    let date = validate_date(&fields.payment_date)
        .wrap_err_with(|| format!("unparseable payment date {:?}", fields.payment_date))?;
    Ok(Payment {
        payment_id: fields.payment_id,
        credit_id: fields.credit_id,
        date,
        amount: fields.amount as i64,
        published_flag: flag_is_set(&fields.extra, flag_field),
        credit_published_flag: flag_is_set(&fields.extra, credit_flag_field),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payments_coerce_from_view_rows() {
        let fields: PaymentFields = serde_json::from_value(serde_json::json!({
            "ID Pagos": "5501",
            "ID Credito Nocode": 321,
            "Fecha de pago": "2024-02-20",
            "MONTO": 150000,
            "PublishedToCeloStaging": false,
            "CreditPublishedToCeloStaging": true,
        }))
        .unwrap();
        let payment = payment_from_fields(
            &fields,
            "PublishedToCeloStaging",
            "CreditPublishedToCeloStaging",
        )
        .unwrap();
        assert_eq!(payment.payment_id, 5501);
        assert_eq!(payment.credit_id, 321);
        assert_eq!(payment.amount, 150_000);
        assert!(!payment.published_flag);
        assert!(payment.credit_published_flag);
    }
}
