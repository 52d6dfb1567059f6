use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::Address;
use eyre::{Result, WrapErr};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use roda_base::airtable::{fields, not_published_formula, AirtableClient, ListQuery, Record};
use roda_base::{Agent, AgentOutcome, CoreMetrics};
use roda_celo::{derive_address, format_address};
use roda_core::utils::to_unix_timestamp;

use crate::settings::PublisherSettings;
use crate::{flag_is_set, open_chain_session, Budget, ChainSession, DEFAULT_TIMEOUT_SECS};

const CREDITS_TABLE: &str = "Creditos";
const CONTACTS_TABLE: &str = "Contactos";
const CREDITS_VIEW: &str = "CREDIT_TO_CELO_PIPELINE_VIEW";
const ADDRESS_FIELD: &str = "Celo Address";

#[derive(Debug, Deserialize)]
struct CreditFields {
    #[serde(rename = "ID CRÉDITO", deserialize_with = "fields::u64_lenient")]
    credit_id: u64,
    #[serde(rename = "ID Cliente", default, deserialize_with = "fields::first_lenient")]
    client_record_id: Option<String>,
    #[serde(
        rename = "ID Cliente nocode",
        default,
        deserialize_with = "fields::opt_u64_lenient"
    )]
    client_id: Option<u64>,
    #[serde(rename = "Inversión", default, deserialize_with = "fields::opt_u64_lenient")]
    principal: Option<u64>,
    #[serde(
        rename = "Deuda Inicial SUMA",
        default,
        deserialize_with = "fields::opt_u64_lenient"
    )]
    total_repayment: Option<u64>,
    #[serde(rename = "Fecha desembolso corregida", default)]
    disbursement_date: Option<String>,
    #[serde(rename = "¿Tiempo para el pago del crédito?", default)]
    repayment_term: Option<String>,
    #[serde(
        rename = "ClientCeloAddress",
        default,
        deserialize_with = "fields::first_lenient"
    )]
    client_celo_address: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// The CreditPublisher stage: issue every non-published credit as an NFT
/// and flip its published flag.
pub struct CreditPublisher {
    settings: PublisherSettings,
    metrics: Arc<CoreMetrics>,
    budget: Duration,
}

#[async_trait]
impl Agent for CreditPublisher {
    const AGENT_NAME: &'static str = "credit-publisher";

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

        info!(view = CREDITS_VIEW, "Fetching non-published credits");
        let credits: Vec<Record<CreditFields>> = airtable
            .list(
                CREDITS_TABLE,
                ListQuery {
                    view: CREDITS_VIEW,
                    fields: &[
                        "ID CRÉDITO",
                        "ID Cliente",
                        "ID Cliente nocode",
                        "Inversión",
                        "Deuda Inicial SUMA",
                        "Fecha desembolso corregida",
                        "¿Tiempo para el pago del crédito?",
                        "ClientCeloAddress",
                        flag_field.as_str(),
                    ],
                    formula: Some(not_published_formula(&flag_field)),
                },
            )
            .await
            .wrap_err("fetching credits")?;
        if credits.is_empty() {
            info!("No credits pending publication");
            return Ok(AgentOutcome::Complete);
        }
        info!(count = credits.len(), "About to publish credits");

        let contract = self.settings.credit_contract(&store).await?;
        let mut session = open_chain_session(&self.settings, &store, &contract).await?;
        let budget = Budget::start(self.budget);

        let mut published = 0usize;
        for (index, credit) in credits.iter().enumerate() {
            if flag_is_set(&credit.fields.extra, &flag_field) {
                info!(
                    credit_id = credit.fields.credit_id,
                    "Credit already published, skipping"
                );
                self.metrics.transactions("credit", "skipped").inc();
                continue;
            }
            if budget.exhausted() {
                return Ok(AgentOutcome::Partial {
                    published,
                    pending: credits.len() - index,
                });
            }

            let to = self
                .resolve_client_address(&airtable, &session, credit)
                .await?;
            let call = build_issue_call(&session, credit, to)?;

            info!(
                credit_id = credit.fields.credit_id,
                nonce = session.sender.next_nonce(),
                "Publishing credit"
            );
            match session.sender.submit(call).await {
                Ok(_) => {
                    self.mark_published(&airtable, &credit.id, &flag_field).await?;
                    self.metrics.transactions("credit", "confirmed").inc();
                    published += 1;
                }
                Err(e) if e.is_already_recorded() => {
                    info!(
                        credit_id = credit.fields.credit_id,
                        "Token already minted, marking as published"
                    );
                    self.mark_published(&airtable, &credit.id, &flag_field).await?;
                    self.metrics.transactions("credit", "already_minted").inc();
                    published += 1;
                }
                Err(e) => {
                    warn!(credit_id = credit.fields.credit_id, error = %e, "Credit publication failed");
                    return Err(e).wrap_err("publishing credit");
                }
            }
        }

        Ok(AgentOutcome::Complete)
    }
}

impl CreditPublisher {
    /// The destination address for a credit: the client's stored address,
    /// or one derived from the mnemonic at the client id and persisted back
    /// to the contact before first use.
    async fn resolve_client_address(
        &self,
        airtable: &AirtableClient,
        session: &ChainSession,
        credit: &Record<CreditFields>,
    ) -> Result<Address> {
        if let Some(address) = credit
            .fields
            .client_celo_address
            .as_deref()
            .filter(|a| !a.is_empty())
        {
            return address
                .parse()
                .wrap_err_with(|| format!("credit {} has a malformed address", credit.fields.credit_id));
        }

        let client_id = credit.fields.client_id.ok_or_else(|| {
            eyre::eyre!(
                "credit {} has neither an address nor a client id",
                credit.fields.credit_id
            )
        })?;
        let index: u32 = client_id
            .try_into()
            .wrap_err("client id exceeds the derivation index range")?;
        let minted = derive_address(&session.mnemonic, index)?;

        let record_id = credit.fields.client_record_id.as_deref().ok_or_else(|| {
            eyre::eyre!(
                "credit {} has no linked contact to persist the minted address",
                credit.fields.credit_id
            )
        })?;
        airtable
            .update(
                CONTACTS_TABLE,
                record_id,
                &json!({ ADDRESS_FIELD: format_address(minted) }),
            )
            .await
            .wrap_err("persisting minted client address")?;
        info!(client_id, address = %format_address(minted), "Minted client address");
        Ok(minted)
    }

    async fn mark_published(
        &self,
        airtable: &AirtableClient,
        record_id: &str,
        flag_field: &str,
    ) -> Result<()> {
        airtable
            .update(CREDITS_TABLE, record_id, &json!({ flag_field: true }))
            .await
            .wrap_err("setting the published flag")
    }
}

/// Build the `issueCredit` call from one pending record. A record missing a
/// required column is an upstream data defect and fails the batch.
fn build_issue_call(
    session: &ChainSession,
    credit: &Record<CreditFields>,
    to: Address,
) -> Result<ethers::contract::ContractCall<roda_celo::CeloProvider, ()>> {
    let f = &credit.fields;
    let principal = f
        .principal
        .ok_or_else(|| eyre::eyre!("credit {} has no principal", f.credit_id))?;
    let total_repayment = f
        .total_repayment
        .ok_or_else(|| eyre::eyre!("credit {} has no total repayment", f.credit_id))?;
    let disbursement = f
        .disbursement_date
        .as_deref()
        .ok_or_else(|| eyre::eyre!("credit {} has no disbursement date", f.credit_id))?;
    let term = f
        .repayment_term
        .as_deref()
        .ok_or_else(|| eyre::eyre!("credit {} has no repayment term", f.credit_id))?;

    session.ledger.issue_credit(
        to,
        f.credit_id,
        principal as i64,
        total_repayment as i64,
        parse_disbursement_timestamp(disbursement)?,
        parse_term_days(term)?,
    )
}

/// Disbursement dates arrive as ISO datetimes, sometimes with a trailing
/// `Z`, occasionally as a bare date.
fn parse_disbursement_timestamp(raw: &str) -> Result<i64> {
    let trimmed = raw.strip_suffix('Z').unwrap_or(raw);
    to_unix_timestamp(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| to_unix_timestamp(trimmed, "%Y-%m-%d"))
        .wrap_err_with(|| format!("unparseable disbursement date {raw:?}"))
}

/// The repayment term column is free text like `45 días (6 semanas)`; the
/// leading integer is the term in days.
fn parse_term_days(raw: &str) -> Result<u32> {
    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits
        .parse()
        .wrap_err_with(|| format!("no day count found in repayment term {raw:?}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn term_days_take_the_leading_integer() {
        assert_eq!(parse_term_days("45 días (6 semanas)").unwrap(), 45);
        assert_eq!(parse_term_days("90 días").unwrap(), 90);
        assert!(parse_term_days("sin plazo").is_err());
    }

    #[test]
    fn disbursement_dates_parse_with_and_without_time() {
        assert_eq!(
            parse_disbursement_timestamp("1970-01-02T00:00:00.000Z").unwrap(),
            86_400
        );
        assert_eq!(parse_disbursement_timestamp("1970-01-02").unwrap(), 86_400);
        assert!(parse_disbursement_timestamp("02/01/1970?").is_err());
    }
}
