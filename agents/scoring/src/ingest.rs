use std::collections::HashMap;

use chrono::NaiveDate;
use eyre::{Result, WrapErr};
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, info};

use roda_base::airtable::{fields, AirtableClient, ListQuery, Record};
use roda_core::{ClientStatus, Contact, Credit, CreditStatus};

pub(crate) const CONTACTS_TABLE: &str = "Contactos";
pub(crate) const CREDITS_TABLE: &str = "Creditos";
pub(crate) const SCORING_VIEW: &str = "Scoring_View";

/// How the disbursement date is spelled in the credits table.
const ISSUANCE_DATE_FORMAT: &str = "%d/%m/%Y";
/// Sentinel in the lost/not-lost classification column.
const LOST_CLASSIFICATION: &str = "Perdido";

#[derive(Debug, Deserialize)]
pub(crate) struct CreditRow {
    #[serde(rename = "ID CRÉDITO", deserialize_with = "fields::u64_lenient")]
    pub credit_id: u64,
    #[serde(rename = "ESTADO", default)]
    pub status: Option<String>,
    #[serde(
        rename = "ID Cliente nocode",
        default,
        deserialize_with = "fields::opt_u64_lenient"
    )]
    pub client_id: Option<u64>,
    #[serde(rename = "Clasificación perdidos/no perdidos", default)]
    pub lost_classification: Option<String>,
    #[serde(
        rename = "Días mora/atraso promedio",
        default,
        deserialize_with = "fields::opt_f64_lenient"
    )]
    pub avg_delay_days: Option<f64>,
    #[serde(
        rename = "Días mora/atraso acumulados",
        default,
        deserialize_with = "fields::opt_f64_lenient"
    )]
    pub cumulative_delay_days: Option<f64>,
    #[serde(
        rename = "# Acuerdos FECHA cumplido copy",
        default,
        deserialize_with = "fields::opt_u64_lenient"
    )]
    pub fulfilled_agreements: Option<u64>,
    #[serde(
        rename = "Cantidad acuerdos",
        default,
        deserialize_with = "fields::opt_u64_lenient"
    )]
    pub total_agreements: Option<u64>,
    #[serde(
        rename = "Días de atraso",
        default,
        deserialize_with = "fields::opt_f64_lenient"
    )]
    pub current_delay_days: Option<f64>,
    #[serde(rename = "Fecha desembolso", default)]
    pub issuance_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactRow {
    #[serde(rename = "ID CLIENTE", deserialize_with = "fields::u64_lenient")]
    pub client_id: u64,
    #[serde(rename = "Status", default)]
    pub status: Option<ClientStatus>,
    #[serde(rename = "ID's Créditos", default)]
    pub credit_links: Option<serde_json::Value>,
    #[serde(
        rename = "Promedio monto créditos",
        default,
        deserialize_with = "fields::opt_f64_lenient"
    )]
    pub avg_credit_amount: Option<f64>,
    #[serde(
        rename = "Numero de creditos REAL",
        default,
        deserialize_with = "fields::opt_u64_lenient"
    )]
    pub real_credit_count: Option<u64>,
    #[serde(
        rename = "ID Referidor Nocode",
        default,
        deserialize_with = "fields::opt_u64_lenient"
    )]
    pub referrer_id: Option<u64>,
}

/// Everything the scoring engine consumes: the scorable contacts and each
/// client's surviving credits, issuance-date ascending.
pub struct ScoringInputs {
    /// Contacts that participate in scoring
    pub contacts: Vec<Contact>,
    /// Surviving credits per client, oldest first
    pub credits_by_client: HashMap<u64, Vec<Credit>>,
}

/// Fetch both scoring views and assemble the engine inputs.
pub async fn fetch_scoring_inputs(airtable: &AirtableClient) -> Result<ScoringInputs> {
    info!(view = SCORING_VIEW, "Fetching credits");
    let credits: Vec<Record<CreditRow>> = airtable
        .list(
            CREDITS_TABLE,
            ListQuery {
                view: SCORING_VIEW,
                fields: &[
                    "ID CRÉDITO",
                    "ESTADO",
                    "ID Cliente nocode",
                    "Clasificación perdidos/no perdidos",
                    "Días mora/atraso promedio",
                    "Días mora/atraso acumulados",
                    "# Acuerdos FECHA cumplido copy",
                    "Cantidad acuerdos",
                    "Días de atraso",
                    "Fecha desembolso",
                ],
                formula: None,
            },
        )
        .await
        .wrap_err("fetching credits")?;

    info!(view = SCORING_VIEW, "Fetching contacts");
    let contacts: Vec<Record<ContactRow>> = airtable
        .list(
            CONTACTS_TABLE,
            ListQuery {
                view: SCORING_VIEW,
                fields: &[
                    "ID CLIENTE",
                    "Status",
                    "ID's Créditos",
                    "Promedio monto créditos",
                    "Numero de creditos REAL",
                    "ID Referidor Nocode",
                ],
                formula: None,
            },
        )
        .await
        .wrap_err("fetching contacts")?;

    build_inputs(
        credits.into_iter().map(|r| r.fields).collect(),
        contacts.into_iter().map(|r| r.fields).collect(),
    )
}

/// Assemble and filter the rows: credits keep only repaid or in-repayment
/// states with a parseable issuance date; contacts keep only scorable
/// statuses with at least one credit link. A self-referral aborts.
pub(crate) fn build_inputs(
    credit_rows: Vec<CreditRow>,
    contact_rows: Vec<ContactRow>,
) -> Result<ScoringInputs> {
    let mut credits_by_client: HashMap<u64, Vec<Credit>> = HashMap::new();
    let mut skipped_credits = 0usize;
    for row in credit_rows {
        match credit_from_row(row) {
            Some(credit) => credits_by_client
                .entry(credit.client_id)
                .or_default()
                .push(credit),
            None => skipped_credits += 1,
        }
    }
    for credits in credits_by_client.values_mut() {
        credits.sort_by_key(|c| c.issuance_date);
    }

    let contacts: Vec<Contact> = contact_rows
        .into_iter()
        .filter(|row| {
            row.status.unwrap_or(ClientStatus::Unknown).is_scorable()
                && row
                    .credit_links
                    .as_ref()
                    .is_some_and(|v| !v.is_null())
        })
        .map(contact_from_row)
        .collect();
    for contact in &contacts {
        contact.check_referrer()?;
    }

    let unique: usize = contacts.iter().map(|c| c.client_id).unique().count();
    debug!(
        contacts = contacts.len(),
        unique_clients = unique,
        credit_holders = credits_by_client.len(),
        skipped_credits,
        "Assembled scoring inputs"
    );
    Ok(ScoringInputs {
        contacts,
        credits_by_client,
    })
}

/// Coerce one credit row; `None` drops it (wrong state, no client, or no
/// usable issuance date).
fn credit_from_row(row: CreditRow) -> Option<Credit> {
    let status: CreditStatus =
        serde_json::from_value(serde_json::Value::String(row.status?)).ok()?;
    if !matches!(status, CreditStatus::Paid | CreditStatus::Pending) {
        return None;
    }
    let client_id = row.client_id?;
    let issuance_date =
        NaiveDate::parse_from_str(row.issuance_date.as_deref()?, ISSUANCE_DATE_FORMAT).ok()?;

    Some(Credit {
        credit_id: row.credit_id,
        client_id,
        status,
        principal: None,
        total_repayment: None,
        issuance_date,
        term_days: None,
        avg_delay_days: row.avg_delay_days,
        cumulative_delay_days: row.cumulative_delay_days,
        current_delay_days: row.current_delay_days,
        fulfilled_agreements: row.fulfilled_agreements.map(|v| v as u32),
        total_agreements: row.total_agreements.map(|v| v as u32),
        lost_flag: row.lost_classification.as_deref() == Some(LOST_CLASSIFICATION),
        published_flag: false,
    })
}

fn contact_from_row(row: ContactRow) -> Contact {
    Contact {
        client_id: row.client_id,
        status: row.status.unwrap_or(ClientStatus::Unknown),
        gps_ids: Vec::new(),
        celo_address: None,
        referrer_id: row.referrer_id,
        avg_credit_amount: row.avg_credit_amount,
        real_credit_count: row.real_credit_count.map(|v| v as u32),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn credit_row(id: u64, client: u64, status: &str, date: &str) -> CreditRow {
        CreditRow {
            credit_id: id,
            status: Some(status.to_owned()),
            client_id: Some(client),
            lost_classification: None,
            avg_delay_days: Some(0.0),
            cumulative_delay_days: Some(0.0),
            fulfilled_agreements: None,
            total_agreements: None,
            current_delay_days: None,
            issuance_date: Some(date.to_owned()),
        }
    }

    fn contact_row(id: u64, status: ClientStatus) -> ContactRow {
        ContactRow {
            client_id: id,
            status: Some(status),
            credit_links: Some(serde_json::json!(["recX"])),
            avg_credit_amount: Some(100_000.0),
            real_credit_count: Some(1),
            referrer_id: None,
        }
    }

    #[test]
    fn credits_filter_to_repaid_and_in_repayment_states() {
        let rows = vec![
            credit_row(1, 10, "PAGADO", "05/01/2023"),
            credit_row(2, 10, "EN PROCESO", "20/03/2023"),
            credit_row(3, 10, "RECHAZADO", "01/04/2023"),
            credit_row(4, 10, "NUEVO ESTADO", "01/04/2023"),
        ];
        let inputs = build_inputs(rows, vec![contact_row(10, ClientStatus::Active)]).unwrap();
        let credits = &inputs.credits_by_client[&10];
        assert_eq!(credits.len(), 2);
        // Oldest first.
        assert_eq!(credits[0].credit_id, 1);
        assert_eq!(credits[1].status, CreditStatus::Pending);
    }

    #[test]
    fn unscorable_contacts_are_filtered() {
        let contacts = vec![
            contact_row(1, ClientStatus::Active),
            contact_row(2, ClientStatus::Started),
            contact_row(3, ClientStatus::Rejected),
            contact_row(4, ClientStatus::Inactive),
        ];
        let inputs = build_inputs(vec![], contacts).unwrap();
        assert_eq!(inputs.contacts.len(), 1);
        assert_eq!(inputs.contacts[0].client_id, 1);
    }

    #[test]
    fn contacts_without_credit_links_are_filtered() {
        let mut row = contact_row(1, ClientStatus::Active);
        row.credit_links = None;
        let inputs = build_inputs(vec![], vec![row]).unwrap();
        assert!(inputs.contacts.is_empty());
    }

    #[test]
    fn self_referral_aborts_the_run() {
        let mut row = contact_row(1, ClientStatus::Active);
        row.referrer_id = Some(1);
        assert!(build_inputs(vec![], vec![row]).is_err());
    }

    #[test]
    fn lost_classification_sets_the_flag() {
        let mut row = credit_row(1, 10, "EN PROCESO", "05/01/2023");
        row.lost_classification = Some("Perdido".to_owned());
        let inputs = build_inputs(vec![row], vec![contact_row(10, ClientStatus::Active)]).unwrap();
        assert!(inputs.credits_by_client[&10][0].lost_flag);
    }
}
