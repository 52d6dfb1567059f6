//! Typed REST adapter for the relational (Airtable) store.
//!
//! Every table access in the pipeline goes through a view with a field
//! projection; callers describe the rows they expect with a serde struct.
//! The store's quirks stay at this boundary: string sentinels
//! (`"VERDADERO"`/`"FALSO"`) become `bool`, `{"specialValue": ...}` error
//! cells become `None`, and linked-record arrays collapse to their first
//! element. Domain code only ever sees clean values.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

const API_ROOT: &str = "https://api.airtable.com/v0/";
const MAX_ATTEMPTS: u32 = 4;
const BASE_BACKOFF_MS: u64 = 1_000;
const BATCH_CHUNK: usize = 10;

/// Errors from the relational-store adapter.
#[derive(Debug, Error)]
pub enum AirtableError {
    /// Transport-level failure that survived every retry.
    #[error("airtable request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success status that is not retryable (or retries ran out).
    #[error("airtable returned {status} for {url}: {body}")]
    Status {
        /// HTTP status
        status: StatusCode,
        /// Request URL
        url: String,
        /// Response body, for diagnosis
        body: String,
    },
    /// The response did not match the expected row shape.
    #[error("decoding airtable response: {0}")]
    Decode(#[source] serde_json::Error),
    /// Bad base URL or query construction.
    #[error("building airtable request: {0}")]
    Request(String),
}

/// One record of a table, with its opaque record id and typed fields.
#[derive(Debug, Clone, Deserialize)]
pub struct Record<F> {
    /// Airtable record id (`rec...`), needed for updates
    pub id: String,
    /// The projected fields
    pub fields: F,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    records: Vec<serde_json::Value>,
    offset: Option<String>,
}

/// Parameters of a view listing.
#[derive(Debug, Clone, Default)]
pub struct ListQuery<'a> {
    /// The view to read through; empty reads the whole table
    pub view: &'a str,
    /// Field projection; empty means all fields
    pub fields: &'a [&'a str],
    /// Optional `filterByFormula` expression
    pub formula: Option<String>,
}

/// Client for one Airtable base.
#[derive(Debug, Clone)]
pub struct AirtableClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl AirtableClient {
    /// Client over the given base.
    pub fn new(base_id: String, token: String) -> Result<Self, AirtableError> {
        let base_url = Url::parse(API_ROOT)
            .and_then(|u| u.join(&format!("{base_id}/")))
            .map_err(|e| AirtableError::Request(e.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        })
    }

    /// List all records of a table through a view, following pagination to
    /// the end.
    pub async fn list<F>(
        &self,
        table: &str,
        query: ListQuery<'_>,
    ) -> Result<Vec<Record<F>>, AirtableError>
    where
        F: DeserializeOwned,
    {
        let url = self.table_url(table)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            if !query.view.is_empty() {
                params.push(("view", query.view.to_owned()));
            }
            for field in query.fields {
                params.push(("fields[]", (*field).to_owned()));
            }
            if let Some(formula) = &query.formula {
                params.push(("filterByFormula", formula.clone()));
            }
            if let Some(o) = &offset {
                params.push(("offset", o.clone()));
            }

            let page: RecordPage = self
                .execute(|| self.http.get(url.clone()).query(&params))
                .await?;
            for value in page.records {
                records.push(
                    serde_json::from_value::<Record<F>>(value).map_err(AirtableError::Decode)?,
                );
            }
            match page.offset {
                Some(o) => offset = Some(o),
                None => break,
            }
        }

        debug!(table, view = query.view, count = records.len(), "Fetched records");
        Ok(records)
    }

    /// Update the fields of one record.
    pub async fn update<F>(
        &self,
        table: &str,
        record_id: &str,
        fields: &F,
    ) -> Result<(), AirtableError>
    where
        F: Serialize + Sync,
    {
        let url = self
            .base_url
            .join(&format!("{table}/{record_id}"))
            .map_err(|e| AirtableError::Request(e.to_string()))?;
        let body = json!({ "fields": fields });
        let _: serde_json::Value = self
            .execute(|| self.http.patch(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    /// Update many records, chunked to the API's batch limit.
    pub async fn batch_update<F>(
        &self,
        table: &str,
        updates: &[(String, F)],
    ) -> Result<(), AirtableError>
    where
        F: Serialize + Sync,
    {
        let url = self.table_url(table)?;
        for chunk in updates.chunks(BATCH_CHUNK) {
            let body = json!({
                "records": chunk
                    .iter()
                    .map(|(id, fields)| json!({ "id": id, "fields": fields }))
                    .collect::<Vec<_>>(),
            });
            let _: serde_json::Value = self
                .execute(|| self.http.patch(url.clone()).json(&body))
                .await?;
        }
        Ok(())
    }

    fn table_url(&self, table: &str) -> Result<Url, AirtableError> {
        self.base_url
            .join(table)
            .map_err(|e| AirtableError::Request(e.to_string()))
    }

    /// Send a request, retrying 429s, 5xxs and transport errors with
    /// exponential backoff up to a bounded attempt count.
    async fn execute<T, B>(&self, build: B) -> Result<T, AirtableError>
    where
        T: DeserializeOwned,
        B: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = build().bearer_auth(&self.token).send().await;
            let retryable = match &result {
                Ok(resp) => {
                    let status = resp.status();
                    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
                }
                Err(_) => true,
            };

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<serde_json::Value>()
                        .await
                        .map_err(AirtableError::Transport)
                        .and_then(|v| serde_json::from_value(v).map_err(AirtableError::Decode));
                }
                Ok(resp) if !retryable => {
                    let status = resp.status();
                    let url = resp.url().to_string();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(AirtableError::Status { status, url, body });
                }
                Ok(resp) if attempt >= MAX_ATTEMPTS => {
                    let status = resp.status();
                    let url = resp.url().to_string();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(AirtableError::Status { status, url, body });
                }
                Err(e) if attempt >= MAX_ATTEMPTS => return Err(e.into()),
                _ => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1));
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, "Retrying airtable request");
                    sleep(backoff).await;
                }
            }
        }
    }
}

/// Escape a field name for use inside `filterByFormula`.
pub fn formula_field(name: &str) -> String {
    format!("{{{name}}}")
}

/// Formula selecting records not yet published for the given flag column.
pub fn not_published_formula(flag_field: &str) -> String {
    format!("NOT({})", formula_field(flag_field))
}

/// Formula selecting unpublished payments whose parent credit is on chain.
pub fn publishable_payments_formula(payment_flag: &str, credit_flag: &str) -> String {
    format!(
        "AND(NOT({}), {})",
        formula_field(payment_flag),
        formula_field(credit_flag)
    )
}

/// Serde helpers translating the store's cell quirks at the boundary.
pub mod fields {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawBool {
        Bool(bool),
        Text(String),
    }

    /// Checkbox or sentinel string to `bool`; absent and null cells are
    /// false. Use with `#[serde(default, deserialize_with = ...)]`.
    pub fn bool_lenient<'de, D>(d: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<RawBool>::deserialize(d)? {
            Some(RawBool::Bool(b)) => b,
            Some(RawBool::Text(s)) => matches!(
                s.trim().to_ascii_uppercase().as_str(),
                "VERDADERO" | "TRUE" | "SÍ" | "SI"
            ),
            None => false,
        })
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawNumber {
        Number(f64),
        Text(String),
        // Formula error cells arrive as {"specialValue": "NaN"} and the like.
        Other(serde_json::Value),
    }

    /// Number, numeric string, or error cell to `Option<f64>`.
    pub fn opt_f64_lenient<'de, D>(d: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<RawNumber>::deserialize(d)? {
            Some(RawNumber::Number(n)) => Some(n),
            Some(RawNumber::Text(s)) => s.trim().parse::<f64>().ok(),
            Some(RawNumber::Other(_)) | None => None,
        })
    }

    /// Number or numeric string to `Option<u64>`.
    pub fn opt_u64_lenient<'de, D>(d: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(opt_f64_lenient(d)?.and_then(|n| {
            if n.is_finite() && n >= 0.0 {
                Some(n as u64)
            } else {
                None
            }
        }))
    }

    /// Number or numeric string to `u64`, failing the row otherwise.
    pub fn u64_lenient<'de, D>(d: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        opt_u64_lenient(d)?.ok_or_else(|| serde::de::Error::custom("expected a numeric id"))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    /// Linked-record cell (a singleton array) or plain string to its first
    /// value.
    pub fn first_lenient<'de, D>(d: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<OneOrMany>::deserialize(d)? {
            Some(OneOrMany::One(s)) => Some(s),
            Some(OneOrMany::Many(v)) => v.into_iter().next(),
            None => None,
        })
    }

    #[cfg(test)]
    mod test {
        use serde::Deserialize;

        #[derive(Debug, Deserialize)]
        struct Row {
            #[serde(default, deserialize_with = "super::bool_lenient")]
            flag: bool,
            #[serde(default, deserialize_with = "super::opt_f64_lenient")]
            amount: Option<f64>,
            #[serde(default, deserialize_with = "super::first_lenient")]
            link: Option<String>,
        }

        #[test]
        fn sentinels_translate_to_booleans() {
            let row: Row = serde_json::from_str(r#"{"flag": "VERDADERO"}"#).unwrap();
            assert!(row.flag);
            let row: Row = serde_json::from_str(r#"{"flag": "FALSO"}"#).unwrap();
            assert!(!row.flag);
            let row: Row = serde_json::from_str(r#"{"flag": true}"#).unwrap();
            assert!(row.flag);
            let row: Row = serde_json::from_str(r#"{}"#).unwrap();
            assert!(!row.flag);
        }

        #[test]
        fn special_value_cells_become_none() {
            let row: Row =
                serde_json::from_str(r#"{"amount": {"specialValue": "NaN"}}"#).unwrap();
            assert_eq!(row.amount, None);
            let row: Row = serde_json::from_str(r#"{"amount": "230000"}"#).unwrap();
            assert_eq!(row.amount, Some(230000.0));
            let row: Row = serde_json::from_str(r#"{"amount": 42.5}"#).unwrap();
            assert_eq!(row.amount, Some(42.5));
        }

        #[test]
        fn linked_records_collapse_to_first() {
            let row: Row = serde_json::from_str(r#"{"link": ["recA", "recB"]}"#).unwrap();
            assert_eq!(row.link.as_deref(), Some("recA"));
            let row: Row = serde_json::from_str(r#"{"link": "recC"}"#).unwrap();
            assert_eq!(row.link.as_deref(), Some("recC"));
        }
    }
}
