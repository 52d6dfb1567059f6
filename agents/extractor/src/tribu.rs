use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use roda_base::settings::TribuCredentials;
use roda_core::utils::format_dashed_date;

/// The Tribu controller endpoint. Login and data retrieval are both
/// form-encoded POSTs against this single URL, dispatched by the `tipo` and
/// `funcion` form fields.
pub const TRIBU_URL: &str = "https://tribugps.com/controlador.php";

/// Errors from the fleet API.
#[derive(Debug, Error)]
pub enum TribuError {
    /// Transport failure
    #[error("tribu request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success HTTP status
    #[error("tribu returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// Login succeeded but the token was missing from the payload
    #[error("login response carried no token")]
    MissingToken,
    /// The routes payload was not the expected array of rows
    #[error("unexpected routes payload shape")]
    BadPayload,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    body: Option<LoginBody>,
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    o_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    body: Option<Value>,
}

/// Minimal client for the fleet-tracking API.
#[derive(Debug, Clone)]
pub struct TribuClient {
    http: reqwest::Client,
    url: String,
}

impl Default for TribuClient {
    fn default() -> Self {
        Self::new(TRIBU_URL.to_owned())
    }
}

impl TribuClient {
    /// Client against the given endpoint (overridable for tests).
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    /// Authenticate and return the bearer token.
    pub async fn login(&self, credentials: &TribuCredentials) -> Result<String, TribuError> {
        let form = [
            ("tipo", "usuario"),
            ("funcion", "login"),
            ("user", credentials.user.as_str()),
            ("password", credentials.password.as_str()),
            ("isAdmin", "true"),
        ];
        let response = self.http.post(self.url.as_str()).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(TribuError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let payload: LoginResponse = response.json().await?;
        let token = payload
            .body
            .and_then(|b| b.o_token)
            .ok_or(TribuError::MissingToken)?;
        info!("Logged in to the tribu api");
        Ok(token)
    }

    /// Fetch the raw route rows for one day. Rows come back as loosely
    /// typed objects; the transformer owns all coercion.
    pub async fn routes(
        &self,
        token: &str,
        date: NaiveDate,
    ) -> Result<Vec<Map<String, Value>>, TribuError> {
        let dashed = format_dashed_date(date);
        let form = [
            ("tipo", "ruta"),
            ("funcion", "verRutasSubAdmin"),
            ("d_fechaIni", dashed.as_str()),
            ("d_fechaFin", dashed.as_str()),
        ];
        let response = self
            .http
            .post(self.url.as_str())
            .form(&form)
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TribuError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let payload: RoutesResponse = response.json().await?;
        match payload.body {
            Some(Value::Array(rows)) => rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(map) => Ok(map),
                    _ => Err(TribuError::BadPayload),
                })
                .collect(),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(TribuError::BadPayload),
        }
    }
}

/// Render the raw rows as headered CSV. Headers are the union of the first
/// row's keys, in their stored order; every value is rendered the way the
/// API sent it.
pub fn rows_to_csv(rows: &[Map<String, Value>]) -> eyre::Result<Vec<u8>> {
    let first = rows
        .first()
        .ok_or_else(|| eyre::eyre!("no rows to serialize"))?;
    let headers: Vec<&String> = first.keys().collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(headers.iter().map(|h| h.as_str()))?;
    for row in rows {
        let record: Vec<String> = headers.iter().map(|h| cell_text(row.get(*h))).collect();
        writer.write_record(&record)?;
    }
    Ok(writer.into_inner()?)
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(v) => v.to_string(),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn rows_serialize_with_headers_from_the_first_row() {
        let rows: Vec<Map<String, Value>> = vec![
            serde_json::from_value(json!({
                "k_dispositivo": "GPS001",
                "f_distancia": 1234.5,
                "o_fecha_inicial": "2024-01-15 08:00:00",
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "k_dispositivo": "GPS002",
                "f_distancia": 90,
                "o_fecha_inicial": null,
            }))
            .unwrap(),
        ];

        let csv = String::from_utf8(rows_to_csv(&rows).unwrap()).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("k_dispositivo"));
        assert!(header.contains("f_distancia"));
        assert_eq!(lines.count(), 2);
        assert!(csv.contains("GPS002"));
    }

    #[test]
    fn empty_extract_is_an_error() {
        assert!(rows_to_csv(&[]).is_err());
    }
}
