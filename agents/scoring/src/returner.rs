use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use roda_base::airtable::{fields, ListQuery, Record};
use roda_base::{layout, store, Agent, AgentOutcome, CoreMetrics};
use roda_core::utils::{validate_date, yesterday_utc};

use crate::ingest::{CONTACTS_TABLE, SCORING_VIEW};
use crate::settings::ScoringSettings;
use crate::ScoreRow;

#[derive(Debug, Deserialize)]
struct ContactIdRow {
    #[serde(rename = "ID CLIENTE", deserialize_with = "fields::u64_lenient")]
    client_id: u64,
}

/// The ScoreReturn stage: write the day's adjusted scores back to the
/// contacts table. Surfaces every error; there are no partial writes worth
/// keeping.
pub struct ScoreReturn {
    settings: ScoringSettings,
    metrics: Arc<CoreMetrics>,
    date: chrono::NaiveDate,
}

#[async_trait]
impl Agent for ScoreReturn {
    const AGENT_NAME: &'static str = "score-return";

    type Settings = ScoringSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self> {
        let date = match &settings.date {
            Some(d) => validate_date(d).wrap_err("invalid date setting")?,
            None => yesterday_utc(),
        };
        Ok(Self {
            settings,
            metrics,
            date,
        })
    }

    async fn run(self) -> Result<AgentOutcome> {
        let store = self.settings.object_store()?;
        let airtable = self.settings.airtable(&store).await?;

        let key = layout::scores_key(self.date);
        let rows: Vec<ScoreRow> = store::read_csv(&store, &key)
            .await
            .wrap_err("loading the day's scores")?;
        info!(key, count = rows.len(), "Loaded scores to return");

        // Map client ids to record ids through the same view the engine
        // scored from.
        let contacts: Vec<Record<ContactIdRow>> = airtable
            .list(
                CONTACTS_TABLE,
                ListQuery {
                    view: SCORING_VIEW,
                    fields: &["ID CLIENTE"],
                    formula: None,
                },
            )
            .await
            .wrap_err("fetching contact record ids")?;
        let record_ids: HashMap<u64, String> = contacts
            .into_iter()
            .map(|r| (r.fields.client_id, r.id))
            .collect();

        let mut updates = Vec::with_capacity(rows.len());
        let mut missing = 0usize;
        for row in &rows {
            match record_ids.get(&row.client_id) {
                Some(record_id) => updates.push((
                    record_id.clone(),
                    json!({
                        "Puntaje_Final_Ajustado": row.adjusted_score,
                        "REFERIDO_Perdido": row.referred_lost,
                        "Afectado_x_red": row.affected_by_network,
                    }),
                )),
                None => {
                    warn!(client_id = row.client_id, "No contact record for scored client");
                    missing += 1;
                }
            }
        }

        airtable
            .batch_update(CONTACTS_TABLE, &updates)
            .await
            .wrap_err("writing scores back")?;
        info!(updated = updates.len(), missing, "Returned adjusted scores");
        self.metrics
            .rows("score_return", "updated")
            .inc_by(updates.len() as u64);

        Ok(AgentOutcome::Complete)
    }
}
