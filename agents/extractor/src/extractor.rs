use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tracing::info;

use roda_base::store::ObjectStore;
use roda_base::{layout, Agent, AgentOutcome, CoreMetrics};
use roda_core::utils::{validate_date, yesterday_utc};
use roda_core::SourceFamily;

use crate::settings::ExtractorSettings;
use crate::tribu::{rows_to_csv, TribuClient};

/// The Extract stage: one invocation lands one `{date, source}` raw
/// partition.
pub struct Extractor {
    settings: ExtractorSettings,
    metrics: Arc<CoreMetrics>,
    source: SourceFamily,
    date: chrono::NaiveDate,
}

#[async_trait]
impl Agent for Extractor {
    const AGENT_NAME: &'static str = "extractor";

    type Settings = ExtractorSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self> {
        let source: SourceFamily = settings
            .datasettype
            .parse()
            .map_err(|e: String| eyre::eyre!(e))?;
        let date = match &settings.date {
            Some(d) => validate_date(d).wrap_err("invalid date setting")?,
            None => yesterday_utc(),
        };
        Ok(Self {
            settings,
            metrics,
            source,
            date,
        })
    }

    async fn run(self) -> Result<AgentOutcome> {
        info!(source = %self.source, date = %self.date, "Extracting tribu routes");
        let store = self.settings.object_store()?;
        let credentials = self
            .settings
            .tribu_credentials(&store, self.source)
            .await
            .wrap_err("loading tribu credentials")?;

        let client = TribuClient::default();
        let token = client.login(&credentials).await?;
        let rows = client.routes(&token, self.date).await?;
        if rows.is_empty() {
            eyre::bail!(
                "tribu returned no routes for {} on {}",
                self.source,
                self.date
            );
        }
        self.metrics
            .rows("extract", "fetched")
            .inc_by(rows.len() as u64);

        let body = rows_to_csv(&rows)?;
        let key = layout::raw_routes_key(self.date, self.source);
        store
            .put(&key, body, "text/csv")
            .await
            .wrap_err_with(|| format!("writing raw extract {key}"))?;
        info!(key, count = rows.len(), "Wrote raw extract");

        Ok(AgentOutcome::Complete)
    }
}
