use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use rand::thread_rng;
use tracing::{error, info};

use roda_base::store::{self, ObjectStore};
use roda_base::{layout, Agent, AgentOutcome, CoreMetrics, Notifier};
use roda_core::utils::{validate_date, yesterday_utc};
use roda_core::{CanonicalRouteRecord, IntegrityError, SourceFamily};

use crate::params::TransformParams;
use crate::pipeline::{
    clamp_to_max_speed, filter_by_distance, filter_by_duration, parse_rows, resolve_addresses,
    split_routes, to_record, RouteDraft,
};
use crate::settings::TransformerSettings;

/// The Transform stage: one invocation turns one `{date, source}` raw
/// partition into its canonical counterpart.
pub struct Transformer {
    settings: TransformerSettings,
    metrics: Arc<CoreMetrics>,
    source: SourceFamily,
    date: chrono::NaiveDate,
}

#[async_trait]
impl Agent for Transformer {
    const AGENT_NAME: &'static str = "transformer";

    type Settings = TransformerSettings;

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
        info!(source = %self.source, date = %self.date, "Transforming tribu routes");
        let store = self.settings.object_store()?;

        let params: TransformParams =
            store::read_yaml(&store, &layout::transform_params_key(self.source))
                .await
                .wrap_err("loading transform parameters")?;
        info!(?params, "Loaded transformation parameters");

        let raw = store::get_required(&store, &layout::raw_routes_key(self.date, self.source))
            .await
            .wrap_err("loading raw partition")?;

        let drafts = self.reconcile(&raw, &params)?;
        let with_ids = self.issue_route_ids(drafts, &params).await?;
        let records = self.resolve(with_ids, &params, &store).await?;

        let key = layout::canonical_routes_key(self.date, self.source);
        store::write_csv(&store, &key, &records).await?;
        info!(key, count = records.len(), "Wrote canonical partition");
        self.metrics
            .rows("transform", "emitted")
            .inc_by(records.len() as u64);

        Ok(AgentOutcome::Complete)
    }
}

impl Transformer {
    /// Parse, filter, clamp and split the raw rows.
    fn reconcile(&self, raw: &[u8], params: &TransformParams) -> Result<Vec<RouteDraft>> {
        let parsed = parse_rows(raw, &params.columns, &params.input_datetime_format)?;
        self.metrics
            .rows("transform", "uncoercible")
            .inc_by(parsed.dropped as u64);
        let mut drafts = parsed.drafts;
        info!(
            kept = drafts.len(),
            dropped = parsed.dropped,
            "Parsed raw partition"
        );

        if let Some(filter) = &params.distance_filter {
            let rejected = filter_by_distance(&mut drafts, filter);
            self.metrics
                .rows("transform", "distance_rejected")
                .inc_by(rejected as u64);
        }
        if let Some(filter) = &params.duration_filter {
            let rejected = filter_by_duration(&mut drafts, filter);
            self.metrics
                .rows("transform", "duration_rejected")
                .inc_by(rejected as u64);
        }
        if let Some(fix) = &params.distance_fix {
            let adjusted = clamp_to_max_speed(&mut drafts, fix.expected_max_per_hour);
            self.metrics
                .rows("transform", "distance_clamped")
                .inc_by(adjusted as u64);
        }
        if let Some(split) = &params.split_big_routes {
            let before = drafts.len();
            drafts = split_routes(drafts, split, &mut thread_rng());
            self.metrics
                .rows("transform", "split_children")
                .inc_by((drafts.len() - before) as u64);
        }
        Ok(drafts)
    }

    /// Assign each surviving row a fresh id from the counter service,
    /// prefixed for this source family.
    async fn issue_route_ids(
        &self,
        drafts: Vec<RouteDraft>,
        params: &TransformParams,
    ) -> Result<Vec<(RouteDraft, u64)>> {
        let counter = self.settings.counter()?;
        let prefix = params.id_prefix.unwrap_or_else(|| self.source.id_prefix());

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let value = counter.next().await.wrap_err("issuing route id")?;
            let route_id = prefixed_route_id(prefix, value)?;
            if !seen.insert(route_id) {
                return Err(IntegrityError::DuplicateRouteId { route_id }.into());
            }
            self.metrics.latest_route_id().set(route_id as i64);
            out.push((draft, route_id));
        }
        Ok(out)
    }

    /// Resolve destination addresses and project the canonical rows. An
    /// unresolved device that is not known-unassigned notifies the operator
    /// and fails the partition.
    async fn resolve(
        &self,
        rows: Vec<(RouteDraft, u64)>,
        params: &TransformParams,
        store: &dyn ObjectStore,
    ) -> Result<Vec<CanonicalRouteRecord>> {
        let address_map: BTreeMap<String, String> =
            store::read_yaml(store, layout::GPS_ADDRESS_MAP_KEY)
                .await
                .wrap_err("loading device address map")?;
        let known_unassigned: HashSet<String> =
            store::read_yaml(store, layout::KNOWN_UNASSIGNED_DEVICES_KEY)
                .await
                .wrap_err("loading known-unassigned device list")?;

        let resolved = match resolve_addresses(
            rows,
            &address_map,
            &known_unassigned,
            params.fallback_address.as_deref(),
        ) {
            Ok(resolved) => resolved,
            Err(integrity) => {
                error!(%integrity, "Unresolved devices in raw partition");
                if let IntegrityError::UnresolvedDevices { devices } = &integrity {
                    self.settings
                        .notifier()?
                        .notify(
                            "Tribu devices without an associated client",
                            &format!(
                                "There are GPS devices not associated to a client.\n\
                                 Please fix and retry the following devices: {}",
                                devices.join(", ")
                            ),
                        )
                        .await?;
                }
                return Err(integrity.into());
            }
        };
        self.metrics
            .rows("transform", "known_unassigned_dropped")
            .inc_by(resolved.dropped_unassigned as u64);

        Ok(resolved
            .resolved
            .iter()
            .map(|(draft, route_id, address)| {
                to_record(
                    draft,
                    *route_id,
                    address.clone(),
                    &params.output_datetime_format,
                )
            })
            .collect())
    }
}

/// Concatenate the source-family prefix and the counter value decimally:
/// prefix 1 and counter 100001 form route id 1100001.
fn prefixed_route_id(prefix: u64, counter_value: u64) -> Result<u64> {
    format!("{prefix}{counter_value}")
        .parse()
        .wrap_err_with(|| format!("route id overflow for prefix {prefix}, counter {counter_value}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn route_ids_concatenate_prefix_and_counter() {
        assert_eq!(prefixed_route_id(1, 100001).unwrap(), 1_100_001);
        assert_eq!(prefixed_route_id(2, 100001).unwrap(), 2_100_001);
        assert_eq!(prefixed_route_id(1, 999999).unwrap(), 1_999_999);
    }

    #[test]
    fn prefixed_ids_from_distinct_families_never_collide() {
        let roda = prefixed_route_id(1, 123456).unwrap();
        let guajira = prefixed_route_id(2, 123456).unwrap();
        assert_ne!(roda, guajira);
    }
}
