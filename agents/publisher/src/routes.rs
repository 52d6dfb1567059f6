use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use ethers::contract::ContractCall;
use ethers::types::Address;
use eyre::{Result, WrapErr};
use tracing::{info, warn};

use roda_base::store::{self, ObjectStore};
use roda_base::{
    layout, load_checkpoint, save_checkpoint, Agent, AgentOutcome, CoreMetrics, PublishedRoutes,
    TxRecord,
};
use roda_celo::{CeloProvider, RodaLedger, TxAcceptance};
use roda_core::utils::{validate_date, yesterday_utc};
use roda_core::CanonicalRouteRecord;

use crate::settings::PublisherSettings;
use crate::{open_chain_session, Budget, DEFAULT_TIMEOUT_SECS};

/// The RoutePublisher stage: mint the day's canonical routes as NFTs,
/// resuming from the per-day checkpoint object.
pub struct RoutePublisher {
    settings: PublisherSettings,
    metrics: Arc<CoreMetrics>,
    date: NaiveDate,
    budget: Duration,
}

#[async_trait]
impl Agent for RoutePublisher {
    const AGENT_NAME: &'static str = "route-publisher";

    type Settings = PublisherSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self> {
        let date = match &settings.date {
            Some(d) => validate_date(d).wrap_err("invalid date setting")?,
            None => yesterday_utc(),
        };
        let budget = match &settings.timeout {
            Some(t) => Duration::from_secs(t.parse().wrap_err("invalid timeout setting")?),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        Ok(Self {
            settings,
            metrics,
            date,
            budget,
        })
    }

    async fn run(self) -> Result<AgentOutcome> {
        let environment = self.settings.environment;
        let store = self.settings.object_store()?;

        let records = read_canonical_partitions(&store, self.date).await?;
        if records.is_empty() {
            info!(date = %self.date, "No canonical routes for the day");
            return Ok(AgentOutcome::Complete);
        }

        let mut checkpoint = load_checkpoint(&store, environment, self.date).await?;
        let pending = pending_records(&records, &checkpoint);
        self.metrics
            .transactions("route", "skipped")
            .inc_by((records.len() - pending.len()) as u64);
        info!(
            total = records.len(),
            already_published = checkpoint.len(),
            pending = pending.len(),
            "About to publish routes"
        );

        let contract = self.settings.route_contract(&store).await?;
        let mut session = open_chain_session(&self.settings, &store, &contract).await?;
        let budget = Budget::start(self.budget);

        let mut published = 0usize;
        for (index, record) in pending.iter().enumerate() {
            if budget.exhausted() {
                save_checkpoint(&store, environment, self.date, &checkpoint).await?;
                return Ok(AgentOutcome::Partial {
                    published,
                    pending: pending.len() - index,
                });
            }

            let call = match route_call(&session.ledger, record) {
                Ok(call) => call,
                Err(e) => {
                    save_checkpoint(&store, environment, self.date, &checkpoint).await?;
                    return Err(e);
                }
            };

            info!(
                route_id = record.route_id,
                nonce = session.sender.next_nonce(),
                "Publishing route"
            );
            match session.sender.submit(call).await {
                Ok(acceptance) => {
                    checkpoint.insert(record.route_id, accepted_record(&acceptance));
                    self.metrics.transactions("route", "confirmed").inc();
                    published += 1;
                }
                Err(e) if e.is_already_recorded() => {
                    info!(route_id = record.route_id, "Route already on chain, skipping");
                    checkpoint.insert(record.route_id, preexisting_record());
                    self.metrics.transactions("route", "already_minted").inc();
                    published += 1;
                }
                Err(e) => {
                    warn!(route_id = record.route_id, error = %e, "Route publication failed");
                    save_checkpoint(&store, environment, self.date, &checkpoint).await?;
                    return Err(e).wrap_err("publishing route");
                }
            }
        }

        save_checkpoint(&store, environment, self.date, &checkpoint).await?;
        Ok(AgentOutcome::Complete)
    }
}

/// Read every canonical partition of the day, across source families.
/// Staging leftovers (`.tmp` keys) are never picked up.
async fn read_canonical_partitions(
    store: &dyn ObjectStore,
    date: NaiveDate,
) -> Result<Vec<CanonicalRouteRecord>> {
    let prefix = layout::canonical_routes_prefix(date);
    let keys = store
        .list(&prefix)
        .await
        .wrap_err_with(|| format!("listing {prefix}"))?;
    let mut records = Vec::new();
    for key in keys.iter().filter(|k| k.ends_with(".csv")) {
        info!(key, "Reading canonical partition");
        records.extend(store::read_csv::<CanonicalRouteRecord>(store, key).await?);
    }
    Ok(records)
}

/// The records the checkpoint does not already cover, in input order.
fn pending_records<'a>(
    records: &'a [CanonicalRouteRecord],
    checkpoint: &PublishedRoutes,
) -> Vec<&'a CanonicalRouteRecord> {
    records
        .iter()
        .filter(|r| !checkpoint.contains(r.route_id))
        .collect()
}

/// Build the `recordRoute` call for one canonical row. The partition must
/// carry unix timestamps (the production output format).
fn route_call(
    ledger: &RodaLedger,
    record: &CanonicalRouteRecord,
) -> Result<ContractCall<CeloProvider, ()>> {
    let to: Address = record
        .celo_address
        .parse()
        .wrap_err_with(|| format!("route {} has a malformed address", record.route_id))?;
    let start: i64 = record
        .timestamp_start
        .parse()
        .wrap_err("canonical partition must use the unix output format")?;
    let end: i64 = record
        .timestamp_end
        .parse()
        .wrap_err("canonical partition must use the unix output format")?;
    ledger.record_route(to, record.route_id, start, end, record.measured_distance)
}

fn accepted_record(acceptance: &TxAcceptance) -> TxRecord {
    TxRecord {
        nonce: acceptance.nonce,
        gas_price: acceptance.gas_price.to_string(),
        tx_hash: format!("{:?}", acceptance.tx_hash),
    }
}

/// Marker for a route found on chain without a transaction of ours; the
/// chain state predates this day's checkpoint.
fn preexisting_record() -> TxRecord {
    TxRecord {
        nonce: 0,
        gas_price: "0".to_owned(),
        tx_hash: "already-on-chain".to_owned(),
    }
}

#[cfg(test)]
mod test {
    use roda_base::store::LocalStore;
    use roda_celo::connect;
    use roda_core::Environment;
    use serde_json::json;

    use super::*;

    fn record(route_id: u64) -> CanonicalRouteRecord {
        CanonicalRouteRecord {
            gps_id: "GPS001".into(),
            timestamp_start: "1705305600".into(),
            timestamp_end: "1705307400".into(),
            measured_distance: 5_200,
            celo_address: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".into(),
            route_id,
        }
    }

    fn ledger() -> RodaLedger {
        let abi = json!([{
            "name": "recordRoute",
            "type": "function",
            "stateMutability": "nonpayable",
            "inputs": [
                { "name": "to", "type": "address" },
                { "name": "routeId", "type": "uint256" },
                { "name": "_timestampStart", "type": "uint256" },
                { "name": "_timestampEnd", "type": "uint256" },
                { "name": "_distance", "type": "uint256" }
            ],
            "outputs": []
        }]);
        let provider = connect("http://localhost:8545").unwrap();
        RodaLedger::new(Address::zero(), &abi, provider).unwrap()
    }

    #[test]
    fn route_calls_build_from_well_formed_records() {
        let call = route_call(&ledger(), &record(1_100_001)).unwrap();
        assert!(call.tx.data().is_some());
    }

    #[test]
    fn malformed_addresses_fail_the_call() {
        let mut bad = record(1_100_001);
        bad.celo_address = "not-an-address".into();
        let err = route_call(&ledger(), &bad).unwrap_err();
        assert!(err.to_string().contains("malformed address"));
    }

    #[test]
    fn formatted_timestamps_fail_the_call() {
        let mut bad = record(1_100_001);
        bad.timestamp_start = "2024-01-15 08:00".into();
        let err = route_call(&ledger(), &bad).unwrap_err();
        assert!(err.to_string().contains("unix output format"));
    }

    #[test]
    fn checkpointed_routes_are_not_republished() {
        let records = vec![record(1_100_001), record(1_100_002), record(1_100_003)];
        let mut checkpoint = PublishedRoutes::default();
        checkpoint.insert(1_100_002, preexisting_record());

        let pending = pending_records(&records, &checkpoint);
        let ids: Vec<u64> = pending.iter().map(|r| r.route_id).collect();
        assert_eq!(ids, vec![1_100_001, 1_100_003]);
    }

    #[tokio::test]
    async fn already_recorded_routes_stay_skipped_across_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        // First run hits an already-minted revert and marks the route.
        let mut checkpoint = load_checkpoint(&store, Environment::Staging, date)
            .await
            .unwrap();
        checkpoint.insert(1_100_001, preexisting_record());
        save_checkpoint(&store, Environment::Staging, date, &checkpoint)
            .await
            .unwrap();

        // The next invocation reads it back and skips the route.
        let reloaded = load_checkpoint(&store, Environment::Staging, date)
            .await
            .unwrap();
        let records = vec![record(1_100_001), record(1_100_002)];
        let pending = pending_records(&records, &reloaded);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].route_id, 1_100_002);
    }

    #[tokio::test]
    async fn partitions_read_across_sources_without_staging_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        store::write_csv(
            &store,
            &layout::canonical_routes_key(date, roda_core::SourceFamily::Roda),
            &[record(1_100_001)],
        )
        .await
        .unwrap();
        store::write_csv(
            &store,
            &layout::canonical_routes_key(date, roda_core::SourceFamily::Guajira),
            &[record(2_100_001)],
        )
        .await
        .unwrap();
        // A torn write leaves a staging object behind; it must be ignored.
        store
            .put(
                &format!(
                    "{}.tmp",
                    layout::canonical_routes_key(date, roda_core::SourceFamily::Roda)
                ),
                b"gpsID\nbroken".to_vec(),
                "text/csv",
            )
            .await
            .unwrap();

        let records = read_canonical_partitions(&store, date).await.unwrap();
        let mut ids: Vec<u64> = records.iter().map(|r| r.route_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1_100_001, 2_100_001]);
    }
}
