use std::collections::BTreeMap;

use chrono::NaiveDate;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use roda_core::Environment;

use crate::layout;
use crate::store::ObjectStore;

/// Metadata of one accepted route transaction, as recorded in the per-day
/// checkpoint object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Account nonce the transaction was sent with
    pub nonce: u64,
    /// Gas price used, decimal wei
    pub gas_price: String,
    /// Transaction hash, hex
    pub tx_hash: String,
}

/// The day's published-route set: `route_id -> transaction metadata`.
///
/// This is one of the two idempotency signals of the route publisher (the
/// other being the per-record flag in the relational store for credits and
/// payments). A missing checkpoint object is an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishedRoutes {
    entries: BTreeMap<u64, TxRecord>,
}

impl PublishedRoutes {
    /// Whether this route was already accepted in a prior run.
    pub fn contains(&self, route_id: u64) -> bool {
        self.entries.contains_key(&route_id)
    }

    /// Record an accepted transaction.
    pub fn insert(&mut self, route_id: u64, record: TxRecord) {
        self.entries.insert(route_id, record);
    }

    /// Number of routes already published.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no route has been published yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load the day's checkpoint; a missing object is an empty mapping.
pub async fn load_checkpoint(
    store: &dyn ObjectStore,
    environment: Environment,
    date: NaiveDate,
) -> Result<PublishedRoutes> {
    let key = layout::route_checkpoint_key(environment, date);
    match store
        .get(&key)
        .await
        .wrap_err_with(|| format!("fetching checkpoint {key}"))?
    {
        Some(raw) => {
            serde_json::from_slice(&raw).wrap_err_with(|| format!("parsing checkpoint {key}"))
        }
        None => Ok(PublishedRoutes::default()),
    }
}

/// Persist the day's checkpoint. Called on every publisher exit path,
/// successful or not.
pub async fn save_checkpoint(
    store: &dyn ObjectStore,
    environment: Environment,
    date: NaiveDate,
    checkpoint: &PublishedRoutes,
) -> Result<()> {
    let key = layout::route_checkpoint_key(environment, date);
    let body = serde_json::to_vec_pretty(checkpoint)?;
    store
        .put(&key, body, "application/json")
        .await
        .wrap_err_with(|| format!("writing checkpoint {key}"))
}

#[cfg(test)]
mod test {
    use crate::store::LocalStore;

    use super::*;

    fn record(nonce: u64) -> TxRecord {
        TxRecord {
            nonce,
            gas_price: "5000000000".into(),
            tx_hash: format!("0x{nonce:064x}"),
        }
    }

    #[tokio::test]
    async fn missing_checkpoint_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let cp = load_checkpoint(&store, Environment::Staging, date)
            .await
            .unwrap();
        assert!(cp.is_empty());
    }

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let mut cp = PublishedRoutes::default();
        cp.insert(1100001, record(7));
        cp.insert(1100002, record(8));
        save_checkpoint(&store, Environment::Staging, date, &cp)
            .await
            .unwrap();

        let back = load_checkpoint(&store, Environment::Staging, date)
            .await
            .unwrap();
        assert_eq!(back, cp);
        assert!(back.contains(1100001));
        assert!(!back.contains(1100003));
    }
}
