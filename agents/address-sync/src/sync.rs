use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use roda_base::airtable::{fields, ListQuery, Record};
use roda_base::{layout, store, Agent, AgentOutcome, CoreMetrics};
use roda_celo::{derive_address, format_address};
use roda_core::IntegrityError;

use crate::settings::AddressSyncSettings;

const CONTACTS_TABLE: &str = "Contactos";
const CONTACTS_VIEW: &str = "TRIBU_PIPELINE_VIEW";
const ADDRESS_FIELD: &str = "Celo Address";

#[derive(Debug, Deserialize)]
struct ContactFields {
    #[serde(rename = "ID CLIENTE", deserialize_with = "fields::u64_lenient")]
    client_id: u64,
    #[serde(rename = "GPS ID List", default)]
    gps_ids: Vec<String>,
    #[serde(rename = "Celo Address", default)]
    celo_address: Option<String>,
}

/// The AddressSync stage: rebuild the device map from the contacts table,
/// minting addresses for contacts that have none.
pub struct AddressSync {
    settings: AddressSyncSettings,
    metrics: Arc<CoreMetrics>,
}

#[async_trait]
impl Agent for AddressSync {
    const AGENT_NAME: &'static str = "address-sync";

    type Settings = AddressSyncSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self> {
        Ok(Self { settings, metrics })
    }

    async fn run(self) -> Result<AgentOutcome> {
        let store = self.settings.object_store()?;
        let credentials = self.settings.celo_credentials(&store).await?;
        let airtable = self.settings.airtable(&store).await?;

        info!(view = CONTACTS_VIEW, "Fetching contacts with GPS devices");
        let contacts: Vec<Record<ContactFields>> = airtable
            .list(
                CONTACTS_TABLE,
                ListQuery {
                    view: CONTACTS_VIEW,
                    fields: &["ID CLIENTE", "GPS ID List", ADDRESS_FIELD],
                    formula: None,
                },
            )
            .await
            .wrap_err("fetching contacts")?;

        let sync = build_address_map(&contacts, &credentials.mnemonic)?;
        info!(
            devices = sync.map.len(),
            minted = sync.updates.len(),
            "Built device address map"
        );
        self.metrics
            .rows("address_sync", "devices")
            .inc_by(sync.map.len() as u64);
        self.metrics
            .rows("address_sync", "minted")
            .inc_by(sync.updates.len() as u64);

        // Persist the freshly minted addresses first so the store stays the
        // source of truth for the map.
        if !sync.updates.is_empty() {
            airtable
                .batch_update(CONTACTS_TABLE, &sync.updates)
                .await
                .wrap_err("persisting minted addresses")?;
        }

        store::write_yaml(&store, layout::GPS_ADDRESS_MAP_KEY, &sync.map).await?;
        info!(key = layout::GPS_ADDRESS_MAP_KEY, "Wrote device address map");
        Ok(AgentOutcome::Complete)
    }
}

struct MapSync {
    map: BTreeMap<String, String>,
    updates: Vec<(String, serde_json::Value)>,
}

/// Fold the contacts into the device map. A contact without an address gets
/// one derived from the mnemonic at index `client_id`; a device claimed by
/// two contacts aborts the sync.
fn build_address_map(
    contacts: &[Record<ContactFields>],
    mnemonic: &str,
) -> Result<MapSync> {
    let mut map = BTreeMap::new();
    let mut updates = Vec::new();

    for record in contacts {
        if record.fields.gps_ids.is_empty() {
            continue;
        }
        let address = match &record.fields.celo_address {
            Some(address) if !address.is_empty() => address.clone(),
            _ => {
                let index: u32 = record
                    .fields
                    .client_id
                    .try_into()
                    .wrap_err("client id exceeds the derivation index range")?;
                let minted = format_address(
                    derive_address(mnemonic, index).wrap_err("deriving client address")?,
                );
                updates.push((record.id.clone(), json!({ ADDRESS_FIELD: minted })));
                minted
            }
        };

        for gps_id in &record.fields.gps_ids {
            if map.insert(gps_id.clone(), address.clone()).is_some() {
                return Err(IntegrityError::DuplicateGpsDevice {
                    gps_id: gps_id.clone(),
                }
                .into());
            }
        }
    }

    Ok(MapSync { map, updates })
}

#[cfg(test)]
mod test {
    use super::*;

    const MNEMONIC: &str =
        "test test test test test test test test test test test junk";

    fn record(id: &str, client_id: u64, gps: &[&str], address: Option<&str>) -> Record<ContactFields> {
        Record {
            id: id.to_owned(),
            fields: ContactFields {
                client_id,
                gps_ids: gps.iter().map(|s| (*s).to_owned()).collect(),
                celo_address: address.map(str::to_owned),
            },
        }
    }

    #[test]
    fn existing_addresses_are_kept_verbatim() {
        let contacts = vec![record("recA", 3, &["GPS001", "GPS002"], Some("0xdead"))];
        let sync = build_address_map(&contacts, MNEMONIC).unwrap();
        assert_eq!(sync.map["GPS001"], "0xdead");
        assert_eq!(sync.map["GPS002"], "0xdead");
        assert!(sync.updates.is_empty());
    }

    #[test]
    fn missing_addresses_are_minted_deterministically() {
        let contacts = vec![record("recA", 42, &["GPS001"], None)];
        let first = build_address_map(&contacts, MNEMONIC).unwrap();
        let second = build_address_map(&contacts, MNEMONIC).unwrap();
        assert_eq!(first.map["GPS001"], second.map["GPS001"]);
        assert_eq!(first.updates.len(), 1);
        assert_eq!(first.updates[0].0, "recA");
    }

    #[test]
    fn duplicate_devices_abort_the_sync() {
        let contacts = vec![
            record("recA", 1, &["GPS001"], Some("0xaa")),
            record("recB", 2, &["GPS001"], Some("0xbb")),
        ];
        let err = build_address_map(&contacts, MNEMONIC).unwrap_err();
        assert!(err.to_string().contains("GPS001"));
    }

    #[test]
    fn contacts_without_devices_mint_nothing() {
        let contacts = vec![record("recA", 9, &[], None)];
        let sync = build_address_map(&contacts, MNEMONIC).unwrap();
        assert!(sync.map.is_empty());
        assert!(sync.updates.is_empty());
    }
}
