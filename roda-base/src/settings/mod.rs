//! Settings shared by all Roda agents.
//!
//! Agents share this base [`Settings`] struct and declare any extra fields
//! in their own crate with the [`crate::decl_settings!`] macro.
//!
//! Configuration key/value pairs are loaded in the following order, with
//! later sources taking precedence:
//!
//! 1. `./config/$RUN_ENV/base.json` (optional)
//! 2. `./config/$RUN_ENV/{agent}-partial.json` (optional)
//! 3. Env vars prefixed `RODA_BASE_`, shared by all agents,
//!    e.g. `export RODA_BASE_BUCKET=rodaapp-rappidriverchain`
//! 4. Env vars prefixed `RODA_{AGENTNAME}_`, agent specific,
//!    e.g. `export RODA_TRANSFORMER_DATASETTYPE=roda`
//!
//! `RUN_ENV` defaults to `default`. Environment variable names map onto the
//! JSON object hierarchy with `_` as the separator.
//!
//! Secrets (the mnemonic, the Airtable token, the fleet-API credentials and
//! the contract ABIs) are never part of the settings; they live in the
//! `credentials/` area of the object store and are fetched at startup.

use std::env;

use config::{Config, Environment as ConfigEnvironment, File};
use eyre::{Result, WrapErr};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use roda_core::{Environment, SourceFamily};

use crate::airtable::AirtableClient;
use crate::layout;
use crate::store::{self, ObjectStore, S3Store};
use crate::{LogNotifier, Notifier, RouteIdCounter, SesNotifier};

mod trace;
pub use trace::*;

/// The Alfajores public RPC endpoint used whenever the environment is
/// staging, regardless of the provider configured in the credentials.
pub const ALFAJORES_RPC_URL: &str = "https://alfajores-forno.celo-testnet.org";

const DEFAULT_COUNTER_TABLE: &str = "RouteIDCounter";

/// Settings shared by every agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Deployment environment (staging or production)
    pub environment: Environment,
    /// Object-store bucket holding every pipeline artifact
    pub bucket: String,
    /// AWS region for the object store and the counter table
    #[serde(default = "default_region")]
    pub region: String,
    /// DynamoDB table backing the route-id counter
    #[serde(default)]
    pub countertable: Option<String>,
    /// Where operational notifications are mailed; log-only when unset
    #[serde(default)]
    pub notificationemail: Option<String>,
    /// Address notifications are sent from
    #[serde(default)]
    pub notificationsender: Option<String>,
    /// The tracing configuration
    #[serde(default)]
    pub tracing: TracingConfig,
}

fn default_region() -> String {
    "us-east-2".to_owned()
}

/// Mnemonic and RPC endpoint for the publishing account.
#[derive(Debug, Clone, Deserialize)]
pub struct CeloCredentials {
    /// BIP-39 mnemonic of the master account
    #[serde(rename = "MNEMONIC")]
    pub mnemonic: String,
    /// Production RPC endpoint
    #[serde(rename = "PROVIDER_URL")]
    pub provider_url: String,
}

impl CeloCredentials {
    /// The RPC endpoint to use for the given environment. Staging always
    /// goes to Alfajores.
    pub fn rpc_url(&self, environment: Environment) -> &str {
        match environment {
            Environment::Production => &self.provider_url,
            Environment::Staging => ALFAJORES_RPC_URL,
        }
    }
}

/// Airtable base id and access token.
#[derive(Debug, Clone, Deserialize)]
pub struct AirtableCredentials {
    /// The base holding the Contactos/Creditos/Pagos tables
    #[serde(rename = "BASE_ID")]
    pub base_id: String,
    /// Personal access token
    #[serde(rename = "PERSONAL_ACCESS_TOKEN")]
    pub personal_access_token: String,
}

/// Fleet-API login for one source family.
#[derive(Debug, Clone, Deserialize)]
pub struct TribuCredentials {
    /// Account user
    pub user: String,
    /// Account password
    pub password: String,
}

/// Address and ABI of a deployed contract, as stored per environment under
/// `credentials/`.
#[derive(Debug, Clone)]
pub struct ContractInfo {
    /// Hex contract address
    pub address: String,
    /// The contract ABI as raw JSON
    pub abi: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RouteContractFile {
    #[serde(rename = "RODA_ROUTE_CONTRACT_ADDR")]
    addr: String,
    #[serde(rename = "RODA_ROUTE_CONTRACT_ABI")]
    abi: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CreditContractFile {
    #[serde(rename = "RODA_CREDIT_CONTRACT_ADDR")]
    addr: String,
    #[serde(rename = "RODA_CREDIT_CONTRACT_ABI")]
    abi: serde_json::Value,
}

impl Settings {
    /// Build the S3 object-store adapter.
    pub fn object_store(&self) -> Result<S3Store> {
        let region = self
            .region
            .parse()
            .wrap_err_with(|| format!("invalid AWS region {:?}", self.region))?;
        Ok(S3Store::new(self.bucket.clone(), region))
    }

    /// Build the route-id counter client.
    pub fn counter(&self) -> Result<RouteIdCounter> {
        let region = self
            .region
            .parse()
            .wrap_err_with(|| format!("invalid AWS region {:?}", self.region))?;
        let table = self
            .countertable
            .clone()
            .unwrap_or_else(|| DEFAULT_COUNTER_TABLE.to_owned());
        Ok(RouteIdCounter::new(table, region))
    }

    /// Build the operational notifier. Falls back to log-only when no
    /// recipient is configured.
    pub fn notifier(&self) -> Result<Box<dyn Notifier>> {
        match (&self.notificationemail, &self.notificationsender) {
            (Some(recipient), Some(sender)) => {
                let region = self.region.parse().wrap_err("invalid AWS region")?;
                Ok(Box::new(SesNotifier::new(
                    sender.clone(),
                    recipient.clone(),
                    region,
                )))
            }
            (Some(_), None) | (None, Some(_)) => {
                eyre::bail!("notificationemail and notificationsender must be set together")
            }
            (None, None) => Ok(Box::new(LogNotifier)),
        }
    }

    /// Fetch the publishing account credentials from the object store.
    pub async fn celo_credentials(&self, store: &dyn ObjectStore) -> Result<CeloCredentials> {
        store::read_yaml(store, layout::CELO_CREDENTIALS_KEY).await
    }

    /// Fetch the Airtable credentials and build the client.
    pub async fn airtable(&self, store: &dyn ObjectStore) -> Result<AirtableClient> {
        let creds: AirtableCredentials =
            store::read_yaml(store, layout::AIRTABLE_CREDENTIALS_KEY).await?;
        AirtableClient::new(creds.base_id, creds.personal_access_token)
            .wrap_err("building Airtable client")
    }

    /// Fetch the fleet-API login for one source family.
    pub async fn tribu_credentials(
        &self,
        store: &dyn ObjectStore,
        source: SourceFamily,
    ) -> Result<TribuCredentials> {
        store::read_json(store, &layout::tribu_credentials_key(source)).await
    }

    /// Fetch the route contract address and ABI for this environment.
    pub async fn route_contract(&self, store: &dyn ObjectStore) -> Result<ContractInfo> {
        let file: RouteContractFile =
            store::read_json(store, &layout::route_contract_key(self.environment)).await?;
        Ok(ContractInfo {
            address: file.addr,
            abi: file.abi,
        })
    }

    /// Fetch the credit contract address and ABI for this environment.
    pub async fn credit_contract(&self, store: &dyn ObjectStore) -> Result<ContractInfo> {
        let file: CreditContractFile =
            store::read_json(store, &layout::credit_contract_key(self.environment)).await?;
        Ok(ContractInfo {
            address: file.addr,
            abi: file.abi,
        })
    }
}

/// Load a settings object from the config locations described in the module
/// docs. `agent_prefix` is the agent name used for the partial file and the
/// env-var prefix.
pub fn load_settings<T>(agent_prefix: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| "default".into());
    let env_prefix = format!("RODA_{}", agent_prefix).to_ascii_uppercase();

    let deserializer = Config::builder()
        .add_source(File::with_name(&format!("./config/{run_env}/base")).required(false))
        .add_source(
            File::with_name(&format!(
                "./config/{run_env}/{}-partial",
                agent_prefix.to_lowercase()
            ))
            .required(false),
        )
        .add_source(ConfigEnvironment::with_prefix("RODA_BASE").separator("_"))
        .add_source(ConfigEnvironment::with_prefix(&env_prefix).separator("_"))
        .build()?;

    serde_path_to_error::deserialize(deserializer).wrap_err("deserializing settings")
}
