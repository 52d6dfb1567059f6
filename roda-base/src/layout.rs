//! Key layout of the pipeline bucket. Every artifact an agent reads or
//! writes lives under one of these keys; nothing else constructs keys by
//! hand.

use chrono::NaiveDate;
use roda_core::utils::format_dashed_date;
use roda_core::{Environment, SourceFamily};

/// Mnemonic and RPC endpoint of the publishing account.
pub const CELO_CREDENTIALS_KEY: &str = "credentials/roda_celo_credentials.yaml";

/// Airtable base id and token.
pub const AIRTABLE_CREDENTIALS_KEY: &str = "credentials/roda_airtable_credentials.yaml";

/// Current GPS-device to chain-address map.
pub const GPS_ADDRESS_MAP_KEY: &str = "roda_metadata/gps_to_celo_address_map.yaml";

/// Devices intentionally not assigned to any contact (bench and test
/// units). The key is historically misspelled; it must stay this way.
pub const KNOWN_UNASSIGNED_DEVICES_KEY: &str = "tribu_metadata/tribu_known_unassigned_divices.yaml";

/// Fleet-API login for one source family.
pub fn tribu_credentials_key(source: SourceFamily) -> String {
    format!("credentials/tribu_{source}_credentials.json")
}

/// Route contract address and ABI for one environment.
pub fn route_contract_key(environment: Environment) -> String {
    format!("credentials/roda_celo_contracts_{environment}.json")
}

/// Credit contract address and ABI for one environment.
pub fn credit_contract_key(environment: Environment) -> String {
    format!("credentials/roda_credits_contract_{environment}.json")
}

/// Per-source transform parameters.
pub fn transform_params_key(source: SourceFamily) -> String {
    format!("tribu_metadata/transformations_{source}.yaml")
}

/// The day's raw extract for one source family.
pub fn raw_routes_key(date: NaiveDate, source: SourceFamily) -> String {
    format!(
        "tribu_data/date={}/source={source}/tribu_{source}_routes.csv",
        format_dashed_date(date)
    )
}

/// The day's canonical routes for one source family.
pub fn canonical_routes_key(date: NaiveDate, source: SourceFamily) -> String {
    format!(
        "rappi_driver_routes/date={}/source=tribu_{source}/tribu_{source}_routes.csv",
        format_dashed_date(date)
    )
}

/// Prefix under which all of a day's canonical partitions live, across
/// source families.
pub fn canonical_routes_prefix(date: NaiveDate) -> String {
    format!("rappi_driver_routes/date={}/", format_dashed_date(date))
}

/// The day's route-publication checkpoint for one environment.
pub fn route_checkpoint_key(environment: Environment, date: NaiveDate) -> String {
    format!(
        "{environment}/celo_published_routes/date={}/already_published_routes.json",
        format_dashed_date(date)
    )
}

/// The day's scoring output.
pub fn scores_key(date: NaiveDate) -> String {
    format!("daily_scoring/date_{}_scores.csv", format_dashed_date(date))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys_match_the_bucket_layout() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(
            raw_routes_key(date, SourceFamily::Roda),
            "tribu_data/date=2024-01-15/source=roda/tribu_roda_routes.csv"
        );
        assert_eq!(
            canonical_routes_key(date, SourceFamily::Guajira),
            "rappi_driver_routes/date=2024-01-15/source=tribu_guajira/tribu_guajira_routes.csv"
        );
        assert_eq!(
            route_checkpoint_key(Environment::Staging, date),
            "staging/celo_published_routes/date=2024-01-15/already_published_routes.json"
        );
        assert_eq!(
            scores_key(date),
            "daily_scoring/date_2024-01-15_scores.csv"
        );
    }
}
