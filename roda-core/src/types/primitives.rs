use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which fleet the data comes from.
///
/// The family selects the transform parameters, the raw/canonical partition
/// names, and the decimal prefix that keeps route ids disjoint between the
/// two fleets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFamily {
    /// Motorbike fleet
    Roda,
    /// Bicycle fleet
    Guajira,
}

impl SourceFamily {
    /// Name used in object-store partition keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFamily::Roda => "roda",
            SourceFamily::Guajira => "guajira",
        }
    }

    /// Decimal digit prepended to counter values so ids from the two
    /// families can never collide.
    pub fn id_prefix(&self) -> u64 {
        match self {
            SourceFamily::Roda => 1,
            SourceFamily::Guajira => 2,
        }
    }
}

impl fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roda" => Ok(SourceFamily::Roda),
            "guajira" => Ok(SourceFamily::Guajira),
            other => Err(format!("unknown dataset type: {other}")),
        }
    }
}

/// Deployment environment. Staging publishes to the Alfajores testnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Celo Alfajores testnet
    Staging,
    /// Celo mainnet
    Production,
}

impl Environment {
    /// Name used in object-store keys and settings files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// The per-environment published flag column in the relational store,
    /// e.g. `PublishedToCeloStaging`.
    pub fn published_flag_field(&self) -> String {
        format!("PublishedToCelo{}", self.capitalized())
    }

    /// The rollup column asserting that a payment's parent credit is on
    /// chain, e.g. `CreditPublishedToCeloStaging`.
    pub fn credit_published_flag_field(&self) -> String {
        format!("CreditPublishedToCelo{}", self.capitalized())
    }

    fn capitalized(&self) -> &'static str {
        match self {
            Environment::Staging => "Staging",
            Environment::Production => "Production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn published_flag_fields_follow_environment() {
        assert_eq!(
            Environment::Staging.published_flag_field(),
            "PublishedToCeloStaging"
        );
        assert_eq!(
            Environment::Production.credit_published_flag_field(),
            "CreditPublishedToCeloProduction"
        );
    }

    #[test]
    fn id_prefixes_are_disjoint() {
        assert_ne!(
            SourceFamily::Roda.id_prefix(),
            SourceFamily::Guajira.id_prefix()
        );
    }
}
