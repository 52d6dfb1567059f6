use serde::{Deserialize, Serialize};

/// A canonical delivery route as persisted in the object store, one CSV row
/// per route.
///
/// Invariants, enforced by the transformer before a row is emitted: the end
/// is strictly after the start, distance and duration sit inside the
/// per-source configured ranges, the distance does not exceed what the
/// duration allows at the configured max speed, the address is set, and the
/// route id is strictly larger than any id previously issued for the same
/// source family.
///
/// Timestamps are strings because the output format is configurable per
/// source; production parameters use `"unix"` (seconds since epoch), which
/// is the only format the route publisher accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRouteRecord {
    /// GPS device identifier
    #[serde(rename = "gpsID")]
    pub gps_id: String,
    /// Formatted start timestamp
    #[serde(rename = "timestampStart")]
    pub timestamp_start: String,
    /// Formatted end timestamp
    #[serde(rename = "timestampEnd")]
    pub timestamp_end: String,
    /// Distance in meters, rounded to the nearest meter
    #[serde(rename = "measuredDistance")]
    pub measured_distance: i64,
    /// Destination address on chain (hex, 0x-prefixed)
    #[serde(rename = "celo_address")]
    pub celo_address: String,
    /// Globally unique, monotonically issued identifier
    #[serde(rename = "routeID")]
    pub route_id: u64,
}
