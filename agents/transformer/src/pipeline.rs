use chrono::{Duration, NaiveDateTime};
use eyre::{Result, WrapErr};
use rand::Rng;
use tracing::debug;

use roda_core::CanonicalRouteRecord;

use crate::params::{ColumnMap, RangeFilter, SplitParams};

/// A route moving through the transform, timestamps parsed, distance still
/// fractional.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDraft {
    /// GPS device identifier
    pub gps_id: String,
    /// Route start
    pub start: NaiveDateTime,
    /// Route end
    pub end: NaiveDateTime,
    /// Distance in meters
    pub distance: f64,
    /// Opaque route key from the fleet tracker
    pub external_key: String,
}

impl RouteDraft {
    /// Duration in fractional minutes.
    pub fn duration_minutes(&self) -> f64 {
        self.duration_seconds() / 60.0
    }

    fn duration_seconds(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// Outcome of parsing the raw partition.
pub struct ParsedRows {
    /// Rows that coerced cleanly
    pub drafts: Vec<RouteDraft>,
    /// Rows dropped because a required column failed to coerce
    pub dropped: usize,
}

/// Parse the raw CSV bytes. Rows whose required columns fail to coerce are
/// dropped and counted; a missing column is a configuration error for the
/// whole partition.
pub fn parse_rows(raw: &[u8], columns: &ColumnMap, input_format: &str) -> Result<ParsedRows> {
    let mut reader = csv::Reader::from_reader(raw);
    let headers = reader.headers().wrap_err("raw partition has no header")?;

    let device = column_index(headers, &columns.device)?;
    let start = column_index(headers, &columns.start)?;
    let end = column_index(headers, &columns.end)?;
    let distance = column_index(headers, &columns.distance)?;
    let route_key = column_index(headers, &columns.route_key)?;

    let mut drafts = Vec::new();
    let mut dropped = 0;
    for record in reader.records() {
        let record = record.wrap_err("reading raw CSV record")?;
        let parsed = (|| -> Option<RouteDraft> {
            let start =
                NaiveDateTime::parse_from_str(record.get(start)?.trim(), input_format).ok()?;
            let end = NaiveDateTime::parse_from_str(record.get(end)?.trim(), input_format).ok()?;
            if end <= start {
                return None;
            }
            Some(RouteDraft {
                gps_id: record.get(device)?.trim().to_owned(),
                start,
                end,
                distance: record.get(distance)?.trim().parse().ok()?,
                external_key: record.get(route_key)?.trim().to_owned(),
            })
        })();
        match parsed {
            Some(draft) if !draft.gps_id.is_empty() => drafts.push(draft),
            _ => dropped += 1,
        }
    }
    Ok(ParsedRows { drafts, dropped })
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| eyre::eyre!("raw partition is missing column {name:?}"))
}

/// Keep routes whose distance falls in the configured range. Returns the
/// number of rejected rows.
pub fn filter_by_distance(drafts: &mut Vec<RouteDraft>, filter: &RangeFilter) -> usize {
    let before = drafts.len();
    drafts.retain(|d| filter.accepts(d.distance));
    before - drafts.len()
}

/// Keep routes whose duration in minutes falls in the configured range.
pub fn filter_by_duration(drafts: &mut Vec<RouteDraft>, filter: &RangeFilter) -> usize {
    let before = drafts.len();
    drafts.retain(|d| filter.accepts(d.duration_minutes()));
    before - drafts.len()
}

/// Clamp each distance to what its duration allows at the configured max
/// speed. Corrects implausible sensor readings without dropping the route.
/// Returns the number of adjusted rows.
pub fn clamp_to_max_speed(drafts: &mut [RouteDraft], max_meters_per_hour: f64) -> usize {
    let mut adjusted = 0;
    for draft in drafts.iter_mut() {
        let ceiling = draft.duration_minutes() / 60.0 * max_meters_per_hour;
        if draft.distance > ceiling {
            draft.distance = ceiling;
            adjusted += 1;
        }
    }
    adjusted
}

/// Expand routes whose distance exceeds `max_distance` into
/// `ceil(distance / avg_distance)` children.
///
/// The original duration is partitioned by a bounded multiplicative jitter
/// in `[0.8, 1.2]`, normalized so the segments sum exactly to the original
/// duration; each child's distance is its time share of the original
/// distance. The first child starts at the original start and the last
/// child ends exactly at the original end, so both distance and duration
/// are conserved.
pub fn split_routes<R: Rng>(
    drafts: Vec<RouteDraft>,
    params: &SplitParams,
    rng: &mut R,
) -> Vec<RouteDraft> {
    let mut out = Vec::with_capacity(drafts.len());
    for draft in drafts {
        if draft.distance <= params.max_distance {
            out.push(draft);
            continue;
        }

        let children = (draft.distance / params.avg_distance).ceil() as usize;
        let children = children.max(1);
        let total_seconds = draft.duration_seconds();

        let jitter: Vec<f64> = (0..children).map(|_| rng.gen_range(0.8..1.2)).collect();
        let jitter_sum: f64 = jitter.iter().sum();

        debug!(
            gps_id = %draft.gps_id,
            children,
            distance = draft.distance,
            "Splitting oversized route"
        );

        let mut start = draft.start;
        for (i, weight) in jitter.iter().enumerate() {
            let seconds = weight / jitter_sum * total_seconds;
            let end = if i == children - 1 {
                draft.end
            } else {
                start + Duration::milliseconds((seconds * 1000.0).round() as i64)
            };
            out.push(RouteDraft {
                gps_id: draft.gps_id.clone(),
                start,
                end,
                distance: draft.distance * (seconds / total_seconds),
                external_key: draft.external_key.clone(),
            });
            start = end;
        }
    }
    out
}

/// Routes with their ids, split by address resolution.
pub struct ResolvedRoutes {
    /// Rows that resolved to an address, directly or through the fallback
    pub resolved: Vec<(RouteDraft, u64, String)>,
    /// Rows dropped because their device is known to be unassigned
    pub dropped_unassigned: usize,
}

/// Resolve each route's destination address through the device map, then
/// the per-source fallback. Devices that still resolve to nothing must all
/// be on the known-unassigned list (their rows are test devices and are
/// dropped); any other unresolved device means the upstream catalog is
/// inconsistent and fails the partition.
pub fn resolve_addresses(
    rows: Vec<(RouteDraft, u64)>,
    address_map: &std::collections::BTreeMap<String, String>,
    known_unassigned: &std::collections::HashSet<String>,
    fallback_address: Option<&str>,
) -> std::result::Result<ResolvedRoutes, roda_core::IntegrityError> {
    let mut resolved = Vec::with_capacity(rows.len());
    let mut dropped_unassigned = 0;
    let mut unknown: Vec<String> = Vec::new();

    for (draft, route_id) in rows {
        let address = address_map
            .get(&draft.gps_id)
            .map(String::as_str)
            .or(fallback_address);
        match address {
            Some(address) => resolved.push((draft, route_id, address.to_owned())),
            None if known_unassigned.contains(&draft.gps_id) => dropped_unassigned += 1,
            None => {
                if !unknown.contains(&draft.gps_id) {
                    unknown.push(draft.gps_id.clone());
                }
            }
        }
    }

    if !unknown.is_empty() {
        return Err(roda_core::IntegrityError::UnresolvedDevices { devices: unknown });
    }
    Ok(ResolvedRoutes {
        resolved,
        dropped_unassigned,
    })
}

/// Render a timestamp in the configured output format; `"unix"` renders
/// seconds since epoch.
pub fn format_timestamp(dt: NaiveDateTime, output_format: &str) -> String {
    if output_format == "unix" {
        dt.and_utc().timestamp().to_string()
    } else {
        dt.format(output_format).to_string()
    }
}

/// Project a finished draft into the canonical CSV row.
pub fn to_record(
    draft: &RouteDraft,
    route_id: u64,
    celo_address: String,
    output_format: &str,
) -> CanonicalRouteRecord {
    CanonicalRouteRecord {
        gps_id: draft.gps_id.clone(),
        timestamp_start: format_timestamp(draft.start, output_format),
        timestamp_end: format_timestamp(draft.end, output_format),
        measured_distance: draft.distance.round() as i64,
        celo_address,
        route_id,
    }
}

#[cfg(test)]
mod test {
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn draft(distance: f64, seconds: i64) -> RouteDraft {
        RouteDraft {
            gps_id: "GPS001".into(),
            start: at(8, 0, 0),
            end: at(8, 0, 0) + Duration::seconds(seconds),
            distance,
            external_key: "R-1".into(),
        }
    }

    #[test]
    fn parse_drops_uncoercible_rows() {
        let raw = b"k_dispositivo,o_fecha_inicial,o_fecha_final,f_distancia,k_ruta\n\
GPS001,2024-01-15 08:00:00,2024-01-15 08:30:00,5200,r1\n\
GPS002,not-a-date,2024-01-15 09:00:00,900,r2\n\
GPS003,2024-01-15 10:00:00,2024-01-15 09:00:00,900,r3\n\
GPS004,2024-01-15 10:00:00,2024-01-15 10:20:00,abc,r4\n";
        let parsed = parse_rows(raw, &ColumnMap::default(), "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parsed.drafts.len(), 1);
        assert_eq!(parsed.dropped, 3);
        assert_eq!(parsed.drafts[0].gps_id, "GPS001");
        assert_eq!(parsed.drafts[0].duration_minutes(), 30.0);
    }

    #[test]
    fn missing_column_fails_the_partition() {
        let raw = b"device,start,end\n";
        assert!(parse_rows(raw, &ColumnMap::default(), "%Y-%m-%d %H:%M:%S").is_err());
    }

    #[test]
    fn distance_ceiling_clamps_implausible_rows() {
        // 30 km claimed in one hour at a 25 km/h ceiling clamps to 25 km.
        let mut drafts = vec![draft(30_000.0, 3_600)];
        let adjusted = clamp_to_max_speed(&mut drafts, 25_000.0);
        assert_eq!(adjusted, 1);
        assert_eq!(drafts[0].distance, 25_000.0);

        // A plausible row is untouched.
        let mut drafts = vec![draft(10_000.0, 3_600)];
        assert_eq!(clamp_to_max_speed(&mut drafts, 25_000.0), 0);
        assert_eq!(drafts[0].distance, 10_000.0);
    }

    #[test]
    fn split_conserves_distance_and_duration() {
        let original = draft(30_000.0, 1_800);
        let params = SplitParams {
            avg_distance: 8_000.0,
            max_distance: 12_000.0,
        };
        let mut rng = StdRng::seed_from_u64(42);
        let children = split_routes(vec![original.clone()], &params, &mut rng);

        assert_eq!(children.len(), 4);
        let total_distance: f64 = children.iter().map(|c| c.distance).sum();
        assert!((total_distance - 30_000.0).abs() < 1e-6);
        let total_seconds: i64 = children
            .iter()
            .map(|c| (c.end - c.start).num_seconds())
            .sum();
        assert_eq!(total_seconds, 1_800);
        assert_eq!(children[0].start, original.start);
        assert_eq!(children[3].end, original.end);

        // Children are contiguous.
        for pair in children.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        // No child got all the distance.
        assert!(children.iter().all(|c| c.distance < 30_000.0));
    }

    #[test]
    fn routes_under_the_limit_are_not_split() {
        let params = SplitParams {
            avg_distance: 8_000.0,
            max_distance: 12_000.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let out = split_routes(vec![draft(11_999.0, 900)], &params, &mut rng);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].distance, 11_999.0);
    }

    #[test]
    fn unresolved_devices_fail_the_partition() {
        use std::collections::{BTreeMap, HashSet};

        let map = BTreeMap::from([("GPS001".to_owned(), "0xaa".to_owned())]);
        let known = HashSet::from(["BENCH01".to_owned()]);

        let mut mystery = draft(900.0, 300);
        mystery.gps_id = "GPS999".into();
        let rows = vec![(draft(900.0, 300), 1100001), (mystery, 1100002)];
        let err = resolve_addresses(rows, &map, &known, None).unwrap_err();
        assert_eq!(
            err,
            roda_core::IntegrityError::UnresolvedDevices {
                devices: vec!["GPS999".into()]
            }
        );
    }

    #[test]
    fn known_unassigned_devices_are_dropped_quietly() {
        use std::collections::{BTreeMap, HashSet};

        let map = BTreeMap::from([("GPS001".to_owned(), "0xaa".to_owned())]);
        let known = HashSet::from(["BENCH01".to_owned()]);

        let mut bench = draft(900.0, 300);
        bench.gps_id = "BENCH01".into();
        let rows = vec![(draft(900.0, 300), 1100001), (bench, 1100002)];
        let out = resolve_addresses(rows, &map, &known, None).unwrap();
        assert_eq!(out.resolved.len(), 1);
        assert_eq!(out.dropped_unassigned, 1);
        assert_eq!(out.resolved[0].2, "0xaa");
    }

    #[test]
    fn fallback_address_covers_unmapped_devices() {
        use std::collections::{BTreeMap, HashSet};

        let mut unmapped = draft(900.0, 300);
        unmapped.gps_id = "GPS777".into();
        let rows = vec![(unmapped, 2100001)];
        let out =
            resolve_addresses(rows, &BTreeMap::new(), &HashSet::new(), Some("0xfb")).unwrap();
        assert_eq!(out.resolved[0].2, "0xfb");
    }

    #[test]
    fn unix_output_format_renders_epoch_seconds() {
        let dt = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap();
        assert_eq!(format_timestamp(dt, "unix"), "3600");
        assert_eq!(format_timestamp(dt, "%Y-%m-%d %H:%M"), "1970-01-01 01:00");
    }

    #[test]
    fn records_round_distances_to_whole_meters() {
        let record = to_record(&draft(5_199.6, 600), 1100001, "0xabc".into(), "unix");
        assert_eq!(record.measured_distance, 5_200);
        assert_eq!(record.route_id, 1100001);
    }
}
