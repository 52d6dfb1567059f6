use serde::Deserialize;

/// Default input format: how the fleet tracker renders timestamps.
pub const DEFAULT_INPUT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default output format. `"unix"` renders seconds since epoch, which is
/// what the route publisher requires downstream.
pub const DEFAULT_OUTPUT_DATETIME_FORMAT: &str = "unix";

/// A half-open range filter: keep values in `(min, max]`; no upper bound
/// when `max` is absent.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeFilter {
    /// Exclusive lower bound
    pub min: f64,
    /// Inclusive upper bound
    #[serde(default)]
    pub max: Option<f64>,
}

impl RangeFilter {
    /// Whether a value passes the filter.
    pub fn accepts(&self, value: f64) -> bool {
        value > self.min && self.max.map_or(true, |max| value <= max)
    }
}

/// Parameters for the distance ceiling correction.
#[derive(Debug, Clone, Deserialize)]
pub struct DistanceFix {
    /// Maximum plausible meters covered in one hour
    pub expected_max_per_hour: f64,
}

/// Parameters for splitting oversized routes.
#[derive(Debug, Clone, Deserialize)]
pub struct SplitParams {
    /// Target average distance per child route, meters
    pub avg_distance: f64,
    /// Distance above which a route is split, meters
    pub max_distance: f64,
}

/// Which raw CSV columns carry each field. Defaults match the fleet
/// tracker's export schema.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMap {
    /// Device identifier column
    #[serde(default = "default_device_column")]
    pub device: String,
    /// Start timestamp column
    #[serde(default = "default_start_column")]
    pub start: String,
    /// End timestamp column
    #[serde(default = "default_end_column")]
    pub end: String,
    /// Distance column, meters
    #[serde(default = "default_distance_column")]
    pub distance: String,
    /// Opaque external route key column
    #[serde(default = "default_route_key_column")]
    pub route_key: String,
}

fn default_device_column() -> String {
    "k_dispositivo".to_owned()
}
fn default_start_column() -> String {
    "o_fecha_inicial".to_owned()
}
fn default_end_column() -> String {
    "o_fecha_final".to_owned()
}
fn default_distance_column() -> String {
    "f_distancia".to_owned()
}
fn default_route_key_column() -> String {
    "k_ruta".to_owned()
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            device: default_device_column(),
            start: default_start_column(),
            end: default_end_column(),
            distance: default_distance_column(),
            route_key: default_route_key_column(),
        }
    }
}

/// Per-source transform parameters, stored as YAML under
/// `tribu_metadata/transformations_{source}.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformParams {
    /// Distance filter, meters
    #[serde(default)]
    pub distance_filter: Option<RangeFilter>,
    /// Duration filter, minutes
    #[serde(default)]
    pub duration_filter: Option<RangeFilter>,
    /// Distance ceiling correction
    #[serde(default)]
    pub distance_fix: Option<DistanceFix>,
    /// Route splitting
    #[serde(default)]
    pub split_big_routes: Option<SplitParams>,
    /// strftime format of the raw timestamps
    #[serde(default = "default_input_format")]
    pub input_datetime_format: String,
    /// strftime format of the canonical timestamps, or `"unix"`
    #[serde(default = "default_output_format")]
    pub output_datetime_format: String,
    /// Raw column names
    #[serde(default)]
    pub columns: ColumnMap,
    /// Override for the source-family id prefix
    #[serde(default)]
    pub id_prefix: Option<u64>,
    /// Address assigned to routes whose device has no mapping
    #[serde(default)]
    pub fallback_address: Option<String>,
}

fn default_input_format() -> String {
    DEFAULT_INPUT_DATETIME_FORMAT.to_owned()
}

fn default_output_format() -> String {
    DEFAULT_OUTPUT_DATETIME_FORMAT.to_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn range_filter_is_half_open() {
        let f = RangeFilter {
            min: 2.0,
            max: Some(90.0),
        };
        assert!(!f.accepts(2.0));
        assert!(f.accepts(2.1));
        assert!(f.accepts(90.0));
        assert!(!f.accepts(90.1));

        let unbounded = RangeFilter { min: 0.0, max: None };
        assert!(unbounded.accepts(9_000_000.0));
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let yaml = r#"
distance_filter:
  min: 0
  max: 9000000
duration_filter:
  min: 2
  max: 90
distance_fix:
  expected_max_per_hour: 25000
split_big_routes:
  avg_distance: 8000
  max_distance: 12000
"#;
        let params: TransformParams = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(params.input_datetime_format, DEFAULT_INPUT_DATETIME_FORMAT);
        assert_eq!(params.output_datetime_format, "unix");
        assert_eq!(params.columns.device, "k_dispositivo");
        assert!(params.fallback_address.is_none());
        assert_eq!(params.split_big_routes.unwrap().avg_distance, 8000.0);
    }
}
