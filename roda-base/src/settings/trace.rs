use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

/// Logging verbosity.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    /// Off
    Off,
    /// Error
    Error,
    /// Warn
    Warn,
    /// Debug
    Debug,
    /// Trace
    Trace,
    /// Info
    #[default]
    #[serde(other)]
    Info,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
            Level::Info => LevelFilter::INFO,
        }
    }
}

/// Output format for the fmt subscriber.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Style {
    /// Pretty, multi-line output for local runs
    Pretty,
    /// Single-line compact output
    Compact,
    /// One JSON object per line, for aggregation
    #[default]
    #[serde(other)]
    Json,
}

/// Configuration for the tracing subscriber used by all agents.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    fmt: Style,
    #[serde(default)]
    level: Level,
}

impl TracingConfig {
    /// Install the global subscriber. Must be called once, before any agent
    /// work starts.
    pub fn start_tracing(&self) -> eyre::Result<()> {
        let builder = tracing_subscriber::fmt().with_max_level(LevelFilter::from(self.level));
        let result = match self.fmt {
            Style::Pretty => builder.pretty().try_init(),
            Style::Compact => builder.compact().try_init(),
            Style::Json => builder.json().try_init(),
        };
        result.map_err(|e| eyre::eyre!("installing tracing subscriber: {e}"))
    }
}
