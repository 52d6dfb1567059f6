use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Report, Result};
use tracing::{info, warn};

use crate::metrics::CoreMetrics;
use crate::settings::Settings;

/// How an agent invocation ended.
///
/// Every invocation is a bounded unit of work; "partial" is a normal,
/// successful outcome meaning the runtime budget ran out before the batch
/// did and progress was checkpointed for the next invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Everything the stage set out to do was done.
    Complete,
    /// The publisher stopped cleanly inside its budget with work remaining.
    Partial {
        /// Records confirmed during this invocation
        published: usize,
        /// Records left for the next invocation
        pending: usize,
    },
}

/// Settings of an agent.
pub trait NewFromSettings: AsRef<Settings> + Sized {
    /// The error type returned on failures to parse.
    type Error: Into<Report>;

    /// Create a new instance of these settings by reading the configs and
    /// env vars.
    fn new() -> std::result::Result<Self, Self::Error>;
}

/// One stage of the pipeline, invocable on its own.
#[async_trait]
pub trait Agent: Send + Sync + Sized {
    /// The agent's name
    const AGENT_NAME: &'static str;

    /// The settings object for this agent
    type Settings: NewFromSettings;

    /// Instantiate the agent from the standard settings object.
    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self>;

    /// Run this invocation to completion.
    async fn run(self) -> Result<AgentOutcome>;
}

/// Call this from `main` to fully initialize and run an agent for one
/// invocation. Installs tracing, loads the settings, runs, and logs the
/// metrics summary. A `Partial` outcome exits 0 with a warning; any error
/// propagates and exits non-zero.
pub async fn agent_main<A: Agent>() -> Result<()> {
    let settings = A::Settings::new().map_err(|e| e.into())?;
    settings.as_ref().tracing.start_tracing()?;

    let metrics = Arc::new(CoreMetrics::new(A::AGENT_NAME)?);
    info!(agent = A::AGENT_NAME, "STARTING agent invocation");

    let agent = A::from_settings(settings, metrics.clone()).await?;
    let outcome = agent.run().await;

    metrics.log_summary();
    match outcome? {
        AgentOutcome::Complete => {
            info!(agent = A::AGENT_NAME, "FINISHED SUCCESSFULLY");
        }
        AgentOutcome::Partial { published, pending } => {
            warn!(
                agent = A::AGENT_NAME,
                published, pending, "Stopped within runtime budget; remaining records are left for the next invocation"
            );
        }
    }
    Ok(())
}
