use prometheus::{IntCounterVec, IntGauge, Opts, Registry};
use tracing::info;

/// Metrics for one agent invocation.
///
/// The stages are bounded batch jobs rather than servers, so there is no
/// scrape endpoint; the registry is gathered and logged when the agent
/// finishes.
#[derive(Debug)]
pub struct CoreMetrics {
    agent: String,
    registry: Registry,
    rows: IntCounterVec,
    transactions: IntCounterVec,
    latest_route_id: IntGauge,
}

impl CoreMetrics {
    /// Track metrics for the named agent.
    pub fn new(agent: &str) -> prometheus::Result<Self> {
        let namespace = "roda";
        let registry = Registry::new();

        let rows = IntCounterVec::new(
            Opts::new("pipeline_rows", "Rows seen per stage and disposition")
                .namespace(namespace)
                .const_label("agent", agent),
            &["stage", "disposition"],
        )?;
        registry.register(Box::new(rows.clone()))?;

        let transactions = IntCounterVec::new(
            Opts::new(
                "chain_transactions",
                "Chain transactions per record kind and status",
            )
            .namespace(namespace)
            .const_label("agent", agent),
            &["kind", "status"],
        )?;
        registry.register(Box::new(transactions.clone()))?;

        let latest_route_id = IntGauge::with_opts(
            Opts::new("latest_route_id", "Most recent route id issued")
                .namespace(namespace)
                .const_label("agent", agent),
        )?;
        registry.register(Box::new(latest_route_id.clone()))?;

        Ok(Self {
            agent: agent.to_owned(),
            registry,
            rows,
            transactions,
            latest_route_id,
        })
    }

    /// Count rows moving through a transform stage.
    pub fn rows(&self, stage: &str, disposition: &str) -> prometheus::IntCounter {
        self.rows.with_label_values(&[stage, disposition])
    }

    /// Count chain transactions by record kind and status.
    pub fn transactions(&self, kind: &str, status: &str) -> prometheus::IntCounter {
        self.transactions.with_label_values(&[kind, status])
    }

    /// Record the most recent route id issued.
    pub fn latest_route_id(&self) -> IntGauge {
        self.latest_route_id.clone()
    }

    /// Log every non-zero sample collected during this invocation.
    pub fn log_summary(&self) {
        for family in self.registry.gather() {
            for metric in family.get_metric() {
                let value = if metric.has_counter() {
                    metric.get_counter().get_value()
                } else if metric.has_gauge() {
                    metric.get_gauge().get_value()
                } else {
                    continue;
                };
                if value == 0.0 {
                    continue;
                }
                let labels: Vec<String> = metric
                    .get_label()
                    .iter()
                    .map(|l| format!("{}={}", l.get_name(), l.get_value()))
                    .collect();
                info!(
                    agent = %self.agent,
                    metric = family.get_name(),
                    labels = %labels.join(","),
                    value,
                    "metric"
                );
            }
        }
    }
}
