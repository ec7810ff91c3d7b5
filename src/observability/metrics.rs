//! Prometheus metrics for the ledger.
//!
//! Every recorder compiles to a no-op without the `prometheus` feature, so
//! call sites never need their own `cfg` guards.

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from inside a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let addr: std::net::SocketAddr = config
        .listen
        .parse()
        .map_err(|e| MetricsError::Setup(format!("invalid listen address '{}': {e}", config.listen)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %addr, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!("Metrics are enabled in config but the 'prometheus' feature is not compiled in");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a ledger write.
///
/// `kind` is `"ingest"` or `"write_through"`; `outcome` is `"applied"`,
/// `"conflict"` or `"error"`.
pub fn record_ledger_write(kind: &str, outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("ledger_writes_total", "kind" => kind.to_string(), "outcome" => outcome.to_string())
            .increment(1);

        histogram!("ledger_write_duration_seconds", "kind" => kind.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, outcome, duration_secs);
    }
}

/// Record a lost optimistic-concurrency race on a raw usage row.
pub fn record_write_retry() {
    #[cfg(feature = "prometheus")]
    {
        counter!("ledger_write_retries_total").increment(1);
    }
}

/// Record one lease ingestion pass.
pub fn record_ingestion(outcome: &str, events: usize) {
    #[cfg(feature = "prometheus")]
    {
        counter!("ingestion_runs_total", "outcome" => outcome.to_string()).increment(1);
        counter!("ingestion_events_total").increment(events as u64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, events);
    }
}

/// Record a spend calculation.
pub fn record_spend_calculation(success: bool, over_budget: bool) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "error" };
        counter!("spend_calculations_total", "status" => status.to_string()).increment(1);
        if over_budget {
            counter!("spend_over_budget_total").increment(1);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (success, over_budget);
    }
}

/// Record an analytics request against the cost source.
pub fn record_analytics_request(operation: &str, status: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("analytics_requests_total", "operation" => operation.to_string(), "status" => status.to_string())
            .increment(1);

        histogram!("analytics_request_duration_seconds", "operation" => operation.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (operation, status, duration_secs);
    }
}

/// Record rows removed by the purge worker.
///
/// # Arguments
/// * `table` - The table the rows were deleted from (e.g., "usage_events")
/// * `count` - The number of rows deleted
pub fn record_retention_deletion(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_deletions_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
