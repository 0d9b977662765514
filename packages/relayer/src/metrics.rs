//! Prometheus metrics for the bridge relayer
//!
//! The relayer is a batch job, so metrics are not scraped; at the end of a run
//! they are written to a node-exporter textfile collector file.

use eyre::{Result, WrapErr};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge,
    GaugeVec, TextEncoder,
};
use std::path::Path;

use crate::db::RequestStats;
use crate::types::RequestStatus;

lazy_static! {
    pub static ref EVENTS_INGESTED: CounterVec = register_counter_vec!(
        "bridge_relayer_events_ingested_total",
        "Total number of new bridge requests ingested",
        &["chain"]
    ).unwrap();

    pub static ref SCAN_ERRORS: CounterVec = register_counter_vec!(
        "bridge_relayer_scan_errors_total",
        "Total number of failed chain scans",
        &["chain"]
    ).unwrap();

    pub static ref CHECKPOINT_BLOCK: GaugeVec = register_gauge_vec!(
        "bridge_relayer_checkpoint_block",
        "Last fully scanned block",
        &["chain"]
    ).unwrap();

    pub static ref RELEASE_OUTCOMES: CounterVec = register_counter_vec!(
        "bridge_relayer_release_outcomes_total",
        "Outcomes of release processing",
        &["dest_chain", "outcome"]
    ).unwrap();

    pub static ref EVENTS_REJECTED: CounterVec = register_counter_vec!(
        "bridge_relayer_events_rejected_total",
        "Bridge logs dropped during a scan",
        &["chain", "reason"]
    ).unwrap();

    pub static ref RELEASE_ERRORS: CounterVec = register_counter_vec!(
        "bridge_relayer_release_errors_total",
        "Failed release submissions by error kind",
        &["dest_chain", "kind"]
    ).unwrap();

    pub static ref REQUESTS_BY_STATUS: GaugeVec = register_gauge_vec!(
        "bridge_relayer_requests",
        "Stored bridge requests by status",
        &["status"]
    ).unwrap();

    pub static ref LAST_RUN_TIMESTAMP: Gauge = register_gauge!(
        "bridge_relayer_last_run_timestamp_seconds",
        "Unix timestamp of the last completed run"
    ).unwrap();
}

pub fn record_events_ingested(chain: &str, count: usize) {
    EVENTS_INGESTED
        .with_label_values(&[chain])
        .inc_by(count as f64);
}

pub fn record_scan_error(chain: &str) {
    SCAN_ERRORS.with_label_values(&[chain]).inc();
}

pub fn record_checkpoint(chain: &str, block_number: u64) {
    CHECKPOINT_BLOCK
        .with_label_values(&[chain])
        .set(block_number as f64);
}

pub fn record_release_outcome(dest_chain: &str, outcome: &str) {
    RELEASE_OUTCOMES
        .with_label_values(&[dest_chain, outcome])
        .inc();
}

/// Count a bridge log that was skipped instead of stored
pub fn record_event_rejected(chain: &str, reason: &str) {
    EVENTS_REJECTED.with_label_values(&[chain, reason]).inc();
}

pub fn record_release_error(dest_chain: &str, kind: &str) {
    RELEASE_ERRORS.with_label_values(&[dest_chain, kind]).inc();
}

/// Update the status gauges from a store snapshot
pub fn record_status_totals(stats: &RequestStats) {
    for status in RequestStatus::ALL {
        REQUESTS_BY_STATUS
            .with_label_values(&[status.as_str()])
            .set(stats.get(status) as f64);
    }
}

pub fn record_run_finished() {
    LAST_RUN_TIMESTAMP.set(chrono::Utc::now().timestamp() as f64);
}

/// Render all registered metrics in the text exposition format
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .wrap_err("Failed to encode metrics")?;
    String::from_utf8(buffer).wrap_err("Metrics output is not UTF-8")
}

/// Atomically replace `path` with the current metrics
pub fn write_textfile(path: &Path) -> Result<()> {
    let body = render()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, body)
        .wrap_err_with(|| format!("Failed to write metrics to {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .wrap_err_with(|| format!("Failed to move metrics into {}", path.display()))?;
    Ok(())
}
