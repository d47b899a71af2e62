//! Self-observability: counters and histograms the agent exposes about its own
//! operation, separate from the ingress metrics it scrapes and stores.

use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    static ref SCRAPES_TOTAL: CounterVec = register_counter_vec!(
        "agent_scrapes_total",
        "Total number of controller scrapes attempted, by controller and outcome",
        &["controller", "outcome"]
    )
    .unwrap();

    static ref SCRAPE_TARGETS_SKIPPED: CounterVec = register_counter_vec!(
        "agent_scrape_targets_skipped_total",
        "Total number of individual scrape targets skipped due to failure",
        &["controller"]
    )
    .unwrap();

    static ref STORE_POINTS: GaugeVec = register_gauge_vec!(
        "agent_store_points",
        "Current number of retained points per table",
        &["table"]
    )
    .unwrap();

    static ref SEND_DURATION: HistogramVec = register_histogram_vec!(
        "agent_backend_send_duration_seconds",
        "Duration of backend Send calls",
        &["outcome"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    static ref ALERTS_EMITTED_TOTAL: CounterVec = register_counter_vec!(
        "agent_alerts_emitted_total",
        "Total number of alerts a threshold processor emitted, by rule id",
        &["rule_id"]
    )
    .unwrap();

    static ref ALERTS_SUPPRESSED_TOTAL: Counter = register_counter!(
        "agent_alerts_suppressed_total",
        "Total number of alerts withheld by backend preflight"
    )
    .unwrap();
}

pub fn record_scrape(controller: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    SCRAPES_TOTAL.with_label_values(&[controller, outcome]).inc();
}

pub fn record_target_skipped(controller: &str) {
    SCRAPE_TARGETS_SKIPPED.with_label_values(&[controller]).inc();
}

pub fn set_store_points(table: &str, count: usize) {
    STORE_POINTS.with_label_values(&[table]).set(count as f64);
}

pub fn observe_send_duration(outcome: &str, seconds: f64) {
    SEND_DURATION.with_label_values(&[outcome]).observe(seconds);
}

pub fn record_alert_emitted(rule_id: &str) {
    ALERTS_EMITTED_TOTAL.with_label_values(&[rule_id]).inc();
}

pub fn record_alerts_suppressed(count: u64) {
    ALERTS_SUPPRESSED_TOTAL.inc_by(count as f64);
}

/// Handler for `GET /metrics`: renders every registered collector in the
/// Prometheus text exposition format.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();

    ([("content-type", "text/plain; version=0.0.4")], buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_does_not_panic() {
        record_scrape("nginx", true);
        record_target_skipped("nginx");
        set_store_points("1m", 12);
        observe_send_duration("success", 0.02);
        record_alert_emitted("r1");
    }
}
