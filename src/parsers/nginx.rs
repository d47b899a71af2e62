use super::{error_metric, ScrapeState};
use crate::model::{Metric, MetricName};
use prometheus_parse::{Sample, Scrape, Value};
use std::collections::HashMap;

const METRIC_REQUESTS: &str = "nginx_ingress_controller_requests";
const METRIC_DURATION_SUM: &str = "nginx_ingress_controller_request_duration_seconds_sum";
const METRIC_DURATION_COUNT: &str = "nginx_ingress_controller_request_duration_seconds_count";

/// Translates the two Nginx ingress-controller families this agent recognises.
/// Everything else in the scrape body is ignored.
pub fn parse(scrape: &Scrape, _state: &ScrapeState) -> Vec<Metric> {
    let mut metrics = Vec::new();
    let mut durations: HashMap<(String, String), (f64, u64)> = HashMap::new();

    for sample in &scrape.samples {
        match sample.metric.as_str() {
            METRIC_REQUESTS => {
                let Some((ingress, service)) = ingress_service_key(sample) else {
                    continue;
                };
                let Some(value) = sample_value(sample) else {
                    continue;
                };
                let count = value.round().max(0.0) as u64;
                metrics.push(Metric::Counter {
                    name: MetricName::Requests,
                    ingress: ingress.clone(),
                    service: service.clone(),
                    value: count,
                });
                if let Some(status) = sample.labels.get("status") {
                    if let Some(error_name) = error_metric(status) {
                        metrics.push(Metric::Counter {
                            name: error_name,
                            ingress,
                            service,
                            value: count,
                        });
                    }
                }
            }
            METRIC_DURATION_SUM => {
                let Some(key) = ingress_service_key(sample) else {
                    continue;
                };
                let Some(value) = sample_value(sample) else {
                    continue;
                };
                durations.entry(key).or_insert((0.0, 0)).0 += value;
            }
            METRIC_DURATION_COUNT => {
                let Some(key) = ingress_service_key(sample) else {
                    continue;
                };
                let Some(value) = sample_value(sample) else {
                    continue;
                };
                durations.entry(key).or_insert((0.0, 0)).1 += value.round().max(0.0) as u64;
            }
            _ => {}
        }
    }

    for ((ingress, service), (sum, count)) in durations {
        metrics.push(Metric::Histogram {
            name: MetricName::RequestDuration,
            ingress,
            service,
            relative: false,
            sum,
            count,
        });
    }

    metrics
}

fn ingress_service_key(sample: &Sample) -> Option<(String, String)> {
    let namespace = sample.labels.get("namespace")?;
    let ingress = sample.labels.get("ingress")?;
    let service = sample.labels.get("service")?;
    Some((
        format!("{ingress}@{namespace}.ingress.networking.k8s.io"),
        format!("{service}@{namespace}"),
    ))
}

fn sample_value(sample: &Sample) -> Option<f64> {
    match &sample.value {
        Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => Some(*v),
        Value::Histogram(_) | Value::Summary(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scrape(body: &str) -> Scrape {
        Scrape::parse(body.lines().map(|l| Ok(l.to_string()))).expect("valid exposition")
    }

    #[test]
    fn parses_requests_and_splits_error_classes() {
        let body = "# TYPE nginx_ingress_controller_requests counter\n\
nginx_ingress_controller_requests{namespace=\"myns\",ingress=\"web\",service=\"whoami\",status=\"500\"} 7\n";
        let metrics = parse(&scrape(body), &ScrapeState::default());
        assert_eq!(metrics.len(), 2);
        assert!(metrics
            .iter()
            .any(|m| m.name() == MetricName::Requests && matches!(m, Metric::Counter { value: 7, .. })));
        assert!(metrics
            .iter()
            .any(|m| m.name() == MetricName::RequestErrors && matches!(m, Metric::Counter { value: 7, .. })));
    }

    #[test]
    fn client_error_status_emits_client_error_metric() {
        let body = "nginx_ingress_controller_requests{namespace=\"ns\",ingress=\"i\",service=\"s\",status=\"404\"} 3\n";
        let metrics = parse(&scrape(body), &ScrapeState::default());
        assert!(metrics
            .iter()
            .any(|m| m.name() == MetricName::RequestClientErrors));
    }

    #[test]
    fn success_status_has_no_error_metric() {
        let body = "nginx_ingress_controller_requests{namespace=\"ns\",ingress=\"i\",service=\"s\",status=\"200\"} 3\n";
        let metrics = parse(&scrape(body), &ScrapeState::default());
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn merges_duration_sum_and_count_into_histogram() {
        let body = "nginx_ingress_controller_request_duration_seconds_sum{namespace=\"ns\",ingress=\"i\",service=\"s\"} 4.5\n\
nginx_ingress_controller_request_duration_seconds_count{namespace=\"ns\",ingress=\"i\",service=\"s\"} 10\n";
        let metrics = parse(&scrape(body), &ScrapeState::default());
        assert_eq!(metrics.len(), 1);
        match &metrics[0] {
            Metric::Histogram {
                sum, count, relative, ..
            } => {
                assert_eq!(*sum, 4.5);
                assert_eq!(*count, 10);
                assert!(!relative);
            }
            _ => panic!("expected histogram"),
        }
    }

    #[test]
    fn ignores_samples_missing_required_labels() {
        let body = "nginx_ingress_controller_requests{namespace=\"ns\"} 1\n";
        let metrics = parse(&scrape(body), &ScrapeState::default());
        assert!(metrics.is_empty());
    }
}
