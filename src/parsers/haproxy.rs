use super::ScrapeState;
use crate::model::{Metric, MetricName};
use prometheus_parse::{Sample, Scrape, Value};
use std::collections::HashMap;

const METRIC_AVG_TIME: &str = "haproxy_server_total_time_average_seconds";
const METRIC_RESPONSES: &str = "haproxy_backend_http_responses_total";

/// The synthetic sample count HAProxy's time-average gauge is converted into.
/// Chosen to give the relative histogram a stable, non-zero weight.
const SYNTHETIC_SAMPLE_COUNT: u64 = 1024;

/// Translates the two HAProxy families this agent recognises. Proxy-name to
/// service resolution is a lossy prefix match, cached for the parser's lifetime.
pub fn parse(
    scrape: &Scrape,
    state: &ScrapeState,
    proxy_cache: &mut HashMap<String, Option<String>>,
) -> Vec<Metric> {
    let mut metrics = Vec::new();

    for sample in &scrape.samples {
        match sample.metric.as_str() {
            METRIC_AVG_TIME => {
                let Some(gauge) = sample_value(sample) else {
                    continue;
                };
                if gauge == 0.0 {
                    continue;
                }
                let Some(proxy) = sample.labels.get("proxy") else {
                    continue;
                };
                let Some(service) = resolve_service(proxy, state, proxy_cache) else {
                    continue;
                };
                metrics.push(Metric::Histogram {
                    name: MetricName::RequestDuration,
                    ingress: String::new(),
                    service,
                    relative: true,
                    sum: gauge * SYNTHETIC_SAMPLE_COUNT as f64,
                    count: SYNTHETIC_SAMPLE_COUNT,
                });
            }
            METRIC_RESPONSES => {
                let Some(value) = sample_value(sample) else {
                    continue;
                };
                let Some(proxy) = sample.labels.get("proxy") else {
                    continue;
                };
                let Some(service) = resolve_service(proxy, state, proxy_cache) else {
                    continue;
                };
                metrics.push(Metric::Counter {
                    name: MetricName::Requests,
                    ingress: String::new(),
                    service,
                    value: value.round().max(0.0) as u64,
                });
            }
            _ => {}
        }
    }

    metrics
}

fn sample_value(sample: &Sample) -> Option<f64> {
    match &sample.value {
        Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => Some(*v),
        Value::Histogram(_) | Value::Summary(_) => None,
    }
}

/// Matches a `proxy` label against a known service by trying both
/// `{namespace}_{name}_` and `{namespace}-{name}-` as a prefix. First match
/// (in lexicographic service order) wins and is cached by proxy name.
fn resolve_service(
    proxy: &str,
    state: &ScrapeState,
    cache: &mut HashMap<String, Option<String>>,
) -> Option<String> {
    if let Some(cached) = cache.get(proxy) {
        return cached.clone();
    }

    let mut services: Vec<&String> = state.service_ingresses.keys().collect();
    services.sort();

    let mut resolved = None;
    'outer: for service in services {
        let Some((name, namespace)) = service.split_once('@') else {
            continue;
        };
        for sep in ["_", "-"] {
            let prefix = format!("{namespace}{sep}{name}{sep}");
            if proxy.starts_with(&prefix) {
                resolved = Some(service.clone());
                break 'outer;
            }
        }
    }

    cache.insert(proxy.to_string(), resolved.clone());
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scrape(body: &str) -> Scrape {
        Scrape::parse(body.lines().map(|l| Ok(l.to_string()))).expect("valid exposition")
    }

    fn state_with_service(service: &str) -> ScrapeState {
        let mut state = ScrapeState::default();
        state.service_ingresses.insert(service.to_string(), Vec::new());
        state
    }

    #[test]
    fn average_time_becomes_relative_histogram() {
        let state = state_with_service("whoami@default");
        let body = "haproxy_server_total_time_average_seconds{proxy=\"default_whoami_80\"} 0.025\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert_eq!(metrics.len(), 1);
        match &metrics[0] {
            Metric::Histogram {
                relative, sum, count, service, ..
            } => {
                assert!(relative);
                assert_eq!(*count, 1024);
                assert_eq!(*sum, 0.025 * 1024.0);
                assert_eq!(service, "whoami@default");
            }
            _ => panic!("expected histogram"),
        }
    }

    #[test]
    fn zero_gauge_is_skipped() {
        let state = state_with_service("whoami@default");
        let body = "haproxy_server_total_time_average_seconds{proxy=\"default_whoami_80\"} 0\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert!(metrics.is_empty());
    }

    #[test]
    fn dash_separator_also_matches() {
        let state = state_with_service("whoami@default");
        let body = "haproxy_backend_http_responses_total{proxy=\"default-whoami-80\"} 12\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].service(), "whoami@default");
    }

    #[test]
    fn unmatched_proxy_is_dropped() {
        let state = ScrapeState::default();
        let body = "haproxy_backend_http_responses_total{proxy=\"nothing_here_80\"} 12\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert!(metrics.is_empty());
    }

    #[test]
    fn proxy_resolution_is_cached() {
        let state = state_with_service("whoami@default");
        let mut cache = HashMap::new();
        let body = "haproxy_backend_http_responses_total{proxy=\"default_whoami_80\"} 1\n";
        parse(&scrape(body), &state, &mut cache);
        parse(&scrape(body), &state, &mut cache);
        assert_eq!(cache.len(), 1);
    }
}
