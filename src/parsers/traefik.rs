use super::{error_metric, Identifier, ScrapeState};
use crate::model::{Metric, MetricName};
use prometheus_parse::{Sample, Scrape, Value};
use std::collections::HashMap;

const METRIC_SERVICE_DURATION_SUM: &str = "traefik_service_request_duration_seconds_sum";
const METRIC_SERVICE_DURATION_COUNT: &str = "traefik_service_request_duration_seconds_count";
const METRIC_SERVICE_REQUESTS: &str = "traefik_service_requests_total";
const METRIC_ROUTER_DURATION_SUM: &str = "traefik_router_request_duration_seconds_sum";
const METRIC_ROUTER_DURATION_COUNT: &str = "traefik_router_request_duration_seconds_count";
const METRIC_ROUTER_REQUESTS: &str = "traefik_router_requests_total";

/// Translates the four Traefik service/router families this agent recognises.
///
/// Service-level metrics carry `service` but not `ingress` (they cannot be attributed
/// to a single ingress accurately). Router-level metrics carry `ingress` but not
/// `service`, resolved by disassembling the router name.
pub fn parse(
    scrape: &Scrape,
    state: &ScrapeState,
    router_cache: &mut HashMap<String, Option<Identifier>>,
) -> Vec<Metric> {
    let mut metrics = Vec::new();
    let mut service_durations: HashMap<String, (f64, u64)> = HashMap::new();
    let mut router_durations: HashMap<String, (f64, u64)> = HashMap::new();

    for sample in &scrape.samples {
        match sample.metric.as_str() {
            METRIC_SERVICE_DURATION_SUM => {
                if let (Some(service), Some(value)) = (resolve_service(sample, state), sample_value(sample)) {
                    service_durations.entry(service).or_insert((0.0, 0)).0 += value;
                }
            }
            METRIC_SERVICE_DURATION_COUNT => {
                if let (Some(service), Some(value)) = (resolve_service(sample, state), sample_value(sample)) {
                    service_durations.entry(service).or_insert((0.0, 0)).1 += value.round().max(0.0) as u64;
                }
            }
            METRIC_SERVICE_REQUESTS => {
                let Some(service) = resolve_service(sample, state) else {
                    continue;
                };
                let Some(value) = sample_value(sample) else {
                    continue;
                };
                let count = value.round().max(0.0) as u64;
                metrics.push(Metric::Counter {
                    name: MetricName::Requests,
                    ingress: String::new(),
                    service: service.clone(),
                    value: count,
                });
                if let Some(status) = sample.labels.get("code") {
                    if let Some(error_name) = error_metric(status) {
                        metrics.push(Metric::Counter {
                            name: error_name,
                            ingress: String::new(),
                            service,
                            value: count,
                        });
                    }
                }
            }
            METRIC_ROUTER_DURATION_SUM => {
                if let Some(ingress) = resolve_router(sample, state, router_cache) {
                    if let Some(value) = sample_value(sample) {
                        router_durations.entry(ingress).or_insert((0.0, 0)).0 += value;
                    }
                }
            }
            METRIC_ROUTER_DURATION_COUNT => {
                if let Some(ingress) = resolve_router(sample, state, router_cache) {
                    if let Some(value) = sample_value(sample) {
                        router_durations.entry(ingress).or_insert((0.0, 0)).1 += value.round().max(0.0) as u64;
                    }
                }
            }
            METRIC_ROUTER_REQUESTS => {
                let Some(ingress) = resolve_router(sample, state, router_cache) else {
                    continue;
                };
                let Some(value) = sample_value(sample) else {
                    continue;
                };
                let count = value.round().max(0.0) as u64;
                metrics.push(Metric::Counter {
                    name: MetricName::Requests,
                    ingress: ingress.clone(),
                    service: String::new(),
                    value: count,
                });
                if let Some(status) = sample.labels.get("code") {
                    if let Some(error_name) = error_metric(status) {
                        metrics.push(Metric::Counter {
                            name: error_name,
                            ingress,
                            service: String::new(),
                            value: count,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    for (service, (sum, count)) in service_durations {
        metrics.push(Metric::Histogram {
            name: MetricName::RequestDuration,
            ingress: String::new(),
            service,
            relative: false,
            sum,
            count,
        });
    }
    for (ingress, (sum, count)) in router_durations {
        metrics.push(Metric::Histogram {
            name: MetricName::RequestDuration,
            ingress,
            service: String::new(),
            relative: false,
            sum,
            count,
        });
    }

    metrics
}

fn sample_value(sample: &Sample) -> Option<f64> {
    match &sample.value {
        Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => Some(*v),
        Value::Histogram(_) | Value::Summary(_) => None,
    }
}

/// Resolves the Traefik-internal `service` label (`short-name@provider`) to the
/// canonical `service@namespace` identifier via the topology-supplied alias map.
fn resolve_service(sample: &Sample, state: &ScrapeState) -> Option<String> {
    let raw = sample.labels.get("service")?;
    let (short_name, _provider) = raw.split_once('@')?;
    state.traefik_service_names.get(short_name).cloned()
}

/// Resolves a router name to a known ingress identifier.
///
/// Router names embed either `namespace-name-...` (Traefik >= 2.8) or
/// `name-namespace-...` (older), optionally prefixed by an entrypoint name. Both
/// orderings are tried against every known ingress; the first to occur as a
/// substring of the router name wins. Routers whose `type` label is `traefik`
/// (IngressRoute-backed) are resolved against the ingress-route set instead, using
/// only `namespace-name` ordering. Results are cached per router name for the
/// parser's lifetime.
fn resolve_router(
    sample: &Sample,
    state: &ScrapeState,
    cache: &mut HashMap<String, Option<Identifier>>,
) -> Option<Identifier> {
    let router = sample.labels.get("router")?;
    let is_ingress_route = sample.labels.get("type").map(|t| t == "traefik").unwrap_or(false);

    let cache_key = format!("{is_ingress_route}:{router}");
    if let Some(cached) = cache.get(&cache_key) {
        return cached.clone();
    }

    let candidates: Vec<&Identifier> = if is_ingress_route {
        let mut v: Vec<&Identifier> = state.ingress_routes.iter().collect();
        v.sort();
        v
    } else {
        let mut v: Vec<&Identifier> = state.ingresses.iter().collect();
        v.sort();
        v
    };

    let mut resolved = None;
    for id in candidates {
        let Some((name, namespace)) = split_identifier(id) else {
            continue;
        };
        let namespace_first = format!("{namespace}-{name}");
        if router.contains(&namespace_first) {
            resolved = Some(id.clone());
            break;
        }
        if !is_ingress_route {
            let name_first = format!("{name}-{namespace}");
            if router.contains(&name_first) {
                resolved = Some(id.clone());
                break;
            }
        }
    }

    cache.insert(cache_key, resolved.clone());
    resolved
}

fn split_identifier(id: &str) -> Option<(String, String)> {
    let (name, rest) = id.split_once('@')?;
    let namespace = rest.split('.').next()?;
    Some((name.to_string(), namespace.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scrape(body: &str) -> Scrape {
        Scrape::parse(body.lines().map(|l| Ok(l.to_string()))).expect("valid exposition")
    }

    fn state_with_ingress(name: &str, namespace: &str) -> ScrapeState {
        let mut state = ScrapeState::default();
        state
            .ingresses
            .insert(format!("{name}@{namespace}.ingress.networking.k8s.io"));
        state
    }

    #[test]
    fn resolves_service_via_alias_map() {
        let mut state = ScrapeState::default();
        state
            .traefik_service_names
            .insert("default-whoami-80".to_string(), "whoami@default".to_string());
        let body = "traefik_service_requests_total{service=\"default-whoami-80@kubernetes\",code=\"200\"} 5\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].service(), "whoami@default");
        assert_eq!(metrics[0].ingress(), "");
    }

    #[test]
    fn unresolved_service_is_dropped() {
        let state = ScrapeState::default();
        let body = "traefik_service_requests_total{service=\"unknown-80@kubernetes\",code=\"200\"} 5\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert!(metrics.is_empty());
    }

    #[test]
    fn resolves_router_namespace_name_ordering() {
        let state = state_with_ingress("web", "myns");
        let body = "traefik_router_requests_total{router=\"myns-web-websecure@kubernetes\",code=\"500\"} 2\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert!(metrics
            .iter()
            .any(|m| m.ingress() == "web@myns.ingress.networking.k8s.io" && m.service() == ""));
        assert!(metrics.iter().any(|m| m.name() == MetricName::RequestErrors));
    }

    #[test]
    fn resolves_router_name_namespace_ordering() {
        let state = state_with_ingress("web", "myns");
        let body = "traefik_router_requests_total{router=\"web-myns-websecure@kubernetes\",code=\"200\"} 2\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].ingress(), "web@myns.ingress.networking.k8s.io");
    }

    #[test]
    fn ingress_route_type_uses_namespace_name_only() {
        let mut state = ScrapeState::default();
        state
            .ingress_routes
            .insert("web@myns.ingressroute.traefik.io".to_string());
        let body = "traefik_router_requests_total{router=\"myns-web@kubernetes\",code=\"200\",type=\"traefik\"} 1\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].ingress(), "web@myns.ingressroute.traefik.io");
    }

    #[test]
    fn unresolvable_router_is_dropped() {
        let state = ScrapeState::default();
        let body = "traefik_router_requests_total{router=\"nothing-matches@kubernetes\",code=\"200\"} 1\n";
        let metrics = parse(&scrape(body), &state, &mut HashMap::new());
        assert!(metrics.is_empty());
    }

    #[test]
    fn router_resolution_is_cached() {
        let state = state_with_ingress("web", "myns");
        let mut cache = HashMap::new();
        let body = "traefik_router_requests_total{router=\"myns-web@kubernetes\",code=\"200\"} 1\n";
        parse(&scrape(body), &state, &mut cache);
        assert_eq!(cache.len(), 1);
        parse(&scrape(body), &state, &mut cache);
        assert_eq!(cache.len(), 1);
    }
}
