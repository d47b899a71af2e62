//! Family-specific translation from Prometheus exposition families to the common
//! [`crate::model::Metric`] stream.
//!
//! Parser choice is duck-typed in the source this agent is modeled on: any type that
//! exposes a `parse` method satisfying the scrape caller is accepted. We represent that
//! as a closed sum type instead, with the family-name dispatch moved inside each variant.

mod haproxy;
mod nginx;
mod traefik;

use crate::error::AgentError;
use crate::model::Metric;
use prometheus_parse::Scrape;
use std::collections::{HashMap, HashSet};

/// An ingress identifier in the form `name@namespace.kind.group`, or a service
/// identifier in the form `name@namespace`.
pub type Identifier = String;

/// Auxiliary context supplied by the topology component so parsers can resolve
/// scraped labels to stable ingress/service identifiers.
#[derive(Debug, Clone, Default)]
pub struct ScrapeState {
    /// Known ingress identifiers, `name@namespace.ingress.networking.k8s.io`.
    pub ingresses: HashSet<Identifier>,
    /// Known Traefik IngressRoute identifiers, `name@namespace.ingressroute.traefik.io`.
    pub ingress_routes: HashSet<Identifier>,
    /// Service identifier -> ingress identifiers it is reachable from.
    pub service_ingresses: HashMap<String, Vec<Identifier>>,
    /// Traefik short-name (`default-whoami-80`) -> canonical `service@namespace`.
    pub traefik_service_names: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    Nginx,
    Traefik,
    HaProxy,
}

impl ParserKind {
    pub fn from_str(s: &str) -> Result<Self, AgentError> {
        match s {
            "nginx" => Ok(ParserKind::Nginx),
            "traefik" => Ok(ParserKind::Traefik),
            "haproxy" => Ok(ParserKind::HaProxy),
            other => Err(AgentError::UnknownParserKind(other.to_string())),
        }
    }

    /// Per-parser mutable cache. HAProxy and Traefik both memoize lossy
    /// name-guessing; the cache is never shared across parser instances.
    pub fn new_cache(&self) -> ParserCache {
        match self {
            ParserKind::HaProxy => ParserCache::HaProxy(HashMap::new()),
            ParserKind::Traefik => ParserCache::Traefik(HashMap::new()),
            ParserKind::Nginx => ParserCache::None,
        }
    }
}

/// Per-parser, per-lifetime cache for lossy name-guessing heuristics.
#[derive(Debug, Default)]
pub enum ParserCache {
    #[default]
    None,
    /// HAProxy proxy-name -> resolved service, cached for the scraper's lifetime.
    HaProxy(HashMap<String, Option<String>>),
    /// Traefik router-name -> resolved ingress, cached for the scraper's lifetime.
    Traefik(HashMap<String, Option<Identifier>>),
}

/// Parses one scrape body into the common metric stream.
pub fn parse(
    kind: ParserKind,
    scrape: &Scrape,
    state: &ScrapeState,
    cache: &mut ParserCache,
) -> Vec<Metric> {
    match kind {
        ParserKind::Nginx => nginx::parse(scrape, state),
        ParserKind::Traefik => {
            let ParserCache::Traefik(router_cache) = cache else {
                unreachable!("traefik parser requires a traefik cache")
            };
            traefik::parse(scrape, state, router_cache)
        }
        ParserKind::HaProxy => {
            let ParserCache::HaProxy(proxy_cache) = cache else {
                unreachable!("haproxy parser requires a haproxy cache")
            };
            haproxy::parse(scrape, state, proxy_cache)
        }
    }
}

/// Shared error-status duplication rule: a `5xx` requests sample also counts as a
/// request error, a `4xx` sample also counts as a request client error.
pub(crate) fn error_metric_for_status(status: &str) -> Option<crate::model::MetricName> {
    match status.as_bytes().first() {
        Some(b'5') => Some(crate::model::MetricName::RequestErrors),
        Some(b'4') => Some(crate::model::MetricName::RequestClientErrors),
        _ => None,
    }
}

pub(crate) use error_metric_for_status as error_metric;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_kind_from_str_rejects_unknown() {
        assert!(ParserKind::from_str("unknown").is_err());
    }

    #[test]
    fn parser_kind_from_str_accepts_known() {
        assert!(matches!(ParserKind::from_str("nginx"), Ok(ParserKind::Nginx)));
        assert!(matches!(ParserKind::from_str("traefik"), Ok(ParserKind::Traefik)));
        assert!(matches!(ParserKind::from_str("haproxy"), Ok(ParserKind::HaProxy)));
    }

    #[test]
    fn error_metric_maps_status_class() {
        assert!(matches!(
            error_metric("503"),
            Some(crate::model::MetricName::RequestErrors)
        ));
        assert!(matches!(
            error_metric("404"),
            Some(crate::model::MetricName::RequestClientErrors)
        ));
        assert!(error_metric("200").is_none());
    }
}
