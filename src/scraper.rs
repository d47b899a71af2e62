//! Periodic HTTP scrape of an ingress controller's Prometheus exposition endpoints.
//!
//! A target whose status is not 200, whose body fails to decode, or whose HTTP call
//! fails is logged and skipped — a failing target never fails the whole scrape.

use crate::model::Metric;
use crate::parsers::{self, ParserCache, ParserKind, ScrapeState};
use futures::future::join_all;
use prometheus_parse::Scrape;

/// Scrapes every target concurrently and returns the concatenated metric list from
/// every target that answered successfully. `controller` labels the self-observability
/// counters this records for each target attempt.
pub async fn scrape_targets(
    client: &reqwest::Client,
    controller: &str,
    kind: ParserKind,
    urls: &[String],
    scrape_state: &ScrapeState,
    cache: &mut ParserCache,
) -> Vec<Metric> {
    let bodies = join_all(urls.iter().map(|url| fetch(client, url))).await;

    let mut metrics = Vec::new();
    for (url, body) in urls.iter().zip(bodies) {
        let text = match body {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(target = %url, error = %err, "scrape target failed");
                crate::metrics::record_scrape(controller, false);
                crate::metrics::record_target_skipped(controller);
                continue;
            }
        };

        let scrape = match Scrape::parse(text.lines().map(|l| Ok(l.to_string()))) {
            Ok(scrape) => scrape,
            Err(err) => {
                tracing::warn!(target = %url, error = %err, "failed to decode prometheus exposition body");
                crate::metrics::record_scrape(controller, false);
                crate::metrics::record_target_skipped(controller);
                continue;
            }
        };

        crate::metrics::record_scrape(controller, true);
        metrics.extend(parsers::parse(kind, &scrape, scrape_state, cache));
    }

    metrics
}

async fn fetch(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        anyhow::bail!("unexpected status {status}");
    }
    Ok(response.text().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn concatenates_metrics_from_every_successful_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "nginx_ingress_controller_requests{namespace=\"ns\",ingress=\"i\",service=\"s\",status=\"200\"} 1\n",
            ))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let urls = vec![format!("{}/metrics", server.uri())];
        let mut cache = ParserCache::None;
        let metrics = scrape_targets(&client, "nginx", ParserKind::Nginx, &urls, &ScrapeState::default(), &mut cache).await;
        assert_eq!(metrics.len(), 1);
    }

    #[tokio::test]
    async fn failing_target_is_skipped_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let urls = vec![format!("{}/metrics", server.uri())];
        let mut cache = ParserCache::None;
        let metrics = scrape_targets(&client, "nginx", ParserKind::Nginx, &urls, &ScrapeState::default(), &mut cache).await;
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn undecodable_body_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0x00]))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let urls = vec![format!("{}/metrics", server.uri())];
        let mut cache = ParserCache::None;
        let metrics = scrape_targets(&client, "nginx", ParserKind::Nginx, &urls, &ScrapeState::default(), &mut cache).await;
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn mixed_targets_keep_successful_results() {
        let good = MockServer::start().await;
        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "nginx_ingress_controller_requests{namespace=\"ns\",ingress=\"i\",service=\"s\",status=\"200\"} 1\n",
            ))
            .mount(&good)
            .await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&bad)
            .await;

        let client = reqwest::Client::new();
        let urls = vec![format!("{}/metrics", good.uri()), format!("{}/metrics", bad.uri())];
        let mut cache = ParserCache::None;
        let metrics = scrape_targets(&client, "nginx", ParserKind::Nginx, &urls, &ScrapeState::default(), &mut cache).await;
        assert_eq!(metrics.len(), 1);
    }
}
