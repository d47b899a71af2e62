//! Metrics manager: orchestrates scrape → insert → roll-up → send-with-watermarks.

use crate::backend::Backend;
use crate::model::{DataPoint, DataPointGroup, Metric, MetricKey, MetricSet};
use crate::scraper::scrape_targets;
use crate::store::{Store, TableName, ALL_TABLES};
use crate::topology::TopologyState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

pub struct MetricsManagerConfig {
    pub scrape_interval: Duration,
    pub send_interval: Duration,
    pub send_tables: Vec<TableName>,
}

impl Default for MetricsManagerConfig {
    fn default() -> Self {
        MetricsManagerConfig {
            scrape_interval: Duration::from_secs(60),
            send_interval: Duration::from_secs(60),
            send_tables: ALL_TABLES.to_vec(),
        }
    }
}

pub struct MetricsManager {
    store: Arc<Store>,
    backend: Arc<dyn Backend>,
    topology: Arc<TopologyState>,
    client: reqwest::Client,
    config: MetricsManagerConfig,
}

impl MetricsManager {
    pub fn new(
        store: Arc<Store>,
        backend: Arc<dyn Backend>,
        topology: Arc<TopologyState>,
        client: reqwest::Client,
        config: MetricsManagerConfig,
    ) -> Self {
        MetricsManager {
            store,
            backend,
            topology,
            client,
            config,
        }
    }

    /// Fetches warm-start history (fatal on failure), then launches the scraper
    /// and sender tasks and blocks until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let history = self.backend.get_previous_data().await.map_err(anyhow::Error::from)?;
        for (table, groups) in history {
            self.store.populate(table, groups);
        }

        let scraper_supervisor = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { this.supervise_scrapers(cancel).await })
        };

        self.sender_loop(cancel).await;
        scraper_supervisor.abort();
        Ok(())
    }

    /// Watches the controller set and starts/stops one scraper task per
    /// controller as it comes and goes.
    async fn supervise_scrapers(&self, cancel: CancellationToken) {
        let mut watch = self.topology.watch_controllers();
        let mut running: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

        loop {
            let controllers = watch.borrow_and_update().clone();
            let wanted: std::collections::HashSet<String> = controllers.iter().map(|c| c.name.clone()).collect();

            running.retain(|name, handle| {
                if wanted.contains(name) {
                    true
                } else {
                    handle.abort();
                    false
                }
            });

            for controller in &controllers {
                if running.contains_key(&controller.name) {
                    continue;
                }
                let store = Arc::clone(&self.store);
                let client = self.client.clone();
                let topology = Arc::clone(&self.topology);
                let interval = self.config.scrape_interval;
                let kind = controller.parser;
                let urls = controller.urls.clone();
                let name = controller.name.clone();
                let cancel = cancel.clone();

                let handle = tokio::spawn(async move {
                    scraper_task(store, client, topology, name.clone(), kind, urls, interval, cancel).await;
                });
                running.insert(controller.name.clone(), handle);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    for (_, handle) in running.drain() {
                        handle.abort();
                    }
                    return;
                }
                changed = watch.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn sender_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.send_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.send_tick().await,
            }
        }
    }

    async fn send_tick(&self) {
        self.store.roll_up(now_unix());

        for table in ALL_TABLES {
            let mut count = 0usize;
            self.store.for_each(table, |_, _, points| count += points.len());
            crate::metrics::set_store_points(table.as_str(), count);
        }

        let mut batch: HashMap<TableName, Vec<DataPointGroup>> = HashMap::new();
        let mut pending_marks = Vec::new();

        for &table in &self.config.send_tables {
            let mut groups = Vec::new();
            let marks = self.store.for_each_unmarked(table, |ingress, service, tail| {
                groups.push(DataPointGroup {
                    ingress: ingress.to_string(),
                    service: service.to_string(),
                    points: tail.to_vec(),
                });
            });
            if !groups.is_empty() {
                batch.insert(table, groups);
            }
            pending_marks.push((table, marks));
        }

        if batch.is_empty() {
            return;
        }

        let started = std::time::Instant::now();
        let result = self.backend.send(batch).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        crate::metrics::observe_send_duration(outcome, started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                for (table, marks) in pending_marks {
                    self.store.commit_marks(table, marks);
                }
                self.store.cleanup();
            }
            Err(err) => {
                tracing::warn!(error = %err, "send failed, retrying on next tick");
            }
        }
    }
}

/// One scraper task for a single controller: first scrape establishes the
/// baseline, every subsequent scrape diffs against it and inserts a point.
async fn scraper_task(
    store: Arc<Store>,
    client: reqwest::Client,
    topology: Arc<TopologyState>,
    controller: String,
    kind: crate::parsers::ParserKind,
    urls: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut cache = kind.new_cache();
    let mut baseline: HashMap<MetricKey, MetricSet> = HashMap::new();
    let mut first_scrape = true;
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let scrape_state = topology.scrape_state();
                let metrics = scrape_targets(&client, &controller, kind, &urls, &scrape_state, &mut cache).await;
                let current = accumulate_all(&metrics);

                if first_scrape {
                    first_scrape = false;
                    baseline = current;
                    continue;
                }

                let timestamp = now_unix() - now_unix().rem_euclid(60);
                let scrape_seconds = interval.as_secs();
                let mut points: HashMap<MetricKey, DataPoint> = HashMap::new();
                for (key, set) in &current {
                    let prev = baseline.get(key).copied().unwrap_or_default();
                    let delta = set.relative_to(&prev);
                    points.insert(key.clone(), delta.to_data_point(timestamp, scrape_seconds));
                }
                if !points.is_empty() {
                    store.insert(points);
                }
                baseline = current;
            }
        }
    }
}

fn accumulate_all(metrics: &[Metric]) -> HashMap<MetricKey, MetricSet> {
    let mut sets: HashMap<MetricKey, MetricSet> = HashMap::new();
    for metric in metrics {
        sets.entry(metric.key()).or_default().accumulate(metric);
    }
    sets
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_all_groups_by_key() {
        let metrics = vec![
            Metric::Counter {
                name: crate::model::MetricName::Requests,
                ingress: "i".to_string(),
                service: "s".to_string(),
                value: 3,
            },
            Metric::Counter {
                name: crate::model::MetricName::Requests,
                ingress: "i".to_string(),
                service: "s".to_string(),
                value: 4,
            },
        ];
        let sets = accumulate_all(&metrics);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[&MetricKey::new("i", "s")].requests, 7);
    }
}
