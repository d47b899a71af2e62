//! Evaluates a single threshold rule against the store, emitting at most one
//! alert per (ingress, service) match.

use crate::error::AgentError;
use crate::logs::{compress_snippet, LogProvider};
use crate::model::DataPoint;
use crate::rules::{Alert, AlertPoint, Rule};
use crate::store::Store;
use crate::view;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct ThresholdProcessor {
    store: Arc<Store>,
    log_provider: Arc<dyn LogProvider>,
}

impl ThresholdProcessor {
    pub fn new(store: Arc<Store>, log_provider: Arc<dyn LogProvider>) -> Self {
        ThresholdProcessor { store, log_provider }
    }

    pub async fn process(&self, rule: &Rule) -> Result<Option<Alert>, AgentError> {
        self.process_at(rule, now_unix()).await
    }

    async fn process_at(&self, rule: &Rule, now: i64) -> Result<Option<Alert>, AgentError> {
        let threshold = rule
            .threshold
            .as_ref()
            .ok_or_else(|| AgentError::Other(anyhow::anyhow!("threshold rule {} has no threshold clause", rule.id)))?;
        let (table, granularity) = rule
            .table_and_granularity()
            .expect("threshold rule always derives a table");

        let to = now - now.rem_euclid(granularity);
        let from = to - threshold.time_range.as_secs() as i64;

        let points = if !rule.ingress.is_empty() && !rule.service.is_empty() {
            view::find_by_ingress_and_service(&self.store, table, &rule.ingress, &rule.service, from, to)?
        } else if !rule.service.is_empty() {
            view::find_by_service(&self.store, table, &rule.service, from, to)
        } else if !rule.ingress.is_empty() {
            view::find_by_ingress(&self.store, table, &rule.ingress, from, to)
        } else {
            return Err(AgentError::NoSelector);
        };

        let mut scalars = Vec::with_capacity(points.len());
        for point in &points {
            let value = point
                .scalar(&threshold.metric)
                .ok_or_else(|| AgentError::UnknownMetricName(threshold.metric.clone()))?;
            scalars.push(value);
        }

        let occurrences = scalars
            .iter()
            .filter(|&&value| {
                if threshold.condition.above {
                    value > threshold.condition.value
                } else {
                    value < threshold.condition.value
                }
            })
            .count();

        if occurrences < threshold.occurrence as usize || points.len() < threshold.occurrence as usize {
            return Ok(None);
        }

        let logs = self.fetch_logs(&rule.service).await;

        Ok(Some(Alert {
            rule_id: rule.id.clone(),
            ingress: rule.ingress.clone(),
            service: rule.service.clone(),
            points: points.iter().map(|p| to_alert_point(p, &threshold.metric)).collect(),
            logs,
            threshold: threshold.clone(),
        }))
    }

    /// Best-effort: any failure (no service selector, fetch error, compression
    /// error) yields empty logs rather than failing the whole alert.
    async fn fetch_logs(&self, service: &str) -> Vec<u8> {
        let Some((name, namespace)) = service.split_once('@') else {
            return Vec::new();
        };

        match self.log_provider.get_service_logs(namespace, name, 50, 200).await {
            Ok(lines) => compress_snippet(&lines, 200).unwrap_or_default(),
            Err(err) => {
                tracing::warn!(service, error = %err, "log fetch failed, emitting alert without logs");
                Vec::new()
            }
        }
    }
}

fn to_alert_point(point: &DataPoint, metric: &str) -> AlertPoint {
    AlertPoint {
        ts: point.timestamp,
        value: point.scalar(metric).unwrap_or(0.0),
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}
