//! Alert manager: rule refresh loop, scheduler tick, and preflight + notify
//! dispatch to the backend.

use crate::backend::Backend;
use crate::error::AgentError;
use crate::rules::Rule;
use crate::threshold::ThresholdProcessor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct AlertManager {
    backend: Arc<dyn Backend>,
    processors: HashMap<&'static str, ThresholdProcessor>,
    rules: Mutex<Vec<Rule>>,
    refresh_interval: Duration,
    scheduler_interval: Duration,
}

impl AlertManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        threshold_processor: ThresholdProcessor,
        refresh_interval: Duration,
        scheduler_interval: Duration,
    ) -> Self {
        let mut processors: HashMap<&'static str, ThresholdProcessor> = HashMap::new();
        processors.insert("threshold", threshold_processor);

        AlertManager {
            backend,
            processors,
            rules: Mutex::new(Vec::new()),
            refresh_interval,
            scheduler_interval,
        }
    }

    /// Fetches the initial rule set. Failure here is fatal, matching the startup
    /// contract for the metrics manager's `GetPreviousData`.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let rules = self.backend.get_rules().await.map_err(anyhow::Error::from)?;
        *self.rules.lock() = rules;

        let scheduler = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { this.scheduler_loop(cancel).await })
        };

        self.refresh_loop(cancel).await;
        scheduler.abort();
        Ok(())
    }

    async fn refresh_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.refresh().await,
            }
        }
    }

    async fn refresh(&self) {
        match self.backend.get_rules().await {
            Ok(rules) => *self.rules.lock() = rules,
            Err(err) => tracing::warn!(error = %err, "rule refresh failed, keeping previous rule set"),
        }
    }

    async fn scheduler_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.scheduler_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.check_alerts().await {
                        tracing::error!(error = %err, "alert scheduler tick failed");
                    }
                }
            }
        }
    }

    async fn check_alerts(&self) -> Result<(), AgentError> {
        let snapshot = self.rules.lock().clone();

        let mut alerts = Vec::new();
        for rule in &snapshot {
            let Some(processor) = self.processors.get(rule.kind()) else {
                tracing::warn!(rule_id = %rule.id, kind = rule.kind(), "unknown rule type, skipping");
                continue;
            };
            match processor.process(rule).await {
                Ok(Some(alert)) => {
                    crate::metrics::record_alert_emitted(&alert.rule_id);
                    alerts.push(alert);
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(rule_id = %rule.id, error = %err, "rule evaluation failed, skipping"),
            }
        }

        // Preflight is always called, even with an empty batch: the backend treats
        // that as "nothing is alerting" and may use it to resolve prior alerts.
        let descriptors: Vec<_> = alerts.iter().map(|a| a.descriptor()).collect();
        let keep = self.backend.preflight_alerts(&descriptors).await?;
        let suppressed = alerts.len().saturating_sub(keep.len());
        if suppressed > 0 {
            crate::metrics::record_alerts_suppressed(suppressed as u64);
        }
        if keep.is_empty() {
            return Ok(());
        }

        let subset: Vec<_> = keep.into_iter().map(|idx| alerts[idx].clone()).collect();
        self.backend.send_alerts(&subset).await?;
        Ok(())
    }
}
