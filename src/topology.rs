//! Topology state: the set of known ingress controllers to scrape, and the
//! identifier context parsers need to resolve scraped labels.
//!
//! The component that actually watches the cluster for ingress controllers and
//! service bindings is outside this agent's scope; this module only models the
//! contract it must satisfy — a changing list of controller targets, and a
//! snapshot of [`ScrapeState`] parsers can read.

use crate::parsers::{ParserKind, ScrapeState};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerTarget {
    pub name: String,
    pub parser: ParserKind,
    pub urls: Vec<String>,
}

#[derive(Clone)]
pub struct TopologyState {
    controllers_tx: watch::Sender<Vec<ControllerTarget>>,
    controllers_rx: watch::Receiver<Vec<ControllerTarget>>,
    scrape_state: Arc<RwLock<ScrapeState>>,
}

impl TopologyState {
    pub fn new() -> Self {
        let (controllers_tx, controllers_rx) = watch::channel(Vec::new());
        Self {
            controllers_tx,
            controllers_rx,
            scrape_state: Arc::new(RwLock::new(ScrapeState::default())),
        }
    }

    /// Replaces the known controller set. Subscribers (the metrics manager) are
    /// notified so they can start/stop scraper tasks accordingly.
    pub fn set_controllers(&self, controllers: Vec<ControllerTarget>) {
        self.controllers_tx.send_replace(controllers);
    }

    pub fn controllers(&self) -> Vec<ControllerTarget> {
        self.controllers_rx.borrow().clone()
    }

    /// Subscribes to controller-set changes. The returned receiver's initial
    /// value is the current set.
    pub fn watch_controllers(&self) -> watch::Receiver<Vec<ControllerTarget>> {
        self.controllers_rx.clone()
    }

    pub fn set_scrape_state(&self, state: ScrapeState) {
        *self.scrape_state.write() = state;
    }

    pub fn scrape_state(&self) -> ScrapeState {
        self.scrape_state.read().clone()
    }
}

impl Default for TopologyState {
    fn default() -> Self {
        Self::new()
    }
}
