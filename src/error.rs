//! Error kinds for the scrape/store/alert pipeline.
//!
//! Transient remote failures and per-target scrape failures are logged and swallowed
//! by their owning loop; only configuration and protocol violations are expected to
//! propagate to a caller, and only the two startup fetches are fatal to `Run`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unknown parser kind: {0}")]
    UnknownParserKind(String),

    #[error("unknown metric name in rule: {0}")]
    UnknownMetricName(String),

    #[error("rule has neither ingress nor service selector")]
    NoSelector,

    #[error("more than one data-point group matched ingress={ingress:?} service={service:?}")]
    AmbiguousLookup { ingress: String, service: String },

    #[error("invalid alert position: {0}")]
    InvalidAlertPosition(usize),

    #[error("backend request failed with status {status}: {body}")]
    BackendStatus { status: u16, body: String },

    #[error("backend response could not be decoded: {0}")]
    BackendDecode(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
