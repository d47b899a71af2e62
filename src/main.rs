use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use ingress_metrics_agent::alerts::AlertManager;
use ingress_metrics_agent::backend::HttpBackend;
use ingress_metrics_agent::config::Config;
use ingress_metrics_agent::logs::NullLogProvider;
use ingress_metrics_agent::manager::{MetricsManager, MetricsManagerConfig};
use ingress_metrics_agent::metrics::metrics_handler;
use ingress_metrics_agent::store::{Store, ALL_TABLES};
use ingress_metrics_agent::threshold::ThresholdProcessor;
use ingress_metrics_agent::topology::TopologyState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ingress-metrics-agent")]
#[command(about = "Scrapes ingress controllers, stores roll-up time series, evaluates alert rules")]
struct Cli {
    /// Path to the agent's JSON config file.
    #[arg(short, long, env = "AGENT_CONFIG", default_value = "~/.ingress-metrics-agent/config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingress_metrics_agent=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = shellexpand::tilde(&cli.config).to_string();
    let config = Config::from_file(&config_path)?;
    tracing::info!(
        git_branch = env!("GIT_BRANCH"),
        git_commit = env!("GIT_COMMIT"),
        config = %config_path,
        "starting agent"
    );

    let store = Arc::new(Store::new());
    let topology = Arc::new(TopologyState::new());
    topology.set_controllers(config.controller_targets()?);

    let backend: Arc<dyn ingress_metrics_agent::backend::Backend> = Arc::new(HttpBackend::new(
        config.http_client(),
        config.backend_url(),
        config.backend_token(),
    ));

    let metrics_manager = Arc::new(MetricsManager::new(
        Arc::clone(&store),
        Arc::clone(&backend),
        Arc::clone(&topology),
        config.http_client(),
        MetricsManagerConfig {
            scrape_interval: config.scrape_interval(),
            send_interval: config.send_interval(),
            send_tables: ALL_TABLES.to_vec(),
        },
    ));

    let threshold_processor = ThresholdProcessor::new(Arc::clone(&store), Arc::new(NullLogProvider));
    let alert_manager = Arc::new(AlertManager::new(
        Arc::clone(&backend),
        threshold_processor,
        config.rule_refresh_interval(),
        config.rule_scheduler_interval(),
    ));

    let cancel = CancellationToken::new();

    let metrics_task = tokio::spawn({
        let metrics_manager = Arc::clone(&metrics_manager);
        let cancel = cancel.clone();
        async move {
            if let Err(err) = metrics_manager.run(cancel).await {
                tracing::error!(error = %err, "metrics manager exited fatally");
            }
        }
    });
    let alerts_task = tokio::spawn({
        let alert_manager = Arc::clone(&alert_manager);
        let cancel = cancel.clone();
        async move {
            if let Err(err) = alert_manager.run(cancel).await {
                tracing::error!(error = %err, "alert manager exited fatally");
            }
        }
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from((config.host().parse::<std::net::IpAddr>()?, config.port()));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => { result?; }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    cancel.cancel();
    let _ = metrics_task.await;
    let _ = alerts_task.await;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}
