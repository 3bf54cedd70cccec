use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use windowcount::{
    RateCounter,
    api,
    config::{CounterConfig, LogFormat},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = CounterConfig::from_env().context("failed to build counter config")?;
    init_tracing(&cfg);

    let counter = RateCounter::from_config(&cfg)
        .await
        .context("failed to initialise counter policy")?;
    let app = api::routes(counter.clone());

    let listener = TcpListener::bind(cfg.bind_addr)
        .await
        .context("failed to bind listener")?;

    tracing::info!(addr = %cfg.bind_addr, policy = counter.policy_name(), "counter service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("counter server error")?;

    if let Err(err) = counter.shutdown().await {
        tracing::error!(error = %err, "failed to flush counters on shutdown");
    }
    tracing::info!("counter service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn init_tracing(cfg: &CounterConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},hyper=warn,redis=warn", cfg.log_level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match cfg.log_format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}
