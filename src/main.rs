use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mtconnect_agent::adapter::AdapterListener;
use mtconnect_agent::config::AgentConfig;
use mtconnect_agent::http;
use mtconnect_buffer::prometheus::PrometheusConfig;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mtconnect-agent")]
#[command(about = "MTConnect agent serving probe, current, sample and asset requests")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides http.listen_addr)
    #[arg(long)]
    http_addr: Option<String>,

    /// Adapter listen address (overrides adapters.listen_addr)
    #[arg(long)]
    adapter_addr: Option<String>,

    /// Observation buffer capacity (overrides buffer.size)
    #[arg(short, long)]
    buffer_size: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.http.listen_addr = addr;
    }
    if let Some(addr) = args.adapter_addr {
        config.adapters.listen_addr = addr;
    }
    if let Some(size) = args.buffer_size {
        config.buffer.size = size;
    }
    config.validate()?;

    run(config).await
}

async fn run(config: AgentConfig) -> Result<()> {
    let agent = Arc::new(config.agent_builder().build());
    let metrics = agent.start_metrics(config.metrics_interval());

    let mut prometheus = PrometheusConfig::builder();
    if let Some(ns) = &config.metrics.namespace {
        prometheus = prometheus.namespace(ns.clone());
    }
    let state = Arc::new(
        http::HttpState::new(agent.clone())
            .with_stream_defaults(config.stream_defaults())
            .with_prometheus(prometheus.build()),
    );

    let http_listener = TcpListener::bind(&config.http.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http.listen_addr))?;
    let adapter_listener = AdapterListener::bind(&config.adapters.listen_addr, agent.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.adapters.listen_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let http_task = tokio::spawn(http::serve(http_listener, state, shutdown_rx.clone()));
    let adapter_task = tokio::spawn(adapter_listener.run(shutdown_rx));

    tracing::info!(
        instance_id = agent.instance().id(),
        devices = config.devices.len(),
        "agent running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    metrics.stop();
    for (name, task) in [("http", http_task), ("adapter", adapter_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(server = name, "server failed: {}", e),
            Err(e) => tracing::error!(server = name, "server task failed: {}", e),
        }
    }
    Ok(())
}
