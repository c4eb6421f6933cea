use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use fleet_collector::{
    collectors::StrategySet,
    config::{Config, InventoryConfig, SinkConfig, read_config_file},
    inventory::{Inventory, StaticInventory},
    orchestrator::Orchestrator,
    sink::{InfluxSink, MemorySink, MetricsSink, SinkWriter},
    util::log_filter,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON). Built-in defaults and environment variables are
    /// used when omitted.
    #[arg(short)]
    file: Option<String>,
}

fn init(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(log_filter(level))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };
    config.apply_env_overrides();

    init(&config.log_level);
    trace!("started with args: {args:?}");

    config.validate().context("invalid configuration")?;

    let inventory = connect_inventory(&config).await?;
    let sink = connect_sink(&config).await?;

    let orchestrator = Orchestrator::new(
        config.orchestrator_settings(),
        inventory,
        StrategySet::from_config(&config),
        SinkWriter::new(sink),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    orchestrator.start(cancel).await;

    Ok(())
}

async fn connect_inventory(config: &Config) -> anyhow::Result<Arc<dyn Inventory>> {
    match &config.inventory {
        InventoryConfig::Static { devices } => {
            info!("using static inventory with {} devices", devices.len());
            Ok(Arc::new(StaticInventory::new(devices.clone())))
        }
        #[cfg(feature = "inventory-postgres")]
        InventoryConfig::Postgres {
            url,
            max_connections,
        } => {
            let inventory =
                fleet_collector::inventory::PostgresInventory::connect(url, *max_connections)
                    .await
                    .context("failed to connect to inventory database")?;
            Ok(Arc::new(inventory))
        }
        #[cfg(not(feature = "inventory-postgres"))]
        InventoryConfig::Postgres { .. } => {
            bail!("postgres inventory requires the `inventory-postgres` feature")
        }
    }
}

async fn connect_sink(config: &Config) -> anyhow::Result<Arc<dyn MetricsSink>> {
    match &config.sink {
        SinkConfig::Influxdb {
            url,
            token,
            org,
            bucket,
            request_timeout,
        } => {
            let sink = InfluxSink::new(url, token, org, bucket, *request_timeout)
                .context("failed to create InfluxDB sink")?;

            // writes are retried per sample, so an unhealthy server at startup is not fatal
            match sink.health_check().await {
                Ok(()) => info!("connected to InfluxDB at {url}"),
                Err(e) => warn!("InfluxDB health check failed: {e}"),
            }

            Ok(Arc::new(sink))
        }
        SinkConfig::Memory { capacity } => {
            if *capacity == 0 {
                bail!("memory sink capacity must be greater than zero");
            }
            info!("using in-memory sink (capacity {capacity}), samples are not persisted");
            Ok(Arc::new(MemorySink::new(*capacity)))
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => debug!("received ctrl-c"),
        _ = terminate => debug!("received SIGTERM"),
    }

    info!("shutting down, waiting for in-flight collections");
    cancel.cancel();
}
