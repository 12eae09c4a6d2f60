//! sensorflux - ingestion and replication daemon
//!
//! Two long-lived loops, runnable together or as separate processes (the
//! deployments this replaces ran one container per loop):
//!
//! - `ingest`: MQTT topic → threshold detection → PostgreSQL
//! - `replicate`: PostgreSQL → cursor scan → OpenSearch
//!
//! Startup failures (initial broker connection, setup) terminate the
//! process so an external supervisor can restart it; everything after
//! startup is handled in-loop and observed via logs.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sensorflux::prelude::*;

#[derive(Parser)]
#[command(name = "sensorflux")]
#[command(version, about = "Sensor ingestion and incremental replication")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest and replication loops in one process (default)
    Run,
    /// Run only the MQTT → PostgreSQL ingest loop
    Ingest,
    /// Run only the PostgreSQL → OpenSearch replication loop
    Replicate,
    /// Load the configuration from the environment and print it
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = PipelineConfig::from_env().context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_all(config).await,
        Commands::Ingest => run_ingest(config).await,
        Commands::Replicate => run_replicate(config).await,
        Commands::Validate => validate_config(&config),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn run_all(config: PipelineConfig) -> Result<()> {
    info!("starting sensorflux (ingest + replication)");

    let ingest = tokio::spawn(run_ingest(config.clone()));
    let replicate = tokio::spawn(run_replicate(config));

    // Both loops run forever; any return is a startup failure worth dying
    // for so the supervisor restarts the whole process.
    tokio::select! {
        result = ingest => match result {
            Ok(inner) => inner.context("ingest loop terminated"),
            Err(e) => {
                error!(error = %e, "ingest task panicked");
                Err(e.into())
            }
        },
        result = replicate => match result {
            Ok(inner) => inner.context("replication loop terminated"),
            Err(e) => {
                error!(error = %e, "replication task panicked");
                Err(e.into())
            }
        },
    }
}

async fn run_ingest(config: PipelineConfig) -> Result<()> {
    let store = PgStore::connect(config.primary.clone()).await;
    store
        .ensure_schema()
        .await
        .context("primary store schema bootstrap failed")?;

    let critical = CriticalEventLog::new(&config.ingest.critical_file);
    let mut handler = IngestHandler::new(store, critical, config.ingest.threshold);
    if config.ingest.dual_write {
        info!("dual-sink variant enabled: readings also written directly to the secondary store");
        let sink = SearchClient::new(&config.secondary)
            .context("failed to build secondary store client")?;
        handler = handler.with_dual_sink(Box::new(sink));
    }

    // Fatal if the broker is unreachable at startup.
    let subscriber = MqttSubscriber::connect(&config.broker)
        .await
        .context("initial broker connection failed")?;

    subscriber.run(&mut handler).await;
    Ok(())
}

async fn run_replicate(config: PipelineConfig) -> Result<()> {
    let source = PgStore::connect(config.primary.clone()).await;
    let sink = SearchClient::connect(&config.secondary)
        .await
        .context("failed to build secondary store client")?;

    let replicator = Replicator::new(
        source,
        sink,
        Duration::from_secs(config.replication.poll_interval_secs),
    );
    replicator.run().await;
    Ok(())
}

fn validate_config(config: &PipelineConfig) -> Result<()> {
    // Secrets serialize redacted, so this is safe to print.
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
