//! RFID inventory engine
//!
//! Tracks where every RFID tag is, whether it is still around, and when it left.
//!
//! Module structure:
//! - `domain/` - Core types (TagState, ReadEvent, LocationKind)
//! - `io/` - External interfaces (MQTT sources, HTTP, catalog, egress)
//! - `services/` - Engine (Registry, Mobility, Lifecycle, Directory, Sweeper)
//! - `infra/` - Infrastructure (Config, Errors, Metrics, Broker)

use anyhow::Context;
use clap::Parser;
use rfid_inventory::infra::broker::{start_embedded_broker, BrokerSettings};
use rfid_inventory::infra::{Config, Metrics};
use rfid_inventory::io::{
    create_egress_channel, start_http_server, start_read_source, DeviceCatalog, HttpDeviceCatalog,
    HttpState, MqttPublisher, MqttSourceConfig,
};
use rfid_inventory::services::directory::run_directory_refresh;
use rfid_inventory::services::{
    run_ingest_worker, FacilityDirectory, Ingestor, InventoryService, LifecyclePolicy, Sweeper,
    TagRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// RFID inventory engine - tag location and lifecycle tracking
#[derive(Parser, Debug)]
#[command(name = "rfid-inventory", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

/// Upper bound on how long shutdown waits for each task
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-read visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "rfid-inventory starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));

    // Invalid configuration is fatal before any task starts
    let config = match Config::load_from_path(&config_path) {
        Ok(config) => config,
        Err(e) => {
            let detail = format!("{e:#}");
            error!(config_file = %config_path, error = %detail, "config_invalid");
            return Err(e);
        }
    };

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        check_interval_secs = %config.check_interval_secs(),
        departed_threshold_secs = %config.departed_threshold_secs(),
        age_out_hours = %config.age_out_hours(),
        mobility_threshold = %config.mobility_threshold(),
        mobility_holdoff_ms = %config.mobility_holdoff_ms(),
        mobility_slope = %config.mobility_slope(),
        timestamp_source = config.timestamp_source().as_str(),
        mqtt_enabled = %config.mqtt_enabled(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topics = ?config.mqtt_topics(),
        http_port = %config.http_port(),
        catalog_url = ?config.catalog_url(),
        directory_locations = %config.directory_locations().len(),
        "config_loaded"
    );

    if config.broker_enabled() {
        let settings = BrokerSettings::from_config(&config).context("invalid broker bind address")?;
        start_embedded_broker(settings);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Shared engine state
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(TagRegistry::new());
    let directory = Arc::new(FacilityDirectory::new(config.directory_locations().to_vec()));
    metrics.set_directory_size(directory.len());

    // MQTT egress (inventory events + periodic metrics)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        tasks.push(tokio::spawn(publisher.run(shutdown_rx.clone())));

        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let registry_for_egress = registry.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        let mut egress_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let summary = metrics_for_egress.report(registry_for_egress.len());
                        metrics_egress.send_metrics(summary);
                    }
                    _ = egress_shutdown.changed() => break,
                }
            }
        }));

        Some(egress_sender)
    } else {
        None
    };

    let ingestor =
        Ingestor::new(&config, registry.clone(), directory.clone(), metrics.clone(), egress_sender.clone());

    // Device catalog refresh
    if let Some(url) = config.catalog_url() {
        let catalog: Arc<dyn DeviceCatalog> =
            Arc::new(HttpDeviceCatalog::new(url, config.catalog_timeout_ms())?);
        tasks.push(tokio::spawn(run_directory_refresh(
            directory.clone(),
            catalog,
            metrics.clone(),
            config.catalog_refresh_interval_secs(),
            shutdown_rx.clone(),
        )));
    }

    // Lifecycle sweeper
    let sweeper = Sweeper::new(
        registry.clone(),
        metrics.clone(),
        LifecyclePolicy::from_config(&config),
        egress_sender,
    );
    tasks.push(tokio::spawn(sweeper.run(shutdown_rx.clone())));

    // MQTT read sources, each with its own ingest worker
    if config.mqtt_enabled() {
        let source_config = MqttSourceConfig::from_config(&config);
        for topic in config.mqtt_topics() {
            let (read_tx, read_rx) = mpsc::channel(config.ingest_channel_capacity());
            tasks.push(tokio::spawn(run_ingest_worker(
                ingestor.clone(),
                read_rx,
                format!("mqtt:{topic}"),
                shutdown_rx.clone(),
            )));

            let source_config = source_config.clone();
            let topic = topic.clone();
            let source_metrics = metrics.clone();
            let source_shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) =
                    start_read_source(source_config, topic.clone(), read_tx, source_metrics, source_shutdown)
                        .await
                {
                    error!(topic = %topic, error = %e, "mqtt_source_failed");
                }
            }));
        }
    }

    // HTTP query surface
    let http_state = Arc::new(HttpState {
        inventory: InventoryService::new(registry.clone(), metrics.clone(), config.site_id()),
        ingestor,
        metrics: metrics.clone(),
        site_id: config.site_id().to_string(),
    });
    let http_port = config.http_port();
    if http_port != 0 {
        let http_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = start_http_server(http_port, http_state, http_shutdown).await {
                error!(port = %http_port, error = %e, "http_server_failed");
            }
        }));
    }

    // Metrics reporter
    let metrics_reporter = metrics.clone();
    let registry_for_metrics = registry.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut metrics_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics_reporter.report(registry_for_metrics.len()).log();
                }
                _ = metrics_shutdown.changed() => break,
            }
        }
    }));

    info!("engine_started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal_handler_failed");
    }
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
    }

    info!(tags = %registry.len(), "rfid-inventory shutdown complete");
    Ok(())
}
