//! fieldwatch - field workforce presence and incident service
//!
//! Module structure:
//! - `domain/` - Core business types (Subject, PresenceSample, Incident)
//! - `io/` - External interfaces (HTTP API, audit log, MQTT egress)
//! - `services/` - Business logic (Engine, roster, history, alerts)
//! - `infra/` - Infrastructure (Config, Metrics, errors)

use clap::Parser;
use fieldwatch::infra::{Config, Metrics};
use fieldwatch::io::{create_event_channel, start_http_server, Api, AuditLog, EventPublisher, MqttSink};
use fieldwatch::services::{run_retention_sweeper, Engine};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Field workforce presence and incident service
#[derive(Parser, Debug)]
#[command(name = "fieldwatch", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug for per-request logs
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "fieldwatch starting");

    let args = Args::parse();
    let config = Config::load(args.config.as_deref());

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        bind_address = %config.bind_address(),
        port = %config.port(),
        subjects = %config.subjects().len(),
        staleness_secs = %config.staleness().num_seconds(),
        mqtt_enabled = %config.mqtt_enabled(),
        audit_file = ?config.audit_file(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Resolution side-effects: audit file and MQTT, both optional
    let (event_sender, event_rx) = create_event_channel(config.event_buffer(), metrics.clone());
    let audit = config.audit_file().map(AuditLog::new);
    let mqtt = config.mqtt_enabled().then(|| MqttSink::new(&config));
    let publisher = EventPublisher::new(event_rx, audit, mqtt);
    let publisher_shutdown = shutdown_rx.clone();
    let publisher_task = tokio::spawn(async move {
        publisher.run(publisher_shutdown).await;
    });

    let engine = Arc::new(Engine::new(&config, metrics, Some(event_sender)));

    let sweeper_engine = engine.clone();
    let sweep_every = config.retention_sweep_interval();
    let sweeper_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        run_retention_sweeper(sweeper_engine, sweep_every, sweeper_shutdown).await;
    });

    // Periodic metrics log line
    let metrics_engine = engine.clone();
    if let Some(metrics_interval) = config.metrics_interval() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(metrics_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics_engine.metrics_summary().log();
            }
        });
    }

    let api = Arc::new(Api::new(engine, config.site_id()));
    let bind_address = config.bind_address().to_string();
    let port = config.port();
    let server_shutdown = shutdown_rx.clone();
    let mut server_task = tokio::spawn(async move {
        start_http_server(api, &bind_address, port, server_shutdown).await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
        }
        result = &mut server_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "http_server_error"),
                Err(e) => error!(error = %e, "http_server_join_failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !server_task.is_finished() {
        let _ = server_task.await;
    }
    // Drain queued resolution events before exit
    if let Err(e) = publisher_task.await {
        error!(error = %e, "event_publisher_join_failed");
    }

    info!("fieldwatch shutdown complete");
    Ok(())
}
