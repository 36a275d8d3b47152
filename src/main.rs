//! Plate gate - license-plate access controller for parking gates
//!
//! Turns per-frame OCR readings into debounced plate confirmations, checks
//! them against a booking ledger and opens the gate when a booking is active.
//!
//! Module structure:
//! - `domain/` - Core business types (plates, bookings, decisions, frames)
//! - `io/` - External interfaces (MQTT, ledgers, actuators, egress)
//! - `services/` - Business logic (engine, stabilizer, gate)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use anyhow::Context;
use clap::Parser;
use plate_gate::infra::{Config, Metrics};
use plate_gate::io::{build_actuator, build_ledger, create_egress_channel, MqttPublisher};
use plate_gate::services::{create_gate_worker, AccessEngine, BookingResolver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Plate gate - parking gate access controller
#[derive(Parser, Debug)]
#[command(name = "plate-gate", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "plate-gate starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    plate_gate::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        readings_topic = %config.mqtt_readings_topic(),
        ledger_mode = %config.ledger_mode().as_str(),
        gate_mode = %config.gate_mode().as_str(),
        cooldown_ms = %config.cooldown_ms(),
        window = %config.window(),
        per_region = %config.per_region(),
        require_strict_format = %config.require_strict_format(),
        access_log = %config.access_log_file(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let metrics = Arc::new(Metrics::new());

    let ledger = build_ledger(&config).context("failed to initialize booking ledger")?;
    let actuator = build_actuator(&config).context("failed to initialize gate actuator")?;

    // Gate worker keeps actuator I/O off the frame loop
    let (gate_tx, gate_worker) = create_gate_worker(actuator, metrics.clone(), 16);
    tokio::spawn(gate_worker.run());

    // Frame channel (bounded for backpressure)
    let (frame_tx, frame_rx) = mpsc::channel(1000);

    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        // frame_tx is dropped when the client returns, which ends the engine's input
        if let Err(e) = plate_gate::io::mqtt::start_mqtt_client(
            &mqtt_config,
            frame_tx,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            error!(error = %e, "mqtt_client_failed");
        }
    });

    // Prometheus metrics HTTP server (0 disables)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = plate_gate::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_server_failed");
            }
        });
    }

    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(&metrics_for_egress.report());
            }
        });

        Some(egress_sender)
    } else {
        None
    };

    let resolver = BookingResolver::new(ledger, metrics.clone());
    let mut engine = AccessEngine::new(config, resolver, gate_tx, metrics, egress_sender);

    let ctrl_c_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = ctrl_c_shutdown.send(true);
    });

    let result = engine.run(frame_rx, shutdown_rx).await;
    let _ = shutdown_tx.send(true);

    match result {
        Ok(()) => {
            info!("plate-gate shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "engine_halted");
            std::process::exit(1);
        }
    }
}
