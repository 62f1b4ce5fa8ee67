//! Application entry point for the greenhouse telemetry ingestion pipeline.
//!
//! This binary orchestrates the full lifecycle of the consumer:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Connecting to PostgreSQL with a bounded, fixed-delay retry (crash-only:
//!   if storage cannot be reached the process exits non-zero)
//! - Ensuring the readings table and its indexes exist
//! - Subscribing to the MQTT telemetry topic and ingesting every message
//! - Shutting down on SIGINT/SIGTERM: stop receiving, disconnect from the
//!   broker, close storage, exit 0
//!
//! # Environment Variables
//! - `MQTT_HOST`, `MQTT_PORT`, `MQTT_TOPIC`, `MQTT_CLIENT_ID`, credentials
//! - `DATABASE_URL`, `DB_SCHEMA`, `READINGS_TABLE`, `DB_POOL_MAX`
//! - `DB_CONNECT_RETRIES`, `DB_CONNECT_DELAY_SECS`
//! - `LOG_LEVEL` (optional) – log verbosity (default: `info`)
//!
//! See `config.rs` for defaults.
use anyhow::Result;
use dotenvy::dotenv;

use greenhouse_telemetry::{
    init_tracing, wait_for_signal, BrokerConnection, IngestionHandler, MqttSettings,
    ShutdownController, StorageConnector, StorageSettings,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let mqtt = MqttSettings::from_env("greenhouse-consumer")?;
    let storage_settings = StorageSettings::from_env()?;
    mqtt.log_config();
    storage_settings.log_config();

    // No storage, no ingestion: exhausting the retry budget ends the process here
    let storage = StorageConnector::connect(&storage_settings).await?;

    let (broker, broker_handle) = BrokerConnection::new(&mqtt);
    let handler = IngestionHandler::new(storage.clone());
    let broker_task = tokio::spawn(broker.run(handler));

    let signal = wait_for_signal().await;
    tracing::info!(signal, "Termination signal received");

    ShutdownController::new(broker_handle, storage)
        .shutdown(broker_task)
        .await;

    Ok(())
}
