//! Greenhouse device simulator: publishes synthetic telemetry over MQTT.
//!
//! # Environment Variables
//! - `MQTT_HOST`, `MQTT_PORT`, `MQTT_TOPIC`, `MQTT_CLIENT_ID`, credentials
//! - `DEVICE_ID` (default `greenhouse-01`)
//! - `PUBLISH_INTERVAL` seconds between messages (default `5`)
//! - `LOG_LEVEL`
use anyhow::Result;
use dotenvy::dotenv;

use greenhouse_telemetry::{init_tracing, run_simulator, MqttSettings, SimulatorSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let mqtt = MqttSettings::from_env("greenhouse-simulator-01")?;
    let sim = SimulatorSettings::from_env()?;
    mqtt.log_config();
    sim.log_config();

    run_simulator(&mqtt, &sim).await
}
