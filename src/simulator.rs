//! Synthetic greenhouse device.
//!
//! Keeps a random-walk sensor state, nudges it each tick and publishes it as
//! a telemetry message. Values stay inside ranges a real greenhouse drifts
//! through, occasionally dry enough in the soil to trip warnings.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rumqttc::{AsyncClient, QoS};
use serde_json::json;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::broker::mqtt_options;
use crate::{wait_for_signal, Backoff, MqttSettings, SimulatorSettings};

// ---

/// Current simulated sensor values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorState {
    // ---
    pub temperature: f64,
    pub air_humidity: f64,
    pub soil_moisture: f64,
}

impl Default for SensorState {
    fn default() -> Self {
        Self {
            temperature: 25.0,
            air_humidity: 70.0,
            soil_moisture: 45.0,
        }
    }
}

impl SensorState {
    // ---
    /// Apply one random step; soil dries faster than it is watered.
    pub fn step<R: Rng>(&mut self, rng: &mut R) {
        // ---
        self.temperature = (self.temperature + rng.gen_range(-0.4..=0.4)).clamp(18.0, 38.0);
        self.air_humidity = (self.air_humidity + rng.gen_range(-1.2..=1.2)).clamp(35.0, 95.0);
        self.soil_moisture = (self.soil_moisture + rng.gen_range(-0.8..=0.3)).clamp(5.0, 80.0);
    }

    /// Telemetry payload for this state, values rounded to two decimals.
    pub fn payload(&self, device_id: &str, now: DateTime<Utc>) -> serde_json::Value {
        // ---
        json!({
            "device_id": device_id,
            "timestamp": now.to_rfc3339_opts(SecondsFormat::Micros, true),
            "temperature": round2(self.temperature),
            "air_humidity": round2(self.air_humidity),
            "soil_moisture": round2(self.soil_moisture),
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Publish telemetry every interval until SIGINT/SIGTERM.
pub async fn run_simulator(mqtt: &MqttSettings, sim: &SimulatorSettings) -> Result<()> {
    // ---
    let (client, mut event_loop) = AsyncClient::new(mqtt_options(mqtt), 16);

    // The event loop must be polled for publishes to go out and to reconnect
    let mut backoff = Backoff::new(mqtt.reconnect_min, mqtt.reconnect_max);
    let poller = tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    backoff.reset();
                    tracing::info!("Simulator connected to MQTT broker");
                }
                Ok(_) => {}
                Err(err) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(error = %err, "MQTT unavailable, retrying in {}s", delay.as_secs_f64());
                    sleep(delay).await;
                }
            }
        }
    });

    let mut state = SensorState::default();
    let mut ticker = interval(sim.publish_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let publishing = async {
        loop {
            ticker.tick().await;
            state.step(&mut rand::thread_rng());
            let payload = state.payload(&sim.device_id, Utc::now());

            match client
                .publish(&mqtt.topic, QoS::AtLeastOnce, false, payload.to_string())
                .await
            {
                Ok(()) => tracing::info!(topic = %mqtt.topic, %payload, "published telemetry"),
                Err(err) => tracing::warn!(error = %err, "failed to queue telemetry"),
            }
        }
    };

    tokio::select! {
        signal = wait_for_signal() => tracing::info!(signal, "Stopping simulator"),
        _ = publishing => {}
    }

    let _ = client.try_disconnect();
    // Give the poller a moment to flush the DISCONNECT
    sleep(Duration::from_millis(200)).await;
    poller.abort();

    Ok(())
}
