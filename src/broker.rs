//! MQTT broker connection for the ingestion pipeline.
//!
//! A [`BrokerConnection`] owns the rumqttc event loop. [`BrokerConnection::run`]
//! polls it forever: every `ConnAck` (re)subscribes to the telemetry topic,
//! every transport error sleeps an exponential backoff before the next poll
//! reconnects, and every publish is handed to a [`MessageHandler`] and awaited
//! before the next event is drawn.
//!
//! The paired [`BrokerHandle`] is what the shutdown path holds on to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::{Backoff, ConnectionState, MqttSettings, StateCell};

// ---

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 16;

/// How long the loop keeps polling after a stop to flush the DISCONNECT.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Receives every message delivered on the subscribed topic.
///
/// Implementations must not fail: whatever happens to a message is their
/// business, and the connection moves on to the next one regardless.
#[async_trait]
pub trait MessageHandler: Send {
    async fn on_message(&mut self, topic: &str, payload: &[u8]);
}

/// Build the rumqttc options shared by the consumer and the simulator.
pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    // ---
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(true);

    if let Some(username) = &settings.username {
        options.set_credentials(username, settings.password.as_deref().unwrap_or_default());
    }

    options
}

/// Owns the event loop; consumed by [`BrokerConnection::run`].
pub struct BrokerConnection {
    // ---
    client: AsyncClient,
    event_loop: EventLoop,
    topic: String,
    backoff: Backoff,
    state: Arc<StateCell>,
    stop: watch::Receiver<bool>,
}

/// Control side of a running [`BrokerConnection`].
#[derive(Clone)]
pub struct BrokerHandle {
    // ---
    client: AsyncClient,
    stop: Arc<watch::Sender<bool>>,
    state: Arc<StateCell>,
}

impl BrokerConnection {
    // ---
    /// Create the connection. Nothing touches the network until `run` polls.
    pub fn new(settings: &MqttSettings) -> (BrokerConnection, BrokerHandle) {
        // ---
        let (client, event_loop) = AsyncClient::new(mqtt_options(settings), REQUEST_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(StateCell::new("mqtt"));

        let handle = BrokerHandle {
            client: client.clone(),
            stop: Arc::new(stop_tx),
            state: state.clone(),
        };

        let connection = BrokerConnection {
            client,
            event_loop,
            topic: settings.topic.clone(),
            backoff: Backoff::new(settings.reconnect_min, settings.reconnect_max),
            state,
            stop: stop_rx,
        };

        (connection, handle)
    }

    /// Poll the broker and dispatch messages until the handle asks to stop.
    pub async fn run<H: MessageHandler>(mut self, mut handler: H) {
        // ---
        tracing::info!(topic = %self.topic, "Starting MQTT consumer");
        self.state.set(ConnectionState::Connecting);

        loop {
            let event = tokio::select! {
                biased;
                _ = stopped(&mut self.stop) => break,
                event = self.event_loop.poll() => event,
            };

            match event {
                // rumqttc only surfaces successful CONNACKs; refusals arrive as errors
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),

                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    tracing::debug!(return_codes = ?ack.return_codes, "subscription acknowledged");
                }

                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handler.on_message(&publish.topic, &publish.payload).await;
                }

                Ok(Event::Incoming(Packet::Disconnect)) => {
                    tracing::warn!("MQTT broker closed the session");
                }

                Ok(_) => {}

                Err(err) => {
                    self.state.set(ConnectionState::Disconnected);
                    let delay = self.backoff.next_delay();
                    match &err {
                        ConnectionError::ConnectionRefused(code) => tracing::error!(
                            ?code,
                            "MQTT broker refused the connection, retrying in {}s",
                            delay.as_secs_f64()
                        ),
                        _ => tracing::warn!(
                            error = %err,
                            "MQTT connection lost, reconnecting in {}s",
                            delay.as_secs_f64()
                        ),
                    }

                    tokio::select! {
                        biased;
                        _ = stopped(&mut self.stop) => break,
                        _ = sleep(delay) => {}
                    }
                    self.state.set(ConnectionState::Connecting);
                }
            }
        }

        self.drain().await;
        self.state.set(ConnectionState::Disconnected);
        tracing::info!("MQTT consumer stopped");
    }

    fn on_connected(&mut self) {
        // ---
        self.backoff.reset();
        self.state.set(ConnectionState::Connected);

        // A clean session forgets subscriptions, so every ConnAck resubscribes.
        // try_subscribe: this task is the only one polling, awaiting could deadlock.
        match self.client.try_subscribe(self.topic.as_str(), QoS::AtLeastOnce) {
            Ok(()) => tracing::info!(topic = %self.topic, "Subscribed to MQTT topic"),
            Err(err) => tracing::error!(error = %err, topic = %self.topic, "MQTT subscribe failed"),
        }
    }

    /// Keep polling, without dispatching, until the DISCONNECT goes out.
    async fn drain(&mut self) {
        // ---
        let flushed = timeout(DRAIN_TIMEOUT, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            tracing::debug!("MQTT disconnect not flushed before timeout");
        }
    }
}

impl BrokerHandle {
    // ---
    /// Stop dispatching messages to the handler.
    pub fn stop_receiving(&self) {
        self.stop.send_replace(true);
    }

    /// Queue an MQTT DISCONNECT; flushed by the run loop while it drains.
    pub fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        self.client.try_disconnect()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

/// Resolves once a stop was requested, or the handle was dropped.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
