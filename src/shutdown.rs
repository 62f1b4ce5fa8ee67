//! Graceful, best-effort termination of the ingestion pipeline.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::{BrokerHandle, StorageConnector};

// ---

/// How long the broker task gets to wind down before it is aborted.
const BROKER_GRACE: Duration = Duration::from_secs(5);

/// Wait for SIGINT or SIGTERM; returns the name of the signal received.
pub async fn wait_for_signal() -> &'static str {
    // ---
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for SIGTERM, only Ctrl-C will stop");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

/// Holds both connections and closes them in a fixed order.
///
/// Every step runs even if an earlier one failed.
pub struct ShutdownController {
    // ---
    broker: BrokerHandle,
    storage: StorageConnector,
    grace: Duration,
}

impl ShutdownController {
    // ---
    pub fn new(broker: BrokerHandle, storage: StorageConnector) -> Self {
        Self {
            broker,
            storage,
            grace: BROKER_GRACE,
        }
    }

    /// Stop receiving, disconnect from the broker, close storage.
    ///
    /// `broker_task` is the task running `BrokerConnection::run`. In-flight
    /// messages are not drained; the task is aborted if it overruns the grace
    /// period.
    pub async fn shutdown(self, broker_task: JoinHandle<()>) {
        // ---
        tracing::info!("Shutting down consumer");

        self.broker.stop_receiving();

        if let Err(err) = self.broker.disconnect() {
            tracing::debug!(error = %err, "MQTT disconnect request not sent");
        }

        let abort = broker_task.abort_handle();
        match timeout(self.grace, broker_task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "MQTT task ended abnormally"),
            Err(_) => {
                tracing::warn!("MQTT task did not stop in time, aborting");
                abort.abort();
            }
        }

        self.storage.close().await;
        tracing::info!("Consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Arc;

    use sqlx::postgres::PgPoolOptions;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    use crate::{BrokerConnection, ConnectionState, MqttSettings, StateCell, StorageSettings};

    fn storage_settings() -> StorageSettings {
        // ---
        StorageSettings {
            db_url: "postgres://u:p@127.0.0.1:1/none".to_string(),
            schema: "public".to_string(),
            table: "greenhouse_readings".to_string(),
            db_pool_max: 1,
            connect_retries: 1,
            connect_delay: Duration::ZERO,
        }
    }

    fn mqtt_settings() -> MqttSettings {
        // ---
        MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            topic: "greenhouse/telemetry".to_string(),
            client_id: "test-consumer".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }

    /// A connector over a lazy pool; nothing is ever dialled.
    fn idle_storage() -> StorageConnector {
        // ---
        let settings = storage_settings();
        let pool = PgPoolOptions::new()
            .connect_lazy(&settings.db_url)
            .unwrap();
        let state = Arc::new(StateCell::new("storage"));
        state.set(ConnectionState::Connected);
        StorageConnector::from_pool(pool, &settings, state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_closed_even_when_broker_task_hangs() {
        // ---
        let storage = idle_storage();
        let storage_state = storage.state();

        // Dropping the connection closes the request channel, so disconnect() fails
        let (connection, handle) = BrokerConnection::new(&mqtt_settings());
        drop(connection);
        assert!(handle.disconnect().is_err());

        // A broker task that never finishes on its own
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let stuck = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });

        let start = Instant::now();
        ShutdownController::new(handle, storage).shutdown(stuck).await;

        assert!(start.elapsed() >= BROKER_GRACE);
        assert_eq!(*storage_state.borrow(), ConnectionState::Disconnected);
        // The aborted task dropped its sender
        assert!(timeout(Duration::from_secs(1), alive_rx).await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_broker_task_is_not_waited_on() {
        // ---
        let storage = idle_storage();
        let storage_state = storage.state();
        let (_connection, handle) = BrokerConnection::new(&mqtt_settings());

        let done = tokio::spawn(async {});

        let start = Instant::now();
        ShutdownController::new(handle, storage).shutdown(done).await;

        assert!(start.elapsed() < BROKER_GRACE);
        assert_eq!(*storage_state.borrow(), ConnectionState::Disconnected);
    }
}
