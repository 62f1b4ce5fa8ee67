//! Shared library for the greenhouse telemetry services.
//!
//! Three binaries are built on top of this crate:
//! - `greenhouse-telemetry` (src/main.rs) – the MQTT ingestion pipeline
//! - `readings_api` – HTTP read side over the persisted readings
//! - `simulator` – synthetic device publishing telemetry
//!
//! Modules follow the Explicit Module Boundary Pattern (EMBP): each module
//! exports a narrow surface through this gateway and siblings import from
//! `crate::` rather than reaching into each other's internals.

mod broker;
mod config;
mod handler;
mod logging;
mod models;
mod retry;
mod routes;
mod schema;
mod shutdown;
mod simulator;
mod state;
mod storage;
mod validate;

pub use broker::{BrokerConnection, BrokerHandle, MessageHandler};
pub use config::{ApiSettings, MqttSettings, SimulatorSettings, StorageSettings};
pub use handler::{IngestError, IngestionHandler, Outcome};
pub use logging::init_tracing;
pub use models::{Metrics, Reading, Source, Status, StoredDocument};
pub use retry::{Backoff, RetryExhausted, RetryPolicy};
pub use routes::router;
pub use shutdown::{wait_for_signal, ShutdownController};
pub use simulator::{run_simulator, SensorState};
pub use state::{ConnectionState, StateCell};
pub use storage::{PersistenceError, ReadingStore, StorageConnector, StorageError};
pub use validate::{parse_timestamp, ValidationError};
