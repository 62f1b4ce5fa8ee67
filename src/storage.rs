//! Storage connector: owns the PostgreSQL pool the pipeline writes to.
//!
//! Startup is crash-only. [`StorageConnector::connect`] retries with a fixed
//! delay and gives up after the configured number of attempts; there is no
//! mode in which messages are consumed without storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;

use crate::{schema, ConnectionState, RetryExhausted, StateCell, StorageSettings, StoredDocument};

// ---

/// Per-attempt bound on acquiring a connection (the health probe timeout).
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Startup failed; the process must not go on to handle messages.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unreachable: {0}")]
    Exhausted(#[from] RetryExhausted<sqlx::Error>),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A steady-state write failed. Not retried; the caller decides.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("insert failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage connection is closed")]
    Closed,
}

/// Write side of the readings store.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Write one document and return the identity assigned by the backend.
    async fn persist(&self, document: &StoredDocument) -> Result<i64, PersistenceError>;
}

/// Live connection to the readings table.
///
/// Cloning shares the same pool and state; `close` on any clone closes all.
#[derive(Debug, Clone)]
pub struct StorageConnector {
    // ---
    pool: PgPool,
    schema: String,
    table: String,
    insert_sql: Arc<str>,
    state: Arc<StateCell>,
}

impl StorageConnector {
    // ---
    /// Connect, probe liveness and set up the schema, retrying per settings.
    ///
    /// Exhausting the retry budget marks the connector failed-permanently and
    /// returns [`StorageError::Exhausted`].
    pub async fn connect(settings: &StorageSettings) -> Result<Self, StorageError> {
        // ---
        let state = Arc::new(StateCell::new("storage"));
        state.set(ConnectionState::Connecting);

        let pool = match settings
            .retry_policy()
            .run("PostgreSQL", |_| open_pool(settings))
            .await
        {
            Ok(pool) => pool,
            Err(exhausted) => {
                state.set(ConnectionState::FailedPermanently);
                tracing::error!(
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "could not connect to PostgreSQL"
                );
                return Err(exhausted.into());
            }
        };

        state.set(ConnectionState::Connected);
        tracing::info!(table = %settings.qualified_table(), "Connected to PostgreSQL");

        Ok(Self::from_pool(pool, settings, state))
    }

    pub(crate) fn from_pool(pool: PgPool, settings: &StorageSettings, state: Arc<StateCell>) -> Self {
        // ---
        let insert_sql = format!(
            r#"
            INSERT INTO {} (
                device_id, "timestamp",
                temperature, air_humidity, soil_moisture,
                status, source_topic, ingested_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
            settings.qualified_table()
        );

        Self {
            pool,
            schema: settings.schema.clone(),
            table: settings.table.clone(),
            insert_sql: insert_sql.into(),
            state,
        }
    }

    /// Ensure the table and both indexes exist. Safe to repeat.
    pub async fn ensure_indexes(&self) -> Result<(), StorageError> {
        schema::create_schema(&self.pool, &self.schema, &self.table).await?;
        Ok(())
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Close the pool. Waits for checked-out connections to be returned.
    pub async fn close(&self) {
        // ---
        self.pool.close().await;
        self.state.set(ConnectionState::Disconnected);
    }
}

#[async_trait]
impl ReadingStore for StorageConnector {
    async fn persist(&self, doc: &StoredDocument) -> Result<i64, PersistenceError> {
        // ---
        if self.pool.is_closed() {
            return Err(PersistenceError::Closed);
        }

        let id = sqlx::query_scalar::<_, i64>(&self.insert_sql)
            .bind(&doc.device_id)
            .bind(doc.timestamp)
            .bind(doc.metrics.temperature)
            .bind(doc.metrics.air_humidity)
            .bind(doc.metrics.soil_moisture)
            .bind(doc.status.as_str())
            .bind(&doc.source.topic)
            .bind(doc.source.ingested_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(id)
    }
}

/// One connection attempt: open the pool, probe it, ensure the schema.
async fn open_pool(settings: &StorageSettings) -> Result<PgPool, sqlx::Error> {
    // ---
    let pool = PgPoolOptions::new()
        .max_connections(settings.db_pool_max)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&settings.db_url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    schema::create_schema(&pool, &settings.schema, &settings.table).await?;

    Ok(pool)
}
