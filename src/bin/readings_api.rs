//! Read-side HTTP service over the stored greenhouse readings.
//!
//! Serves `GET /api/readings` and `GET /health`. The pool connects lazily, so
//! the server starts even when PostgreSQL is down; queries then answer `503`
//! until storage comes back.
//!
//! # Environment Variables
//! - `DATABASE_URL`, `DB_SCHEMA`, `READINGS_TABLE`, `DB_POOL_MAX`
//! - `API_HOST`, `API_PORT`, `MAX_LIMIT`
//! - `LOG_LEVEL`
use std::time::Duration;

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use greenhouse_telemetry::{init_tracing, router, wait_for_signal, ApiSettings, StorageSettings};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let storage = StorageSettings::from_env()?;
    let api = ApiSettings::from_env()?;
    storage.log_config();
    api.log_config();

    let pool = PgPoolOptions::new()
        .max_connections(storage.db_pool_max)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(&storage.db_url)
        .map_err(|e| anyhow!("Invalid DATABASE_URL: {}", e))?;

    let app = router(pool, &storage, &api);

    let addr = format!("{}:{}", api.host, api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let signal = wait_for_signal().await;
            tracing::info!(signal, "Stopping readings API");
        })
        .await?;

    Ok(())
}
