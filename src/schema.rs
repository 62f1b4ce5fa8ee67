//! Database schema management for the readings table.
//!
//! Ensures the table and its query indexes exist before any message is
//! handled. Applied on every startup from the storage connector; every
//! statement is `IF NOT EXISTS`, so repeating it is a no-op.

use sqlx::PgPool;

// ---

/// Index on `(timestamp DESC)`, used by time-range reads.
pub(crate) fn timestamp_index(table: &str) -> String {
    format!("idx_{table}_timestamp")
}

/// Index on `(device_id ASC, timestamp DESC)`, used by per-device reads.
pub(crate) fn device_timestamp_index(table: &str) -> String {
    format!("idx_{table}_device_timestamp")
}

/// Create or update the readings schema (idempotent).
///
/// `schema` and `table` are validated identifiers (see `config.rs`). Errors
/// are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool, schema: &str, table: &str) -> Result<(), sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
        .execute(&mut *tx)
        .await?;

    // One row per stored reading; `id` is the identity assigned at write time
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.{table} (
            id             BIGSERIAL        PRIMARY KEY,
            device_id      TEXT             NOT NULL,
            "timestamp"    TIMESTAMPTZ      NOT NULL,
            temperature    DOUBLE PRECISION NOT NULL,
            air_humidity   DOUBLE PRECISION NOT NULL,
            soil_moisture  DOUBLE PRECISION NOT NULL,
            status         TEXT             NOT NULL,
            source_topic   TEXT             NOT NULL,
            ingested_at    TIMESTAMPTZ      NOT NULL
        );
        "#
    ))
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE INDEX IF NOT EXISTS {index}
            ON {schema}.{table} ("timestamp" DESC);
        "#,
        index = timestamp_index(table),
    ))
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE INDEX IF NOT EXISTS {index}
            ON {schema}.{table} (device_id ASC, "timestamp" DESC);
        "#,
        index = device_timestamp_index(table),
    ))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
