//! Read API gateway (EMBP): merges the per-endpoint subrouters and owns the
//! shared state they receive.
use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;

use crate::{ApiSettings, StorageSettings};

mod health;
mod readings;

// ---

/// State shared by every read API handler.
#[derive(Clone)]
pub struct ApiState {
    // ---
    pool: PgPool,

    /// `schema.table` holding the readings.
    table: Arc<str>,

    /// Cap applied to the `limit` query parameter.
    max_limit: i64,
}

pub fn router(pool: PgPool, storage: &StorageSettings, api: &ApiSettings) -> Router {
    // ---
    let state = ApiState {
        pool,
        table: storage.qualified_table().into(),
        max_limit: api.max_limit,
    };

    Router::new()
        .merge(readings::router())
        .merge(health::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::time::Duration;

    #[tokio::test]
    async fn test_router_answers_503_while_storage_is_down() {
        // ---
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy("postgres://u:p@127.0.0.1:1/none")
            .unwrap();
        let storage = StorageSettings {
            db_url: "postgres://u:p@127.0.0.1:1/none".to_string(),
            schema: "public".to_string(),
            table: "greenhouse_readings".to_string(),
            db_pool_max: 1,
            connect_retries: 1,
            connect_delay: Duration::ZERO,
        };
        let api = ApiSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_limit: 5000,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            axum::serve(listener, router(pool, &storage, &api)).await.unwrap();
        });

        let client = reqwest::Client::new();

        let response = client
            .get(format!("{base}/api/readings?limit=2"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Storage unavailable");
        assert!(body["detail"].is_string());

        // Liveness does not depend on storage
        let response = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        server.abort();
    }
}
