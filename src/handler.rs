//! Per-message ingestion: decode, validate, classify, build, persist.
//!
//! Every stage returns a typed result and [`IngestionHandler::process`] turns
//! them into one [`Outcome`]. Nothing here escalates: a rejected message is
//! logged and dropped, and the broker connection moves on to the next one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{MessageHandler, PersistenceError, Reading, ReadingStore, Status, StoredDocument, ValidationError};

// ---

/// Why a message was dropped.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("rejected payload: {0}")]
    Validation(#[from] ValidationError),

    #[error("could not persist reading: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Terminal state of one message.
#[derive(Debug)]
pub enum Outcome {
    Stored {
        id: i64,
        device_id: String,
        status: Status,
    },
    Rejected(IngestError),
}

/// Runs the pipeline for each message delivered by the broker.
pub struct IngestionHandler<S> {
    // ---
    store: S,
}

impl<S: ReadingStore> IngestionHandler<S> {
    // ---
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Take one message from receipt to a terminal outcome.
    ///
    /// `received_at` becomes the document's `source.ingested_at`; it also
    /// stands in for the reading timestamp when the payload has none.
    pub async fn process(&self, topic: &str, payload: &[u8], received_at: DateTime<Utc>) -> Outcome {
        // ---
        match self.try_process(topic, payload, received_at).await {
            Ok((id, doc)) => Outcome::Stored {
                id,
                device_id: doc.device_id,
                status: doc.status,
            },
            Err(err) => Outcome::Rejected(err),
        }
    }

    async fn try_process(
        &self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<(i64, StoredDocument), IngestError> {
        // ---
        let reading = Reading::from_payload(payload, received_at)?;
        let doc = StoredDocument::build(&reading, topic, received_at);
        let id = self.store.persist(&doc).await?;
        Ok((id, doc))
    }
}

#[async_trait]
impl<S: ReadingStore> MessageHandler for IngestionHandler<S> {
    async fn on_message(&mut self, topic: &str, payload: &[u8]) {
        // ---
        let received_at = Utc::now();
        tracing::debug!(
            topic,
            payload = %String::from_utf8_lossy(payload),
            "message received"
        );

        match self.process(topic, payload, received_at).await {
            Outcome::Stored {
                id,
                device_id,
                status,
            } => {
                tracing::info!(%device_id, %status, id, "reading stored");
            }
            Outcome::Rejected(IngestError::Validation(ValidationError::MalformedPayload(reason))) => {
                tracing::warn!(topic, %reason, "dropping message: payload is not JSON");
            }
            Outcome::Rejected(err @ IngestError::Validation(_)) => {
                tracing::warn!(topic, error = %err, "dropping invalid reading");
            }
            Outcome::Rejected(err @ IngestError::Persistence(_)) => {
                tracing::error!(topic, error = %err, "dropping reading after write failure");
            }
        }
    }
}
