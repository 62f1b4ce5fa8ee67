//! Data models for the greenhouse ingestion pipeline.
//!
//! A [`Reading`] only exists once a payload has passed validation (see
//! `validate.rs`); from it the pipeline derives a [`Status`] and assembles the
//! [`StoredDocument`] that is written to storage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Inclusive bounds accepted for each metric.
pub(crate) const TEMPERATURE_RANGE: (f64, f64) = (-20.0, 80.0);
pub(crate) const AIR_HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);
pub(crate) const SOIL_MOISTURE_RANGE: (f64, f64) = (0.0, 100.0);

/// The three sensor values carried by every telemetry message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    // ---
    pub temperature: f64,
    pub air_humidity: f64,
    pub soil_moisture: f64,
}

/// Validated, in-range sensor values plus device identity and timestamp.
///
/// Fields are crate-private: the only way to obtain a `Reading` is
/// [`Reading::from_payload`], so every instance satisfies the range invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    // ---
    pub(crate) device_id: String,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) metrics: Metrics,
}

impl Reading {
    // ---
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics
    }
}

/// Derived severity label for a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Warning,
    Critical,
}

impl Status {
    // ---
    /// Classify metric values. Critical supersedes warning, which supersedes
    /// normal; all thresholds are exclusive.
    pub fn classify(temperature: f64, air_humidity: f64, soil_moisture: f64) -> Status {
        // ---
        if temperature > 45.0 || soil_moisture < 10.0 {
            Status::Critical
        } else if temperature > 35.0 || air_humidity < 30.0 || soil_moisture < 20.0 {
            Status::Warning
        } else {
            Status::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Critical => "critical",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion metadata attached to every stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    // ---
    pub topic: String,
    pub ingested_at: DateTime<Utc>,
}

/// The persisted record: reading, derived status and ingestion metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    // ---
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: Metrics,
    pub status: Status,
    pub source: Source,
}

impl StoredDocument {
    // ---
    /// Assemble the persistable record for a validated reading.
    ///
    /// `ingested_at` is the instant the pipeline received the message, which
    /// is distinct from the reading's own `timestamp`.
    pub fn build(reading: &Reading, topic: &str, ingested_at: DateTime<Utc>) -> StoredDocument {
        // ---
        let m = reading.metrics;
        StoredDocument {
            device_id: reading.device_id.clone(),
            timestamp: reading.timestamp,
            metrics: m,
            status: Status::classify(m.temperature, m.air_humidity, m.soil_moisture),
            source: Source {
                topic: topic.to_string(),
                ingested_at,
            },
        }
    }
}
