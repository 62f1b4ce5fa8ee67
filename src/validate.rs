//! Payload validation and normalization.
//!
//! Turns the raw bytes of a telemetry message into a [`Reading`], enforcing
//! presence, type and range of every field the pipeline relies on. Unknown
//! fields are ignored.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::models::{
    Metrics, Reading, AIR_HUMIDITY_RANGE, SOIL_MOISTURE_RANGE, TEMPERATURE_RANGE,
};

// ---

/// Why a payload was rejected before it became a [`Reading`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(String),

    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),

    #[error("field `{field}` out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid ISO-8601 timestamp: {0:?}")]
    InvalidTimestamp(String),
}

/// Offset-carrying layouts tried after RFC 3339.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
];

/// Layouts without an offset; these are interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

impl Reading {
    // ---
    /// Validate a raw payload and build a [`Reading`].
    ///
    /// `now` is used as the reading's timestamp when the payload carries none.
    /// All presence and type checks run before any range check, so a payload
    /// missing a field reports `MissingField` even if another is out of range.
    /// Invalid UTF-8 sequences are replaced with U+FFFD rather than rejected.
    pub fn from_payload(payload: &[u8], now: DateTime<Utc>) -> Result<Reading, ValidationError> {
        // ---
        let text = String::from_utf8_lossy(payload);
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;

        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let device_id = require_device_id(obj)?;
        let temperature = require_number(obj, "temperature")?;
        let air_humidity = require_number(obj, "air_humidity")?;
        let soil_moisture = require_number(obj, "soil_moisture")?;

        check_range("temperature", temperature, TEMPERATURE_RANGE)?;
        check_range("air_humidity", air_humidity, AIR_HUMIDITY_RANGE)?;
        check_range("soil_moisture", soil_moisture, SOIL_MOISTURE_RANGE)?;

        let timestamp = match obj.get("timestamp") {
            None | Some(Value::Null) => now,
            Some(Value::String(raw)) => parse_timestamp(raw)?,
            Some(other) => return Err(ValidationError::InvalidTimestamp(other.to_string())),
        };

        Ok(Reading {
            device_id,
            timestamp,
            metrics: Metrics {
                temperature,
                air_humidity,
                soil_moisture,
            },
        })
    }
}

/// Parse an ISO-8601 instant and normalize it to UTC.
///
/// A trailing `Z` is equivalent to `+00:00`, values without an offset are
/// taken as UTC, and a bare date means midnight UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    // ---
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))
}

fn require_device_id(obj: &Map<String, Value>) -> Result<String, ValidationError> {
    // ---
    match obj.get("device_id") {
        None => Err(ValidationError::MissingField("device_id")),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Err(ValidationError::MissingField("device_id"))
            } else {
                Ok(trimmed.to_string())
            }
        }
        Some(_) => Err(ValidationError::WrongType("device_id")),
    }
}

fn require_number(obj: &Map<String, Value>, key: &'static str) -> Result<f64, ValidationError> {
    // ---
    match obj.get(key) {
        None => Err(ValidationError::MissingField(key)),
        Some(Value::Number(n)) => n.as_f64().ok_or(ValidationError::WrongType(key)),
        Some(_) => Err(ValidationError::WrongType(key)),
    }
}

fn check_range(field: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), ValidationError> {
    // ---
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap()
    }

    fn validate(payload: &str) -> Result<Reading, ValidationError> {
        Reading::from_payload(payload.as_bytes(), now())
    }

    #[test]
    fn test_valid_payload() {
        // ---
        let reading = validate(
            r#"{"device_id":"  gh-01 ","temperature":22,"air_humidity":65.5,
                "soil_moisture":40.25,"timestamp":"2026-02-28T12:00:00Z","firmware":"1.2"}"#,
        )
        .unwrap();

        assert_eq!(reading.device_id(), "gh-01");
        assert_eq!(reading.metrics().temperature, 22.0);
        assert_eq!(reading.metrics().air_humidity, 65.5);
        assert_eq!(reading.metrics().soil_moisture, 40.25);
        assert_eq!(
            reading.timestamp(),
            Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_malformed_and_non_object() {
        // ---
        assert!(matches!(
            validate("{not json"),
            Err(ValidationError::MalformedPayload(_))
        ));
        assert!(matches!(validate(""), Err(ValidationError::MalformedPayload(_))));
        assert_eq!(validate("[1, 2, 3]"), Err(ValidationError::NotAnObject));
        assert_eq!(validate("\"gh-01\""), Err(ValidationError::NotAnObject));
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_rejected() {
        // ---
        let mut payload = br#"{"device_id":"gh-"#.to_vec();
        payload.push(0xFF);
        payload.extend_from_slice(br#"01","temperature":20,"air_humidity":50,"soil_moisture":40}"#);

        let reading = Reading::from_payload(&payload, Utc::now()).unwrap();
        assert_eq!(reading.device_id(), "gh-\u{FFFD}01");
    }

    #[test]
    fn test_missing_fields() {
        // ---
        let cases = [
            (r#"{"temperature":20,"air_humidity":50,"soil_moisture":40}"#, "device_id"),
            (r#"{"device_id":"a","air_humidity":50,"soil_moisture":40}"#, "temperature"),
            (r#"{"device_id":"a","temperature":20,"soil_moisture":40}"#, "air_humidity"),
            (r#"{"device_id":"a","temperature":20,"air_humidity":50}"#, "soil_moisture"),
            (r#"{"device_id":"   ","temperature":20,"air_humidity":50,"soil_moisture":40}"#, "device_id"),
        ];

        for (payload, field) in cases {
            assert_eq!(validate(payload), Err(ValidationError::MissingField(field)), "{payload}");
        }
    }

    #[test]
    fn test_wrong_types() {
        // ---
        let cases = [
            (r#"{"device_id":7,"temperature":20,"air_humidity":50,"soil_moisture":40}"#, "device_id"),
            (r#"{"device_id":null,"temperature":20,"air_humidity":50,"soil_moisture":40}"#, "device_id"),
            (r#"{"device_id":"a","temperature":"20","air_humidity":50,"soil_moisture":40}"#, "temperature"),
            (r#"{"device_id":"a","temperature":20,"air_humidity":true,"soil_moisture":40}"#, "air_humidity"),
            (r#"{"device_id":"a","temperature":20,"air_humidity":50,"soil_moisture":null}"#, "soil_moisture"),
        ];

        for (payload, field) in cases {
            assert_eq!(validate(payload), Err(ValidationError::WrongType(field)), "{payload}");
        }
    }

    #[test]
    fn test_presence_checked_before_range() {
        // ---
        let err = validate(r#"{"device_id":"a","temperature":500,"air_humidity":50}"#);
        assert_eq!(err, Err(ValidationError::MissingField("soil_moisture")));
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        // ---
        assert!(validate(r#"{"device_id":"a","temperature":-20,"air_humidity":0,"soil_moisture":0}"#).is_ok());
        assert!(validate(r#"{"device_id":"a","temperature":80,"air_humidity":100,"soil_moisture":100}"#).is_ok());
    }

    #[test]
    fn test_out_of_range() {
        // ---
        let cases = [
            (r#"{"device_id":"a","temperature":-20.01,"air_humidity":50,"soil_moisture":40}"#, "temperature"),
            (r#"{"device_id":"a","temperature":80.5,"air_humidity":50,"soil_moisture":40}"#, "temperature"),
            (r#"{"device_id":"a","temperature":20,"air_humidity":-1,"soil_moisture":40}"#, "air_humidity"),
            (r#"{"device_id":"a","temperature":20,"air_humidity":100.1,"soil_moisture":40}"#, "air_humidity"),
            (r#"{"device_id":"a","temperature":20,"air_humidity":50,"soil_moisture":101}"#, "soil_moisture"),
        ];

        for (payload, expected) in cases {
            match validate(payload) {
                Err(ValidationError::OutOfRange { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected OutOfRange({expected}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_timestamp_defaults_to_now() {
        // ---
        let reading =
            validate(r#"{"device_id":"a","temperature":20,"air_humidity":50,"soil_moisture":40}"#).unwrap();
        assert_eq!(reading.timestamp(), now());

        let reading = validate(
            r#"{"device_id":"a","temperature":20,"air_humidity":50,"soil_moisture":40,"timestamp":null}"#,
        )
        .unwrap();
        assert_eq!(reading.timestamp(), now());
    }

    #[test]
    fn test_invalid_timestamp_is_rejected() {
        // ---
        for ts in [r#""yesterday""#, r#""2026-13-01T00:00:00Z""#, "1700000000"] {
            let payload = format!(
                r#"{{"device_id":"a","temperature":20,"air_humidity":50,"soil_moisture":40,"timestamp":{ts}}}"#
            );
            assert!(
                matches!(validate(&payload), Err(ValidationError::InvalidTimestamp(_))),
                "{payload}"
            );
        }
    }

    #[test]
    fn test_z_suffix_matches_utc_offset() {
        // ---
        let z = parse_timestamp("2026-02-28T12:00:00Z").unwrap();
        let offset = parse_timestamp("2026-02-28T12:00:00+00:00").unwrap();
        assert_eq!(z, offset);
    }

    #[test]
    fn test_timestamps_normalize_to_utc() {
        // ---
        let expected = Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap();

        assert_eq!(parse_timestamp("2026-02-28T09:00:00-03:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-02-28T14:00:00+0200").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-02-28T12:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-02-28 12:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-02-28T12:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2026-02-28").unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_fractional_seconds_are_kept() {
        // ---
        let ts = parse_timestamp("2026-02-28T12:00:00.250Z").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }
}
