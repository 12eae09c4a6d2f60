//! Core data types for sensorflux
//!
//! The atomic unit of data is a [`Reading`] — one sensor observation. The
//! inbound wire payload carries exactly three fields (`id`, `timestamp`,
//! `temperature`); anything that fails to decode into those is dropped by
//! the ingest path as malformed.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Second-precision ISO-8601 format used for document keys and the
/// critical-event file. Deliberately offset-free: identical
/// `(sensor_id, timestamp)` pairs must always yield the identical key.
const ISO_SECONDS: &str = "%Y-%m-%dT%H:%M:%S";

/// One sensor observation. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Sensor identifier (≤50 chars in the primary store)
    pub sensor_id: String,
    /// Observation time, timezone-aware (normalized to UTC)
    pub timestamp: DateTime<Utc>,
    /// Observed temperature in °C
    pub temperature: f32,
}

/// Wire shape of an inbound message on the sensor topic.
#[derive(Debug, Deserialize, Serialize)]
struct WirePayload {
    id: String,
    timestamp: String,
    temperature: f64,
}

impl Reading {
    /// Create a reading directly (used by the store layer and tests).
    pub fn new(sensor_id: impl Into<String>, timestamp: DateTime<Utc>, temperature: f32) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp,
            temperature,
        }
    }

    /// Decode a raw UTF-8 payload into a reading.
    ///
    /// Decode failure (malformed encoding, missing field, unparseable
    /// timestamp) is [`Error::MalformedMessage`] — unrecoverable, the caller
    /// drops the message and continues.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let wire: WirePayload = serde_json::from_slice(payload)
            .map_err(|e| Error::malformed(format!("invalid payload: {}", e)))?;
        let timestamp = parse_timestamp(&wire.timestamp)?;
        Ok(Self {
            sensor_id: wire.id,
            timestamp,
            temperature: wire.temperature as f32,
        })
    }

    /// Deterministic document key: `<sensor_id>_<iso_timestamp>` at second
    /// precision. Re-indexing the same key overwrites rather than
    /// duplicates, which is what makes replication replays side-effect-free.
    pub fn document_id(&self) -> String {
        format!("{}_{}", self.sensor_id, self.timestamp.format(ISO_SECONDS))
    }

    /// Second-precision ISO-8601 rendering of the timestamp.
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.format(ISO_SECONDS).to_string()
    }

    /// Document body written to the secondary store.
    pub fn document(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.sensor_id,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            "temperature": self.temperature,
        })
    }
}

/// Parse an ISO-8601 timestamp at second precision.
///
/// Accepts RFC 3339 with an offset, or a naive `YYYY-MM-DDTHH:MM:SS` which
/// the original producers emit; naive times are taken as UTC.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, ISO_SECONDS)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::malformed(format!("invalid timestamp '{}': {}", s, e)))
}

/// A wrapper around `SecretString` that provides safe handling of sensitive
/// values (store passwords). Redacts the value in `Debug`, `Display` and
/// `Serialize` output so credentials cannot leak through logs or config
/// dumps; `expose_secret()` yields the actual value for authentication.
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string from any string-like value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value. Use sparingly.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}
