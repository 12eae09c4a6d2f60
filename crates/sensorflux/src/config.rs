//! Configuration for sensorflux
//!
//! Architecture:
//!   MQTT topic → Ingest Handler → PostgreSQL
//!   PostgreSQL → Replication Cursor Engine → OpenSearch
//!
//! Configuration is environment-driven with defaults for every knob, using
//! the variable names the deployments already export (`MQTT_BROKER_HOST`,
//! `POSTGRES_*`, `OPENSEARCH_*`, ...). None of these affect algorithm
//! correctness, only deployment targets.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};
use crate::types::SensitiveString;

/// Root configuration for both the ingest and replication loops
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PipelineConfig {
    /// MQTT broker connection
    #[serde(default)]
    #[validate(nested)]
    pub broker: BrokerConfig,

    /// Primary relational store (PostgreSQL)
    #[serde(default)]
    #[validate(nested)]
    pub primary: PrimaryStoreConfig,

    /// Secondary searchable store (OpenSearch)
    #[serde(default)]
    #[validate(nested)]
    pub secondary: SecondaryStoreConfig,

    /// Ingest-path settings (threshold, critical-event file, dual write)
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Replication cursor engine settings
    #[serde(default)]
    #[validate(nested)]
    pub replication: ReplicationConfig,
}

/// MQTT broker connection configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BrokerConfig {
    /// Broker hostname
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Topic to subscribe to
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Client ID (auto-generated if not specified)
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    #[validate(range(min = 5, max = 65535))]
    pub keep_alive_secs: u16,

    /// Initial connection timeout in seconds; exceeding it is fatal
    #[serde(default = "default_connect_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub connect_timeout_secs: u16,

    /// Delay before re-polling the event loop after a transport error
    #[serde(default = "default_reconnect_delay_ms")]
    #[validate(range(min = 100, max = 60000))]
    pub reconnect_delay_ms: u64,
}

/// Primary store (PostgreSQL) configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PrimaryStoreConfig {
    /// Database hostname
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name
    #[serde(default = "default_pg_db")]
    pub dbname: String,

    /// Database user
    #[serde(default = "default_pg_user")]
    pub user: String,

    /// Database password
    #[serde(default = "default_pg_password")]
    pub password: SensitiveString,

    /// Table holding ingested readings
    #[serde(default = "default_table")]
    #[validate(length(min = 1))]
    pub table: String,

    /// Interval between connection attempts; the connect loop never gives up
    #[serde(default = "default_retry_interval")]
    #[validate(range(min = 1, max = 300))]
    pub retry_interval_secs: u64,
}

/// Secondary store (OpenSearch) configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SecondaryStoreConfig {
    /// OpenSearch hostname
    #[serde(default = "default_host")]
    pub host: String,

    /// OpenSearch port
    #[serde(default = "default_os_port")]
    pub port: u16,

    /// Basic-auth user
    #[serde(default = "default_os_user")]
    pub user: String,

    /// Basic-auth password
    #[serde(default = "default_os_password")]
    pub password: SensitiveString,

    /// Use HTTPS
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Verify server certificates (deployments run self-signed)
    #[serde(default)]
    pub verify_certs: bool,

    /// Target index for replicated documents
    #[serde(default = "default_table")]
    #[validate(length(min = 1))]
    pub index: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,

    /// Interval between connection attempts at startup
    #[serde(default = "default_retry_interval")]
    #[validate(range(min = 1, max = 300))]
    pub retry_interval_secs: u64,
}

/// Ingest-path configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Temperature threshold; strictly greater triggers a critical event.
    /// Observed deployment values are 25 and 100 — always configuration,
    /// never a constant.
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Append-only critical-event file
    #[serde(default = "default_critical_file")]
    pub critical_file: PathBuf,

    /// Also write each reading directly to the secondary store
    /// (dual-sink deployment variant)
    #[serde(default)]
    pub dual_write: bool,
}

/// Replication cursor engine configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ReplicationConfig {
    /// Polling interval between replication cycles in seconds
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1, max = 3600))]
    pub poll_interval_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_topic() -> String {
    "sensors/temperature".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_pg_port() -> u16 {
    5432
}
fn default_os_port() -> u16 {
    9200
}
fn default_pg_db() -> String {
    "sensor_data".to_string()
}
fn default_pg_user() -> String {
    "user".to_string()
}
fn default_pg_password() -> SensitiveString {
    SensitiveString::new("password")
}
fn default_os_user() -> String {
    "admin".to_string()
}
fn default_os_password() -> SensitiveString {
    SensitiveString::new("admin")
}
fn default_table() -> String {
    "sensor_readings".to_string()
}
fn default_keep_alive() -> u16 {
    60
}
fn default_connect_timeout() -> u16 {
    30
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_retry_interval() -> u64 {
    5
}
fn default_threshold() -> f32 {
    25.0
}
fn default_critical_file() -> PathBuf {
    PathBuf::from("data/critical_readings.csv")
}
fn default_poll_interval() -> u64 {
    15
}
fn default_request_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl PrimaryStoreConfig {
    /// libpq-style connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host,
            self.port,
            self.user,
            self.password.expose_secret(),
            self.dbname
        )
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_mqtt_port(),
            topic: default_topic(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for PrimaryStoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_pg_port(),
            dbname: default_pg_db(),
            user: default_pg_user(),
            password: default_pg_password(),
            table: default_table(),
            retry_interval_secs: default_retry_interval(),
        }
    }
}

impl Default for SecondaryStoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_os_port(),
            user: default_os_user(),
            password: default_os_password(),
            use_tls: true,
            verify_certs: false,
            index: default_table(),
            request_timeout_secs: default_request_timeout(),
            retry_interval_secs: default_retry_interval(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            critical_file: default_critical_file(),
            dual_write: false,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            primary: PrimaryStoreConfig::default(),
            secondary: SecondaryStoreConfig::default(),
            ingest: IngestConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from the process environment, falling back to
    /// defaults for anything unset, then validate the result.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            broker: BrokerConfig {
                host: env_or("MQTT_BROKER_HOST", default_host()),
                port: env_parse("MQTT_BROKER_PORT", default_mqtt_port())?,
                topic: env_or("MQTT_TOPIC", default_topic()),
                client_id: std::env::var("MQTT_CLIENT_ID").ok(),
                keep_alive_secs: env_parse("MQTT_KEEP_ALIVE_SECS", default_keep_alive())?,
                connect_timeout_secs: env_parse(
                    "MQTT_CONNECT_TIMEOUT_SECS",
                    default_connect_timeout(),
                )?,
                reconnect_delay_ms: env_parse(
                    "MQTT_RECONNECT_DELAY_MS",
                    default_reconnect_delay_ms(),
                )?,
            },
            primary: PrimaryStoreConfig {
                host: env_or("POSTGRES_HOST", default_host()),
                port: env_parse("POSTGRES_PORT", default_pg_port())?,
                dbname: env_or("POSTGRES_DB", default_pg_db()),
                user: env_or("POSTGRES_USER", default_pg_user()),
                password: SensitiveString::new(env_or("POSTGRES_PASSWORD", "password".into())),
                table: env_or("POSTGRES_TABLE", default_table()),
                retry_interval_secs: env_parse(
                    "POSTGRES_RETRY_INTERVAL_SECS",
                    default_retry_interval(),
                )?,
            },
            secondary: SecondaryStoreConfig {
                host: env_or("OPENSEARCH_HOST", default_host()),
                port: env_parse("OPENSEARCH_PORT", default_os_port())?,
                user: env_or("OPENSEARCH_USER", default_os_user()),
                password: SensitiveString::new(env_or("OPENSEARCH_PASSWORD", "admin".into())),
                use_tls: env_parse("OPENSEARCH_USE_TLS", true)?,
                verify_certs: env_parse("OPENSEARCH_VERIFY_CERTS", false)?,
                index: env_or("OPENSEARCH_INDEX", default_table()),
                request_timeout_secs: env_parse(
                    "OPENSEARCH_REQUEST_TIMEOUT_SECS",
                    default_request_timeout(),
                )?,
                retry_interval_secs: env_parse(
                    "OPENSEARCH_RETRY_INTERVAL_SECS",
                    default_retry_interval(),
                )?,
            },
            ingest: IngestConfig {
                threshold: env_parse("TEMP_THRESHOLD", default_threshold())?,
                critical_file: PathBuf::from(env_or(
                    "CRITICAL_EVENT_FILE",
                    default_critical_file().to_string_lossy().into_owned(),
                )),
                dual_write: env_parse("INGEST_DUAL_WRITE", false)?,
            },
            replication: ReplicationConfig {
                poll_interval_secs: env_parse(
                    "REPLICATION_POLL_INTERVAL_SECS",
                    default_poll_interval(),
                )?,
            },
        };

        config
            .validate()
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        Ok(config)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::config(format!("invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
