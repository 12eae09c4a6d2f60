//! sensorflux - sensor ingestion and incremental replication
//!
//! Ingests a continuous stream of time-series sensor readings published
//! over MQTT, persists them durably in PostgreSQL, replicates them
//! incrementally into an OpenSearch index, and raises critical events when
//! values cross a configurable threshold.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌────────────────┐    ┌──────────────┐
//! │    MQTT      │───▶│ Ingest Handler │───▶│  PostgreSQL  │
//! │  subscriber  │    │ (threshold +   │    │ (primary     │
//! └──────────────┘    │  critical log) │    │  store)      │
//!                     └────────────────┘    └──────┬───────┘
//!                                                  │ cursor scan
//!                                           ┌──────▼───────┐
//!                                           │  Replicator  │
//!                                           │ (high-water  │
//!                                           │   marks)     │
//!                                           └──────┬───────┘
//!                                           ┌──────▼───────┐
//!                                           │  OpenSearch  │
//!                                           └──────────────┘
//! ```
//!
//! The ingest path and the replication path are two independent long-lived
//! loops with no shared mutable state; their only coupling is the primary
//! store's persisted rows. Replication is at-least-once with idempotent
//! document keys — never at-most-once.
//!
//! # CLI Usage (Binary)
//!
//! ```bash
//! # Run both loops in one process
//! sensorflux run
//!
//! # Run a single loop (the original deployments ran them separately)
//! sensorflux ingest
//! sensorflux replicate
//! ```

// Trait seams between components
pub mod traits;

// Common types (Reading, SensitiveString)
pub mod types;

// Error types
pub mod error;

// Pipeline components
pub mod config;
pub mod critical;
pub mod ingest;
pub mod replicator;
pub mod search;
pub mod store;
pub mod subscriber;

// Re-exports at the crate root for convenience
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use types::{Reading, SensitiveString};

/// Prelude for consumers embedding the pipeline components
pub mod prelude {
    pub use crate::config::{
        BrokerConfig, IngestConfig, PipelineConfig, PrimaryStoreConfig, ReplicationConfig,
        SecondaryStoreConfig,
    };
    pub use crate::critical::CriticalEventLog;
    pub use crate::error::{Error, Result};
    pub use crate::ingest::IngestHandler;
    pub use crate::replicator::{HighWaterMarks, Replicator};
    pub use crate::search::SearchClient;
    pub use crate::store::PgStore;
    pub use crate::subscriber::MqttSubscriber;
    pub use crate::traits::{DocumentSink, MessageHandler, ReadingWriter, ReplicaSource};
    pub use crate::types::{Reading, SensitiveString};
}
