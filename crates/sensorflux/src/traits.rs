//! Trait seams between the pipeline components
//!
//! Each long-lived loop talks to its collaborators through one of these
//! traits, so every component is consumable (and testable) independently of
//! a live broker or store.

use async_trait::async_trait;

use crate::error::Result;
use crate::replicator::HighWaterMarks;
use crate::types::Reading;

/// Receiver for raw messages delivered by the transport subscriber.
///
/// Invoked once per message, strictly in delivery order, one at a time; the
/// subscriber awaits each call before polling the next packet. Handlers
/// absorb their own errors — a bad message must never tear down the loop.
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, payload: &[u8]);
}

/// Write side of the durable store, as seen by the ingest handler.
#[async_trait]
pub trait ReadingWriter: Send {
    /// Insert one reading; commits immediately.
    async fn insert(&self, reading: &Reading) -> Result<()>;

    /// Replace the held connection with a fresh one. Called by the handler
    /// after an insert error; blocks until connected.
    async fn reconnect(&mut self);
}

/// Read side of the durable store, as seen by the replication engine.
#[async_trait]
pub trait ReplicaSource: Send + Sync {
    /// Fetch rows newer than the given high-water marks, ordered by
    /// timestamp ascending. With no marks recorded (bootstrap), the full
    /// history is returned.
    async fn fetch_unreplicated(&self, marks: &HighWaterMarks) -> Result<Vec<Reading>>;

    /// Replace the held connection with a fresh one. Called by the engine
    /// after a scan error; blocks until connected.
    async fn reconnect(&mut self);
}

/// Idempotent document writer for the secondary store.
///
/// Writes are keyed by the reading's deterministic document id, so replaying
/// the same reading overwrites rather than duplicates.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn put_reading(&self, reading: &Reading) -> Result<()>;
}
