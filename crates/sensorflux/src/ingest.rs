//! Ingest Handler
//!
//! Consumes raw messages from the transport subscriber, one at a time:
//! decode, threshold detection, durable insert, optional direct write to
//! the secondary store. All outcomes are observed via logs and side-effect
//! writes — failures are absorbed here so the delivery loop never dies.
//!
//! Per-message failure handling trades strict consistency for availability:
//! a reading that fails its primary insert is not retried by the handler
//! (redelivery is the broker's job), and the replication engine provides
//! the idempotent correction path downstream.

use tracing::{error, info, warn};

use crate::critical::CriticalEventLog;
use crate::traits::{DocumentSink, MessageHandler, ReadingWriter};
use crate::types::Reading;

/// Message-driven ingest path: parse, detect threshold breaches, persist.
pub struct IngestHandler<W: ReadingWriter> {
    store: W,
    critical: CriticalEventLog,
    dual_sink: Option<Box<dyn DocumentSink>>,
    threshold: f32,
    malformed: u64,
}

impl<W: ReadingWriter> IngestHandler<W> {
    pub fn new(store: W, critical: CriticalEventLog, threshold: f32) -> Self {
        Self {
            store,
            critical,
            dual_sink: None,
            threshold,
            malformed: 0,
        }
    }

    /// Enable the dual-sink deployment variant: every reading is also
    /// written directly to the secondary store, best effort.
    pub fn with_dual_sink(mut self, sink: Box<dyn DocumentSink>) -> Self {
        self.dual_sink = Some(sink);
        self
    }

    /// Number of messages dropped as malformed since startup.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

#[async_trait::async_trait]
impl<W: ReadingWriter> MessageHandler for IngestHandler<W> {
    async fn handle(&mut self, payload: &[u8]) {
        // 1. Decode. Malformed messages are unrecoverable: drop and log.
        let reading = match Reading::decode(payload) {
            Ok(reading) => reading,
            Err(e) => {
                self.malformed += 1;
                warn!(error = %e, dropped = self.malformed, "dropping malformed message");
                return;
            }
        };

        // 2. Threshold detection. Strictly greater-than; a failure to
        // append never blocks the primary write path.
        if reading.temperature > self.threshold {
            warn!(
                sensor_id = %reading.sensor_id,
                temperature = reading.temperature,
                threshold = self.threshold,
                "temperature above threshold"
            );
            if let Err(e) = self.critical.append(&reading) {
                warn!(error = %e, "failed to append critical event record");
            }
        }

        // 3. Durable insert. On error: fresh connection, continue with the
        // NEXT message — this one is not re-driven by the handler.
        if let Err(e) = self.store.insert(&reading).await {
            error!(
                error = %e,
                sensor_id = %reading.sensor_id,
                "primary store write failed, reconnecting"
            );
            self.store.reconnect().await;
            return;
        }

        // 4. Dual-sink variant: direct secondary write with the same
        // document key as replication. Never rolls back step 3.
        if let Some(sink) = &self.dual_sink {
            if let Err(e) = sink.put_reading(&reading).await {
                warn!(error = %e, "direct secondary write failed, continuing");
            }
        }

        info!(
            sensor_id = %reading.sensor_id,
            temperature = reading.temperature,
            "ingested reading"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Store double: records inserts, fails on demand, counts reconnects.
    #[derive(Default)]
    struct MockWriter {
        inserted: Arc<Mutex<Vec<Reading>>>,
        fail_next: Arc<Mutex<bool>>,
        reconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ReadingWriter for MockWriter {
        async fn insert(&self, reading: &Reading) -> Result<()> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(Error::primary("connection reset"));
            }
            self.inserted.lock().unwrap().push(reading.clone());
            Ok(())
        }

        async fn reconnect(&mut self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingSink;

    #[async_trait]
    impl DocumentSink for FailingSink {
        async fn put_reading(&self, _reading: &Reading) -> Result<()> {
            Err(Error::secondary("index unavailable"))
        }
    }

    fn payload(id: &str, secs: u32, temp: f32) -> Vec<u8> {
        format!(
            r#"{{"id":"{}","timestamp":"2024-01-01T00:00:{:02}","temperature":{}}}"#,
            id, secs, temp
        )
        .into_bytes()
    }

    fn handler(threshold: f32) -> (IngestHandler<MockWriter>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let critical = CriticalEventLog::new(dir.path().join("critical.csv"));
        (
            IngestHandler::new(MockWriter::default(), critical, threshold),
            dir,
        )
    }

    #[tokio::test]
    async fn test_malformed_message_isolation() {
        let (mut handler, _dir) = handler(25.0);

        // Batch of five, the third malformed: 1,2,4,5 land, 3 is dropped.
        handler.handle(&payload("id_1", 1, 20.0)).await;
        handler.handle(&payload("id_1", 2, 21.0)).await;
        handler.handle(b"{\"id\":\"id_1\"}").await;
        handler.handle(&payload("id_1", 4, 22.0)).await;
        handler.handle(&payload("id_1", 5, 23.0)).await;

        let inserted = handler.store.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 4);
        assert_eq!(handler.malformed_count(), 1);
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let (mut handler, _dir) = handler(25.0);
        let critical_path = handler.critical.path().to_path_buf();

        // Exactly at the threshold: no critical event.
        handler.handle(&payload("id_1", 1, 25.0)).await;
        assert!(!critical_path.exists());

        // Just above: one record (plus header).
        handler.handle(&payload("id_1", 2, 25.1)).await;
        let contents = std::fs::read_to_string(&critical_path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("2024-01-01T00:00:02,id_1,25.1"));

        // Both readings still reached the store.
        assert_eq!(handler.store.inserted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_error_triggers_reconnect_without_redrive() {
        let (mut handler, _dir) = handler(25.0);

        handler.handle(&payload("id_1", 1, 20.0)).await;
        *handler.store.fail_next.lock().unwrap() = true;
        handler.handle(&payload("id_1", 2, 21.0)).await;
        handler.handle(&payload("id_1", 3, 22.0)).await;

        let inserted = handler.store.inserted.lock().unwrap();
        // The failed message is not retried; the next one goes through.
        assert_eq!(inserted.len(), 2);
        assert_eq!(inserted[0].timestamp.to_string(), "2024-01-01 00:00:01 UTC");
        assert_eq!(inserted[1].timestamp.to_string(), "2024-01-01 00:00:03 UTC");
        assert_eq!(handler.store.reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dual_sink_failure_does_not_block_primary() {
        let (handler, _dir) = handler(25.0);
        let mut handler = handler.with_dual_sink(Box::new(FailingSink));

        handler.handle(&payload("id_1", 1, 20.0)).await;
        assert_eq!(handler.store.inserted.lock().unwrap().len(), 1);
    }
}
