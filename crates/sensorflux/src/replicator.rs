//! Replication Cursor Engine
//!
//! Tails the primary store on a fixed interval and projects new rows into
//! the secondary store, exactly once per logical record, using per-sensor
//! high-water marks instead of a durable change log.
//!
//! The engine has two states: **Bootstrap** (no marks yet — the scan is
//! unrestricted and returns full history) and **Incremental** (per-sensor
//! `timestamp > mark` predicates). Marks advance only after every row in a
//! cycle has been written; a failed write aborts the cycle with no
//! advancement, so the next tick retries the same rows. Combined with the
//! deterministic document key this yields at-least-once replication with
//! idempotent writes — safe to replay, never at-most-once.
//!
//! Marks are memory-resident: a restart re-enters Bootstrap and re-scans
//! full history, which the idempotent key makes harmless.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::traits::{DocumentSink, ReplicaSource};

/// Per-sensor replication cursor: the timestamp of the most recently
/// replicated reading for each sensor id.
///
/// Owned exclusively by the [`Replicator`] instance; no other component
/// reads or writes it. Invariant: marks are monotonically non-decreasing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HighWaterMarks {
    marks: BTreeMap<String, DateTime<Utc>>,
}

impl HighWaterMarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while no sensor id has a recorded mark (Bootstrap state).
    pub fn is_bootstrap(&self) -> bool {
        self.marks.is_empty()
    }

    /// Mark for one sensor id, if recorded.
    pub fn get(&self, sensor_id: &str) -> Option<DateTime<Utc>> {
        self.marks.get(sensor_id).copied()
    }

    /// Number of sensor ids with a recorded mark.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Iterate marks in stable (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.marks.iter().map(|(id, ts)| (id.as_str(), *ts))
    }

    /// Advance one sensor's mark. Regressions are ignored: a mark never
    /// decreases.
    pub fn advance(&mut self, sensor_id: impl Into<String>, timestamp: DateTime<Utc>) {
        let entry = self.marks.entry(sensor_id.into()).or_insert(timestamp);
        if timestamp > *entry {
            *entry = timestamp;
        }
    }

    /// Advance a batch of marks atomically with respect to a cycle: called
    /// once, after all of the cycle's writes succeeded.
    pub fn advance_all(&mut self, batch: BTreeMap<String, DateTime<Utc>>) {
        for (sensor_id, timestamp) in batch {
            self.advance(sensor_id, timestamp);
        }
    }
}

/// The replication engine: one long-lived, timer-driven loop reading from
/// the primary store and writing to the secondary store. Cycles are fully
/// sequential and can never overlap.
pub struct Replicator<S, D> {
    source: S,
    sink: D,
    marks: HighWaterMarks,
    poll_interval: Duration,
}

impl<S: ReplicaSource, D: DocumentSink> Replicator<S, D> {
    pub fn new(source: S, sink: D, poll_interval: Duration) -> Self {
        Self {
            source,
            sink,
            marks: HighWaterMarks::new(),
            poll_interval,
        }
    }

    /// Current cursor state (read-only).
    pub fn marks(&self) -> &HighWaterMarks {
        &self.marks
    }

    /// Execute one replication cycle: query rows past the marks, upsert
    /// each into the secondary store, then advance the marks.
    ///
    /// On any error no marks are advanced and the same rows are retried on
    /// the next tick. Returns the number of rows replicated.
    pub async fn run_cycle(&mut self) -> Result<usize> {
        let rows = self.source.fetch_unreplicated(&self.marks).await?;
        if rows.is_empty() {
            debug!("no new rows to replicate");
            return Ok(0);
        }

        debug!(rows = rows.len(), bootstrap = self.marks.is_bootstrap(), "replicating batch");

        let mut cycle_max: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for reading in &rows {
            self.sink.put_reading(reading).await?;
            let entry = cycle_max
                .entry(reading.sensor_id.clone())
                .or_insert(reading.timestamp);
            if reading.timestamp > *entry {
                *entry = reading.timestamp;
            }
        }

        // Every write in the cycle succeeded; only now do marks move.
        self.marks.advance_all(cycle_max);
        Ok(rows.len())
    }

    /// Run cycles forever on the configured interval. A cycle always
    /// completes (including failure handling) before the next tick's work
    /// begins; missed ticks are delayed, not bunched.
    pub async fn run(mut self) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "starting replication cursor engine"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(0) => {}
                Ok(rows) => info!(rows, marked_sensors = self.marks.len(), "replication cycle complete"),
                Err(e @ Error::PrimaryStore(_)) => {
                    // A dropped connection never heals on its own: the
                    // client is dead once its driver task exits, so a scan
                    // error means a fresh connection before the next tick.
                    warn!(error = %e, "query failed; reconnecting to primary store");
                    self.source.reconnect().await;
                }
                Err(e) => {
                    warn!(error = %e, "cycle aborted; marks not advanced, rows will be retried")
                }
            }
        }
    }
}
