//! Durable Store Adapter (PostgreSQL)
//!
//! Wraps the primary relational store: schema bootstrap, connection health,
//! reconnect-on-error. Every operation commits immediately — there are no
//! multi-statement transactions spanning readings, and duplicates are legal
//! (at-least-once ingestion; replication dedupes via the document key).

use chrono::{DateTime, Utc};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info, warn};

use crate::config::PrimaryStoreConfig;
use crate::error::{Error, Result};
use crate::replicator::HighWaterMarks;
use crate::traits::{ReadingWriter, ReplicaSource};
use crate::types::Reading;

/// Query parameter for the incremental scan. Kept as a plain enum so query
/// building stays a pure, testable function.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanParam {
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// PostgreSQL adapter owning one connection.
///
/// The ingest handler and the replication engine each hold their own
/// `PgStore`; connections are never shared across components.
pub struct PgStore {
    client: Client,
    config: PrimaryStoreConfig,
}

impl PgStore {
    /// Connect, retrying indefinitely on a fixed interval. This path never
    /// gives up: the ingest process has no fallback without its store.
    pub async fn connect(config: PrimaryStoreConfig) -> Self {
        let client = Self::connect_with_retry(&config).await;
        Self { client, config }
    }

    async fn connect_with_retry(config: &PrimaryStoreConfig) -> Client {
        loop {
            match Self::try_connect(config).await {
                Ok(client) => {
                    info!(
                        host = %config.host,
                        dbname = %config.dbname,
                        "connected to primary store"
                    );
                    return client;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_secs = config.retry_interval_secs,
                        "primary store connection failed, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(
                        config.retry_interval_secs,
                    ))
                    .await;
                }
            }
        }
    }

    async fn try_connect(config: &PrimaryStoreConfig) -> Result<Client> {
        let conn_string = config.connection_string();
        let (client, connection) = tokio_postgres::connect(&conn_string, NoTls)
            .await
            .map_err(|e| Error::primary(format!("failed to connect: {}", e)))?;

        // Drive the connection on its own task; it resolves when the
        // connection drops, which the owning loop observes as query errors.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "primary store connection terminated");
            }
        });

        Ok(client)
    }

    /// Drop the held client and establish a fresh connection, retrying
    /// until one succeeds. Both pipeline roles recover this way: the ingest
    /// handler after a failed insert, the replication engine after a failed
    /// scan.
    async fn refresh_connection(&mut self) {
        warn!("replacing primary store connection");
        self.client = Self::connect_with_retry(&self.config).await;
    }

    /// Create the readings table if absent. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        let ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (
                id VARCHAR(50) NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                temperature REAL NOT NULL
            )"#,
            self.config.table
        );
        self.client
            .execute(ddl.as_str(), &[])
            .await
            .map_err(|e| Error::primary(format!("schema bootstrap failed: {}", e)))?;
        info!(table = %self.config.table, "primary store schema ready");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReadingWriter for PgStore {
    async fn insert(&self, reading: &Reading) -> Result<()> {
        let sql = format!(
            r#"INSERT INTO "{}" (id, timestamp, temperature) VALUES ($1, $2, $3)"#,
            self.config.table
        );
        self.client
            .execute(
                sql.as_str(),
                &[&reading.sensor_id, &reading.timestamp, &reading.temperature],
            )
            .await
            .map_err(|e| Error::primary(format!("insert failed: {}", e)))?;
        Ok(())
    }

    async fn reconnect(&mut self) {
        self.refresh_connection().await;
    }
}

#[async_trait::async_trait]
impl ReplicaSource for PgStore {
    async fn fetch_unreplicated(&self, marks: &HighWaterMarks) -> Result<Vec<Reading>> {
        let (sql, scan_params) = build_scan_query(&self.config.table, marks);
        let params: Vec<&(dyn ToSql + Sync)> = scan_params
            .iter()
            .map(|p| match p {
                ScanParam::Text(s) => s as &(dyn ToSql + Sync),
                ScanParam::Timestamp(ts) => ts as &(dyn ToSql + Sync),
            })
            .collect();

        let rows = self
            .client
            .query(sql.as_str(), &params)
            .await
            .map_err(|e| Error::primary(format!("scan failed: {}", e)))?;

        let mut readings = Vec::with_capacity(rows.len());
        for row in rows {
            let sensor_id: String = row
                .try_get(0)
                .map_err(|e| Error::primary(format!("bad id column: {}", e)))?;
            let timestamp: DateTime<Utc> = row
                .try_get(1)
                .map_err(|e| Error::primary(format!("bad timestamp column: {}", e)))?;
            let temperature: f32 = row
                .try_get(2)
                .map_err(|e| Error::primary(format!("bad temperature column: {}", e)))?;
            readings.push(Reading::new(sensor_id, timestamp, temperature));
        }
        Ok(readings)
    }

    async fn reconnect(&mut self) {
        self.refresh_connection().await;
    }
}

/// Build the incremental scan for the replication engine.
///
/// Bootstrap (no marks) is a full, unrestricted scan. Otherwise each marked
/// sensor gets `id = $n AND timestamp > $m`, OR-combined, plus an
/// `id NOT IN (...)` arm so sensors without a mark keep their full history
/// eligible. Results are always ordered by timestamp ascending.
pub fn build_scan_query(table: &str, marks: &HighWaterMarks) -> (String, Vec<ScanParam>) {
    let base = format!(r#"SELECT id, timestamp, temperature FROM "{}""#, table);

    if marks.is_bootstrap() {
        return (format!(r#"{} ORDER BY "timestamp" ASC"#, base), Vec::new());
    }

    let mut clauses = Vec::with_capacity(marks.len() + 1);
    let mut id_placeholders = Vec::with_capacity(marks.len());
    let mut params = Vec::with_capacity(marks.len() * 2);

    for (sensor_id, mark) in marks.iter() {
        let id_idx = params.len() + 1;
        clauses.push(format!(
            r#"("id" = ${} AND "timestamp" > ${})"#,
            id_idx,
            id_idx + 1
        ));
        id_placeholders.push(format!("${}", id_idx));
        params.push(ScanParam::Text(sensor_id.to_string()));
        params.push(ScanParam::Timestamp(mark));
    }
    clauses.push(format!(r#""id" NOT IN ({})"#, id_placeholders.join(", ")));

    let sql = format!(
        r#"{} WHERE {} ORDER BY "timestamp" ASC"#,
        base,
        clauses.join(" OR ")
    );
    (sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap()
    }

    #[test]
    fn test_scan_query_bootstrap() {
        let marks = HighWaterMarks::new();
        let (sql, params) = build_scan_query("sensor_readings", &marks);

        assert_eq!(
            sql,
            r#"SELECT id, timestamp, temperature FROM "sensor_readings" ORDER BY "timestamp" ASC"#
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_scan_query_single_mark() {
        let mut marks = HighWaterMarks::new();
        marks.advance("id_1", ts(5));
        let (sql, params) = build_scan_query("sensor_readings", &marks);

        assert!(sql.contains(r#"("id" = $1 AND "timestamp" > $2)"#));
        assert!(sql.contains(r#"OR "id" NOT IN ($1)"#));
        assert!(sql.ends_with(r#"ORDER BY "timestamp" ASC"#));
        assert_eq!(
            params,
            vec![
                ScanParam::Text("id_1".to_string()),
                ScanParam::Timestamp(ts(5)),
            ]
        );
    }

    #[test]
    fn test_scan_query_multiple_marks() {
        let mut marks = HighWaterMarks::new();
        marks.advance("id_2", ts(9));
        marks.advance("id_1", ts(5));
        let (sql, params) = build_scan_query("sensor_readings", &marks);

        // BTreeMap keeps clause order stable regardless of insertion order.
        assert!(sql.contains(r#"("id" = $1 AND "timestamp" > $2) OR ("id" = $3 AND "timestamp" > $4)"#));
        assert!(sql.contains(r#"OR "id" NOT IN ($1, $3)"#));
        assert_eq!(params.len(), 4);
        assert_eq!(params[0], ScanParam::Text("id_1".to_string()));
        assert_eq!(params[1], ScanParam::Timestamp(ts(5)));
        assert_eq!(params[2], ScanParam::Text("id_2".to_string()));
        assert_eq!(params[3], ScanParam::Timestamp(ts(9)));
    }

    #[test]
    fn test_connection_string_shape() {
        let config = PrimaryStoreConfig::default();
        let conn = config.connection_string();
        assert!(conn.contains("host=localhost"));
        assert!(conn.contains("port=5432"));
        assert!(conn.contains("dbname=sensor_data"));
        assert!(conn.contains("user=user"));
        assert!(conn.contains("password=password"));
    }
}
