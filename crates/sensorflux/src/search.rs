//! Secondary store client (OpenSearch)
//!
//! Thin HTTP client over the document API. Writes are idempotent upserts:
//! `PUT /{index}/_doc/{document_id}` with the reading's deterministic key,
//! so re-indexing the same logical record overwrites rather than
//! duplicates. Index/template provisioning is an external collaborator and
//! is assumed applied before this runs.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::SecondaryStoreConfig;
use crate::error::{Error, Result};
use crate::traits::DocumentSink;
use crate::types::Reading;

/// HTTP client for the secondary searchable store.
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
    index: String,
    user: String,
    password: String,
}

impl SearchClient {
    /// Build a client. Deployments commonly run self-signed TLS, so
    /// certificate verification is configurable (and off by default there).
    pub fn new(config: &SecondaryStoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()
            .map_err(|e| Error::config(format!("failed to build http client: {}", e)))?;

        let scheme = if config.use_tls { "https" } else { "http" };
        Ok(Self {
            http,
            base_url: format!("{}://{}:{}", scheme, config.host, config.port),
            index: config.index.clone(),
            user: config.user.clone(),
            password: config.password.expose_secret().to_string(),
        })
    }

    /// Build a client and wait until the store answers, retrying on a fixed
    /// interval. Used at startup of the replication engine.
    pub async fn connect(config: &SecondaryStoreConfig) -> Result<Self> {
        let client = Self::new(config)?;
        loop {
            match client.ping().await {
                Ok(()) => {
                    info!(base_url = %client.base_url, index = %client.index, "connected to secondary store");
                    return Ok(client);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_secs = config.retry_interval_secs,
                        "secondary store unreachable, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(config.retry_interval_secs)).await;
                }
            }
        }
    }

    /// Cheap liveness probe against the cluster root endpoint.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .http
            .get(&self.base_url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| Error::secondary(format!("ping failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::secondary(format!(
                "ping returned {}",
                response.status()
            )))
        }
    }
}

#[async_trait::async_trait]
impl DocumentSink for SearchClient {
    async fn put_reading(&self, reading: &Reading) -> Result<()> {
        let url = format!(
            "{}/{}/_doc/{}",
            self.base_url,
            self.index,
            reading.document_id()
        );
        let response = self
            .http
            .put(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&reading.document())
            .send()
            .await
            .map_err(|e| Error::secondary(format!("index request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::secondary(format!(
            "index request returned {}: {}",
            status, body
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_schemes() {
        let mut config = SecondaryStoreConfig::default();
        let client = SearchClient::new(&config).unwrap();
        assert_eq!(client.base_url, "https://localhost:9200");

        config.use_tls = false;
        config.host = "search".to_string();
        let client = SearchClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://search:9200");
    }

    #[test]
    fn test_document_url_uses_deterministic_key() {
        use chrono::{TimeZone, Utc};

        let config = SecondaryStoreConfig::default();
        let client = SearchClient::new(&config).unwrap();
        let reading = Reading::new(
            "id_1",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap(),
            20.0,
        );

        let url = format!(
            "{}/{}/_doc/{}",
            client.base_url,
            client.index,
            reading.document_id()
        );
        assert_eq!(
            url,
            "https://localhost:9200/sensor_readings/_doc/id_1_2024-01-01T00:00:05"
        );
    }
}
