//! HTTP implementation of the storage-node wire protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use torusdb_core::{DatabaseDescriptor, Error, Result, SearchHit, VectorRecord};

use crate::api::ShardApi;
use crate::wire::{self, BINARY_RESULTS};

/// Client for one storage node, holding the endpoint and a reusable
/// transport. Safe for concurrent calls.
#[derive(Clone)]
pub struct HttpShardClient {
    base_url: String,
    http: reqwest::Client,
}

/// Error body returned by storage nodes.
#[derive(Debug, Deserialize)]
struct WireError {
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    expected: Option<usize>,
    #[serde(default)]
    actual: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody<'a> {
    probe: &'a [f32],
    k: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanBody {
    from_exclusive: i64,
    to_inclusive: i64,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct IdAck {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct DeleteAck {
    deleted: bool,
}

impl HttpShardClient {
    /// Creates a client for a shard endpoint over a shared transport.
    #[must_use]
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::timeout(format!("shard at {}: {err}", self.base_url))
        } else if err.is_connect() {
            Error::unavailable(format!("shard at {}: {err}", self.base_url))
        } else {
            Error::protocol(format!("shard at {}: {err}", self.base_url))
        }
    }

    /// Maps a non-success response to the coordinator error surface. The
    /// structured error body wins; the status code is the fallback.
    async fn error_from(
        &self,
        response: reqwest::Response,
        entity: &'static str,
        id: String,
    ) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if let Ok(wire) = serde_json::from_str::<WireError>(&body) {
            return match wire.kind.as_str() {
                "NOT_FOUND" => Error::not_found(entity, id),
                "DIMENSION_MISMATCH" => Error::dimension_mismatch(
                    wire.expected.unwrap_or_default(),
                    wire.actual.unwrap_or_default(),
                ),
                "CONFLICT" => Error::conflict(wire.message),
                "UNAVAILABLE" => Error::unavailable(wire.message),
                _ => Error::internal(wire.message),
            };
        }
        match status.as_u16() {
            404 => Error::not_found(entity, id),
            409 => Error::conflict(body),
            503 => Error::unavailable(format!("shard at {}", self.base_url)),
            _ => Error::internal(format!("shard at {} answered {status}: {body}", self.base_url)),
        }
    }

    async fn expect_ok(
        &self,
        response: reqwest::Response,
        entity: &'static str,
        id: impl ToString,
    ) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(self.error_from(response, entity, id.to_string()).await)
        }
    }

    async fn decode_search(&self, response: reqwest::Response) -> Result<Vec<SearchHit>> {
        let binary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(BINARY_RESULTS));
        if binary {
            let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
            wire::decode_hits(&bytes)
        } else {
            response
                .json::<Vec<SearchHit>>()
                .await
                .map_err(|e| self.transport_error(e))
        }
    }
}

#[async_trait]
impl ShardApi for HttpShardClient {
    async fn add_vector(&self, record: &VectorRecord) -> Result<i64> {
        let url = self.url(&format!("/databases/{}/vectors", record.database_id));
        let response = self
            .http
            .post(url)
            .json(record)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "vector", record.id).await?;
        let ack: IdAck = response.json().await.map_err(|e| self.transport_error(e))?;
        Ok(ack.id)
    }

    async fn get_vector(&self, database_id: &str, id: i64) -> Result<VectorRecord> {
        let url = self.url(&format!("/databases/{database_id}/vectors/{id}"));
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "vector", id).await?;
        response.json().await.map_err(|e| self.transport_error(e))
    }

    async fn delete_vector(&self, database_id: &str, id: i64) -> Result<bool> {
        let url = self.url(&format!("/databases/{database_id}/vectors/{id}"));
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "vector", id).await?;
        let ack: DeleteAck = response.json().await.map_err(|e| self.transport_error(e))?;
        Ok(ack.deleted)
    }

    async fn search(&self, database_id: &str, probe: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let url = self.url(&format!("/databases/{database_id}/search"));
        let response = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, BINARY_RESULTS)
            .json(&SearchBody { probe, k })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "database", database_id).await?;
        self.decode_search(response).await
    }

    async fn create_database(&self, database: &DatabaseDescriptor) -> Result<()> {
        let url = self.url("/databases");
        let response = self
            .http
            .post(url)
            .json(database)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.expect_ok(response, "database", &database.id).await?;
        Ok(())
    }

    async fn drop_database(&self, database_id: &str) -> Result<()> {
        let url = self.url(&format!("/databases/{database_id}"));
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.expect_ok(response, "database", database_id).await?;
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        let url = self.url("/databases");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "database", "*").await?;
        response.json().await.map_err(|e| self.transport_error(e))
    }

    async fn scan_range(
        &self,
        database_id: &str,
        from_exclusive: i64,
        to_inclusive: i64,
        limit: usize,
    ) -> Result<Vec<VectorRecord>> {
        let url = self.url(&format!("/databases/{database_id}/scan"));
        let response = self
            .http
            .post(url)
            .json(&ScanBody {
                from_exclusive,
                to_inclusive,
                limit,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "database", database_id).await?;
        response.json().await.map_err(|e| self.transport_error(e))
    }

    async fn put_batch(&self, database_id: &str, records: &[VectorRecord]) -> Result<()> {
        let url = self.url(&format!("/databases/{database_id}/batch"));
        let response = self
            .http
            .post(url)
            .json(&records)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.expect_ok(response, "database", database_id).await?;
        Ok(())
    }

    async fn delete_batch(&self, database_id: &str, ids: &[i64]) -> Result<()> {
        let url = self.url(&format!("/databases/{database_id}/batch-delete"));
        let response = self
            .http
            .post(url)
            .json(&ids)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.expect_ok(response, "database", database_id).await?;
        Ok(())
    }

    async fn add_vector_replica(
        &self,
        record: &VectorRecord,
        source_shard_id: &str,
    ) -> Result<()> {
        let url = self.url(&format!(
            "/databases/{}/replicas/{source_shard_id}/vectors",
            record.database_id
        ));
        let response = self
            .http
            .post(url)
            .json(record)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.expect_ok(response, "replica", record.id).await?;
        Ok(())
    }

    async fn get_vector_replica(
        &self,
        database_id: &str,
        id: i64,
        source_shard_id: &str,
    ) -> Result<VectorRecord> {
        let url = self.url(&format!(
            "/databases/{database_id}/replicas/{source_shard_id}/vectors/{id}"
        ));
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "replica", id).await?;
        response.json().await.map_err(|e| self.transport_error(e))
    }

    async fn delete_vector_replica(
        &self,
        database_id: &str,
        id: i64,
        source_shard_id: &str,
    ) -> Result<bool> {
        let url = self.url(&format!(
            "/databases/{database_id}/replicas/{source_shard_id}/vectors/{id}"
        ));
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "replica", id).await?;
        let ack: DeleteAck = response.json().await.map_err(|e| self.transport_error(e))?;
        Ok(ack.deleted)
    }

    async fn search_replicas(
        &self,
        database_id: &str,
        probe: &[f32],
        k: usize,
        source_shard_id: &str,
    ) -> Result<Vec<SearchHit>> {
        let url = self.url(&format!(
            "/databases/{database_id}/replicas/{source_shard_id}/search"
        ));
        let response = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, BINARY_RESULTS)
            .json(&SearchBody { probe, k })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.expect_ok(response, "database", database_id).await?;
        self.decode_search(response).await
    }

    async fn ping(&self) -> Result<()> {
        let url = self.url("/health");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.expect_ok(response, "shard", &self.base_url).await?;
        Ok(())
    }
}
