use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::StoreError;
use super::query::PatchByQuery;
use super::traits::DocumentStore;
use super::types::*;

/// Connect timeout for every request. Requests themselves have no timeout:
/// bulk writes and statistics on a busy server can legitimately take long.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// REST client for a document store server, scoped to one database.
pub struct RavenHttpStore {
    base_url: String,
    database: String,
    client: reqwest::Client,
}

impl RavenHttpStore {
    /// Plain client, no client certificate.
    pub fn new(base_url: &str, database: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| StoreError::HttpClient(e.to_string()))?;
        Ok(Self::from_client(base_url, database, client))
    }

    /// Client authenticating with a PKCS#12 client certificate.
    pub fn with_certificate(
        base_url: &str,
        database: &str,
        cert_path: &Path,
        password: &str,
    ) -> Result<Self, StoreError> {
        let der = std::fs::read(cert_path)
            .map_err(|e| StoreError::Certificate(format!("{}: {e}", cert_path.display())))?;
        let identity = reqwest::Identity::from_pkcs12_der(&der, password)
            .map_err(|e| StoreError::Certificate(e.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .identity(identity)
            .build()
            .map_err(|e| StoreError::HttpClient(e.to_string()))?;
        Ok(Self::from_client(base_url, database, client))
    }

    fn from_client(base_url: &str, database: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            database: database.to_string(),
            client,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/databases/{}{path}", self.base_url, self.database)
    }

    fn map_send_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_connect() {
            StoreError::Connection(self.base_url.clone())
        } else {
            StoreError::HttpClient(e.to_string())
        }
    }

    /// Send a request and fail on non-success status codes.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, StoreError> {
        self.execute(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::ResponseParsing(e.to_string()))
    }
}

/// Attach collection metadata the server uses to route a document.
fn with_metadata(doc: &StoredDocument) -> Value {
    let mut body = doc.body.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("@metadata".into(), json!({ "@collection": doc.collection }));
    }
    body
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchCommand {
    id: String,
    #[serde(rename = "Type")]
    kind: &'static str,
    document: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchRequest {
    commands: Vec<BatchCommand>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BatchResponse {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutIndexesRequest<'a> {
    indexes: &'a [IndexDefinition],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryBody {
    query: String,
    query_parameters: Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PatchByQueryRequest {
    query: QueryBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OperationIdResponse {
    operation_id: u64,
}

#[async_trait]
impl DocumentStore for RavenHttpStore {
    fn url(&self) -> &str {
        &self.base_url
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn bulk_insert(&self, docs: Vec<StoredDocument>) -> Result<usize, StoreError> {
        let count = docs.len();
        let request = BatchRequest {
            commands: docs
                .iter()
                .map(|doc| BatchCommand {
                    id: doc.id.clone(),
                    kind: "PUT",
                    document: with_metadata(doc),
                })
                .collect(),
        };

        let response: BatchResponse = self
            .execute_json(self.client.post(self.endpoint("/bulk_docs")).json(&request))
            .await?;

        if response.results.len() != count {
            return Err(StoreError::BulkInsertRejected(format!(
                "sent {count} documents, server acknowledged {}",
                response.results.len()
            )));
        }
        Ok(count)
    }

    async fn put_indexes(&self, definitions: &[IndexDefinition]) -> Result<(), StoreError> {
        let request = PutIndexesRequest {
            indexes: definitions,
        };
        self.execute(self.client.put(self.endpoint("/admin/indexes")).json(&request))
            .await?;
        tracing::info!(
            database = %self.database,
            count = definitions.len(),
            "Index definitions submitted"
        );
        Ok(())
    }

    async fn statistics(&self) -> Result<DatabaseStatistics, StoreError> {
        self.execute_json(self.client.get(self.endpoint("/stats"))).await
    }

    async fn submit_patch(&self, operation: &PatchByQuery) -> Result<OperationId, StoreError> {
        let (query, query_parameters) = operation.to_rql();
        let request = PatchByQueryRequest {
            query: QueryBody {
                query,
                query_parameters,
            },
        };
        let url = self.endpoint("/queries");
        let response: OperationIdResponse = self
            .execute_json(
                self.client
                    .patch(&url)
                    .query(&[
                        ("allowStale", operation.allow_stale.to_string()),
                        ("retrieveDetails", operation.retrieve_details.to_string()),
                    ])
                    .json(&request),
            )
            .await?;
        Ok(OperationId(response.operation_id))
    }

    async fn operation_state(&self, id: OperationId) -> Result<OperationState, StoreError> {
        let request = self
            .client
            .get(self.endpoint("/operations/state"))
            .query(&[("id", id.0)]);
        match self.execute_json(request).await {
            Err(StoreError::Status { status: 404, .. }) => Err(StoreError::UnknownOperation(id.0)),
            other => other,
        }
    }

    async fn store_document(&self, doc: StoredDocument) -> Result<(), StoreError> {
        let body = with_metadata(&doc);
        self.execute(
            self.client
                .put(self.endpoint("/docs"))
                .query(&[("id", doc.id.as_str())])
                .json(&body),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scopes_to_database() {
        let store = RavenHttpStore::new("http://localhost:8080/", "Ledger").unwrap();
        assert_eq!(store.url(), "http://localhost:8080");
        assert_eq!(store.endpoint("/stats"), "http://localhost:8080/databases/Ledger/stats");
    }

    #[test]
    fn metadata_carries_collection() {
        let doc = StoredDocument {
            id: "Charge-1".into(),
            collection: "Charges".into(),
            body: json!({ "Amount": 5.0 }),
        };
        let body = with_metadata(&doc);
        assert_eq!(body["@metadata"]["@collection"], "Charges");
        assert_eq!(body["Amount"], 5.0);
    }

    #[test]
    fn batch_command_serializes_put() {
        let cmd = BatchCommand {
            id: "Charge-1".into(),
            kind: "PUT",
            document: json!({}),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["Type"], "PUT");
        assert_eq!(json["Id"], "Charge-1");
    }

    #[test]
    fn missing_certificate_is_certificate_error() {
        let err = RavenHttpStore::with_certificate(
            "https://localhost",
            "Ledger",
            Path::new("/definitely/not/here.pfx"),
            "",
        )
        .err()
        .unwrap();
        assert!(matches!(err, StoreError::Certificate(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        // Port 9 (discard) is not expected to host a store
        let store = RavenHttpStore::new("http://127.0.0.1:9", "Ledger").unwrap();
        let err = store.statistics().await.unwrap_err();
        assert!(matches!(err, StoreError::Connection(_) | StoreError::HttpClient(_)));
    }
}
