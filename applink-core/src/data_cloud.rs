//! Data Cloud API: SQL queries and streaming ingestion.

use std::collections::HashMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::http::{self, Connection};

/// Errors raised by Data Cloud operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Transport or status error.
    #[error("Data Cloud request failed: {source}")]
    Http {
        #[source]
        source: http::Error,
    },
}

impl Error {
    /// Returns true if this error is the result of cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Http { source } => source.is_cancelled(),
        }
    }
}

impl From<http::Error> for Error {
    fn from(source: http::Error) -> Self {
        Error::Http { source }
    }
}

/// Column description in a query response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    /// SQL type name (e.g. `VARCHAR`).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Zero-based position of the column in each row.
    pub place_in_order: usize,
    /// JDBC type code.
    #[serde(default)]
    pub type_code: Option<i32>,
}

/// One batch of SQL query results.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCloudQueryResponse {
    /// Rows, each a list of values ordered by [`ColumnMetadata::place_in_order`].
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
    /// Column metadata keyed by column name.
    #[serde(default)]
    pub metadata: HashMap<String, ColumnMetadata>,
    /// Whether every batch has been returned.
    #[serde(default)]
    pub done: bool,
    /// Id to pass to [`DataCloudApi::query_next_batch`] when not done.
    #[serde(default)]
    pub next_batch_id: Option<String>,
    /// Server-side query id.
    #[serde(default)]
    pub query_id: Option<String>,
    /// Number of rows in this batch.
    #[serde(default)]
    pub row_count: Option<u64>,
    /// Query start time as reported by the server.
    #[serde(default)]
    pub start_time: Option<String>,
    /// Query end time as reported by the server.
    #[serde(default)]
    pub end_time: Option<String>,
}

impl DataCloudQueryResponse {
    /// Column names in row order.
    pub fn column_names(&self) -> Vec<&str> {
        let mut columns: Vec<(&str, usize)> = self
            .metadata
            .iter()
            .map(|(name, column)| (name.as_str(), column.place_in_order))
            .collect();
        columns.sort_by_key(|(_, place)| *place);
        columns.into_iter().map(|(name, _)| name).collect()
    }

    /// Rows as maps from column name to value.
    pub fn rows(&self) -> Vec<Map<String, Value>> {
        let columns = self.column_names();
        self.data
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(row)
                    .map(|(name, value)| ((*name).to_string(), value.clone()))
                    .collect()
            })
            .collect()
    }
}

/// Result of an ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataCloudUpsertResponse {
    /// Whether the payload was accepted for asynchronous processing.
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    sql: &'a str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    data: &'a [Map<String, Value>],
}

/// Client for the Data Cloud API.
///
/// Obtain one from [`Org::data_cloud_api`](crate::Org::data_cloud_api).
#[derive(Clone, Debug)]
pub struct DataCloudApi {
    connection: Connection,
}

impl DataCloudApi {
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Returns a client whose requests fail with a cancellation error once
    /// `cancel` fires.
    #[must_use]
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self {
            connection: self.connection.with_cancellation(cancel),
        }
    }

    /// Runs a SQL query and returns the first batch of rows.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn query(&self, sql: &str) -> Result<DataCloudQueryResponse, Error> {
        Ok(self
            .connection
            .send_json(
                self.connection
                    .request(Method::POST, "/api/v2/query")
                    .json(&QueryRequest { sql }),
            )
            .await?)
    }

    /// Fetches the batch identified by `next_batch_id`.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn query_next_batch(
        &self,
        next_batch_id: &str,
    ) -> Result<DataCloudQueryResponse, Error> {
        let path = format!("/api/v2/query/{next_batch_id}");
        Ok(self
            .connection
            .send_json(self.connection.request(Method::POST, &path))
            .await?)
    }

    /// Streams `rows` into `object` of the ingestion source `source_name`.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn upsert(
        &self,
        source_name: &str,
        object_name: &str,
        rows: &[Map<String, Value>],
    ) -> Result<DataCloudUpsertResponse, Error> {
        let path = format!("/api/v1/ingest/sources/{source_name}/{object_name}");
        Ok(self
            .connection
            .send_json(
                self.connection
                    .request(Method::POST, &path)
                    .json(&UpsertRequest { data: rows }),
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::test_connection;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_query_and_next_batch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/query"))
            .and(body_json(json!({"sql": "SELECT ssot__Id__c, ssot__Name__c FROM ssot__Account__dlm"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [["a1", "Acme"]],
                "metadata": {
                    "ssot__Name__c": {"type": "VARCHAR", "placeInOrder": 1, "typeCode": 12},
                    "ssot__Id__c": {"type": "VARCHAR", "placeInOrder": 0, "typeCode": 12}
                },
                "done": false,
                "nextBatchId": "batch-2",
                "queryId": "q1",
                "rowCount": 1,
                "startTime": "2024-01-01T00:00:00Z",
                "endTime": "2024-01-01T00:00:01Z"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/query/batch-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [["a2", "Globex"]],
                "metadata": {
                    "ssot__Id__c": {"type": "VARCHAR", "placeInOrder": 0},
                    "ssot__Name__c": {"type": "VARCHAR", "placeInOrder": 1}
                },
                "done": true
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let api = DataCloudApi::new(test_connection(&mock_server.uri()));
        let first = api
            .query("SELECT ssot__Id__c, ssot__Name__c FROM ssot__Account__dlm")
            .await
            .unwrap();
        assert!(!first.done);
        assert_eq!(first.column_names(), vec!["ssot__Id__c", "ssot__Name__c"]);
        assert_eq!(first.rows()[0]["ssot__Name__c"], "Acme");

        let next_batch_id = first.next_batch_id.as_deref().unwrap();
        let second = api.query_next_batch(next_batch_id).await.unwrap();
        assert!(second.done);
        assert_eq!(second.next_batch_id, None);
        assert_eq!(second.rows()[0]["ssot__Id__c"], "a2");
    }

    #[tokio::test]
    async fn test_upsert() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest/sources/Event_API/runner_profiles"))
            .and(body_json(json!({"data": [{"maid": 1, "first_name": "Jane"}]})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"accepted": true})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let api = DataCloudApi::new(test_connection(&mock_server.uri()));
        let row = json!({"maid": 1, "first_name": "Jane"})
            .as_object()
            .cloned()
            .unwrap();
        let response = api
            .upsert("Event_API", "runner_profiles", &[row])
            .await
            .unwrap();
        assert!(response.accepted);
    }

    #[tokio::test]
    async fn test_query_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/query"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!([
                {"errorCode": "INVALID_QUERY", "message": "Unknown table"}
            ])))
            .mount(&mock_server)
            .await;

        let api = DataCloudApi::new(test_connection(&mock_server.uri()));
        let result = api.query("SELECT * FROM nope").await;
        assert!(matches!(
            result,
            Err(Error::Http {
                source: http::Error::Status { .. }
            })
        ));
    }
}
