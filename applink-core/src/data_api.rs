//! REST Data API: record CRUD, SOQL queries and unit-of-work commits.
//!
//! # Example
//!
//! ```no_run
//! use applink_core::data_api::{RecordForCreate, RecordForUpdate};
//! # use applink_core::Org;
//! use serde_json::json;
//!
//! # async fn run(org: Org) -> Result<(), Box<dyn std::error::Error>> {
//! let data_api = org.data_api();
//!
//! let created = data_api
//!     .create(&RecordForCreate::new("Account").field("Name", json!("Acme")))
//!     .await?;
//! data_api
//!     .update(&RecordForUpdate::new("Account", &created.id).field("Industry", json!("Technology")))
//!     .await?;
//!
//! let mut page = data_api.query("SELECT Id, Name FROM Account").await?;
//! loop {
//!     for record in &page.records {
//!         println!("{:?}", record.get_str("Name"));
//!     }
//!     if page.done {
//!         break;
//!     }
//!     page = data_api.query_more(&page).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::http::{self, Connection};
use crate::record::{self, RecordQueryResult};
use crate::unit_of_work::{GraphResponse, ReferenceId, UnitOfWork};

/// Errors raised by Data API operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Transport or status error.
    #[error("Data API request failed: {source}")]
    Http {
        #[source]
        source: http::Error,
    },
    /// A query result could not be mapped into records.
    #[error("Failed to map query result: {source}")]
    Record {
        #[source]
        source: record::Error,
    },
    /// A subrequest of a unit-of-work commit failed.
    #[error("Subrequest {reference_id} failed with status {status}: {message}")]
    CompositeSubrequest {
        /// Reference id of the failed subrequest.
        reference_id: String,
        /// HTTP status of the subrequest.
        status: u16,
        /// Salesforce error code, when present.
        code: Option<String>,
        /// Server-provided error message.
        message: String,
    },
    /// A successful subrequest returned no record id.
    #[error("Subrequest {reference_id} returned no record id")]
    MissingId {
        /// Reference id of the subrequest.
        reference_id: String,
    },
    /// The server returned a reference id that was never registered.
    #[error("Response contains unknown reference id {reference_id}")]
    UnknownReference {
        /// The unexpected reference id.
        reference_id: String,
    },
}

impl Error {
    /// Returns true if this error is the result of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Http { source } if source.is_cancelled())
    }
}

impl From<http::Error> for Error {
    fn from(source: http::Error) -> Self {
        Error::Http { source }
    }
}

impl From<record::Error> for Error {
    fn from(source: record::Error) -> Self {
        Error::Record { source }
    }
}

/// A record to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordForCreate {
    /// sObject type (e.g. `Account`).
    pub type_name: String,
    /// Field values.
    pub fields: Map<String, Value>,
}

impl RecordForCreate {
    /// Creates a record of `type_name` with no fields.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Map::new(),
        }
    }

    /// Sets a field value.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Changes to an existing record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordForUpdate {
    /// sObject type (e.g. `Account`).
    pub type_name: String,
    /// Id of the record to update.
    pub id: String,
    /// Field values to change.
    pub fields: Map<String, Value>,
}

impl RecordForUpdate {
    /// Creates an update of record `id` with no field changes.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Sets a field value.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Outcome of a create, update or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordModificationResult {
    /// Id of the affected record.
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

/// Client for the REST Data API.
///
/// Obtain one from [`Org::data_api`](crate::Org::data_api).
#[derive(Clone, Debug)]
pub struct DataApi {
    connection: Connection,
}

impl DataApi {
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

    /// Returns the API version being used.
    pub fn api_version(&self) -> &str {
        self.connection.api_version()
    }

    /// Inserts a record.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn create(&self, record: &RecordForCreate) -> Result<RecordModificationResult, Error> {
        let path = format!("/sobjects/{}", record.type_name);
        let response: CreateResponse = self
            .connection
            .send_json(
                self.connection
                    .data_request(Method::POST, &path)
                    .json(&record.fields),
            )
            .await?;
        Ok(RecordModificationResult { id: response.id })
    }

    /// Updates a record. Any `Id` key in the field map is not sent.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn update(&self, record: &RecordForUpdate) -> Result<RecordModificationResult, Error> {
        let path = format!("/sobjects/{}/{}", record.type_name, record.id);
        let body: Map<String, Value> = record
            .fields
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("id"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        self.connection
            .send(self.connection.data_request(Method::PATCH, &path).json(&body))
            .await?;
        Ok(RecordModificationResult {
            id: record.id.clone(),
        })
    }

    /// Deletes a record.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn delete(&self, type_name: &str, id: &str) -> Result<RecordModificationResult, Error> {
        let path = format!("/sobjects/{type_name}/{id}");
        self.connection
            .send(self.connection.data_request(Method::DELETE, &path))
            .await?;
        Ok(RecordModificationResult { id: id.to_string() })
    }

    /// Runs a SOQL query and returns the first page of results.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn query(&self, soql: &str) -> Result<RecordQueryResult, Error> {
        let value: Value = self
            .connection
            .send_json(
                self.connection
                    .data_request(Method::GET, "/query")
                    .query(&[("q", soql)]),
            )
            .await?;
        Ok(RecordQueryResult::from_json(value)?)
    }

    /// Fetches the page after `previous`.
    ///
    /// Returns an empty, done result when `previous` has no next page.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn query_more(&self, previous: &RecordQueryResult) -> Result<RecordQueryResult, Error> {
        let Some(next_records_url) = previous.next_records_url.as_deref() else {
            return Ok(RecordQueryResult::exhausted(previous.total_size));
        };

        let value: Value = self
            .connection
            .send_json(self.connection.request(Method::GET, next_records_url))
            .await?;
        Ok(RecordQueryResult::from_json(value)?)
    }

    /// Starts an empty unit of work.
    pub fn new_unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new()
    }

    /// Commits every change registered in `unit` as one composite graph.
    ///
    /// Either every registered reference id maps to its result, or the commit
    /// fails with the first failed subrequest. Committing an empty unit sends
    /// nothing.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn commit_unit_of_work(
        &self,
        unit: UnitOfWork,
    ) -> Result<HashMap<ReferenceId, RecordModificationResult>, Error> {
        if unit.is_empty() {
            return Ok(HashMap::new());
        }

        tracing::debug!(subrequests = unit.len(), "Committing unit of work");
        let request = unit.to_graph_request(self.connection.api_version());
        let response: GraphResponse = self
            .connection
            .send_json(
                self.connection
                    .data_request(Method::POST, "/composite/graph")
                    .json(&request),
            )
            .await?;
        unit.correlate(response)
    }
}
