//! Bulk API v2.0 Query operations for asynchronously querying large data sets.

use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{CsvFormat, Error, JobState, QueryJobReference};
use crate::datatable::DataTable;
use crate::http::Connection;

const SFORCE_LOCATOR_HEADER: &str = "Sforce-Locator";
const SFORCE_NUMBER_OF_RECORDS_HEADER: &str = "Sforce-NumberOfRecords";

pub(crate) fn job_path(reference: &QueryJobReference) -> String {
    format!("/jobs/query/{}", reference.id())
}

/// Whether a query job includes deleted and archived records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryOperation {
    /// Live records only.
    #[default]
    Query,
    /// Live, deleted and archived records.
    QueryAll,
}

/// A bulk query to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// SOQL query.
    pub soql: String,
    /// Query operation.
    pub operation: QueryOperation,
}

impl QueryRequest {
    /// Creates a [`QueryOperation::Query`] request.
    pub fn new(soql: impl Into<String>) -> Self {
        Self {
            soql: soql.into(),
            operation: QueryOperation::Query,
        }
    }

    /// Sets the query operation.
    #[must_use]
    pub fn operation(mut self, operation: QueryOperation) -> Self {
        self.operation = operation;
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueryJobBody<'a> {
    operation: QueryOperation,
    query: &'a str,
    #[serde(flatten)]
    format: CsvFormat,
}

/// Query job information returned by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJobInfo {
    /// Job id.
    pub id: String,
    /// Query operation.
    pub operation: QueryOperation,
    /// Queried sObject type.
    pub object: String,
    /// Current state.
    pub state: JobState,
    /// Id of the user that created the job.
    #[serde(default)]
    pub created_by_id: Option<String>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_date: Option<String>,
    /// Last modification timestamp.
    #[serde(default)]
    pub system_modstamp: Option<String>,
    /// API version the job was created with.
    #[serde(default)]
    pub api_version: Option<f64>,
    /// Records processed so far.
    #[serde(default)]
    pub number_records_processed: Option<u64>,
    /// Server-side processing retries.
    #[serde(default)]
    pub retries: Option<u64>,
    /// Total processing time in milliseconds.
    #[serde(default)]
    pub total_processing_time: Option<u64>,
    /// Error message when the job failed.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One page of query job results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryJobResults {
    /// Job the page belongs to.
    pub job_reference: QueryJobReference,
    /// Locator of the next page, absent on the last page.
    pub locator: Option<String>,
    /// Number of records on this page.
    pub number_of_records: u64,
    /// Records on this page.
    pub data_table: DataTable,
}

impl QueryJobResults {
    /// Returns true if this is the last page.
    pub fn done(&self) -> bool {
        self.locator.is_none()
    }
}

/// Client for Bulk API v2.0 Query operations.
///
/// # Example
///
/// ```no_run
/// use applink_core::bulkapi::{JobState, QueryRequest};
/// # use applink_core::Org;
///
/// # async fn run(org: Org) -> Result<(), Box<dyn std::error::Error>> {
/// let query_client = org.bulk_api().query();
/// let job = query_client.create_job(&QueryRequest::new("SELECT Id, Name FROM Account")).await?;
///
/// while query_client.get_job(&job).await?.state != JobState::JobComplete {
///     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
/// }
///
/// let mut page = query_client.get_results(&job, Some(50_000)).await?;
/// loop {
///     println!("{} records", page.number_of_records);
///     if page.done() {
///         break;
///     }
///     page = query_client.get_more_results(&page, Some(50_000)).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct QueryClient {
    connection: Connection,
}

impl QueryClient {
    /// Creates a new query client.
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Submits a query job.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn create_job(&self, request: &QueryRequest) -> Result<QueryJobReference, Error> {
        let body = CreateQueryJobBody {
            operation: request.operation,
            query: &request.soql,
            format: CsvFormat::DEFAULT,
        };
        let info: QueryJobInfo = self
            .connection
            .send_json(
                self.connection
                    .data_request(Method::POST, "/jobs/query")
                    .json(&body),
            )
            .await?;
        Ok(QueryJobReference::new(info.id))
    }

    /// Retrieves information about a query job.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_job(&self, job_reference: &QueryJobReference) -> Result<QueryJobInfo, Error> {
        Ok(self
            .connection
            .send_json(
                self.connection
                    .data_request(Method::GET, &job_path(job_reference)),
            )
            .await?)
    }

    /// Fetches the first page of results of a completed query job.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_results(
        &self,
        job_reference: &QueryJobReference,
        max_records: Option<u32>,
    ) -> Result<QueryJobResults, Error> {
        self.fetch_page(job_reference, None, max_records).await
    }

    /// Fetches the page after `previous`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMoreResults`] if `previous` was the last page.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_more_results(
        &self,
        previous: &QueryJobResults,
        max_records: Option<u32>,
    ) -> Result<QueryJobResults, Error> {
        let Some(locator) = previous.locator.as_deref() else {
            return Err(Error::NoMoreResults {
                job_id: previous.job_reference.id().to_string(),
            });
        };
        self.fetch_page(&previous.job_reference, Some(locator), max_records)
            .await
    }

    async fn fetch_page(
        &self,
        job_reference: &QueryJobReference,
        locator: Option<&str>,
        max_records: Option<u32>,
    ) -> Result<QueryJobResults, Error> {
        let path = format!("{}/results", job_path(job_reference));
        let mut request = self
            .connection
            .data_request(Method::GET, &path)
            .header(ACCEPT, "text/csv");
        if let Some(locator) = locator {
            request = request.query(&[("locator", locator)]);
        }
        if let Some(max_records) = max_records {
            request = request.query(&[("maxRecords", max_records)]);
        }

        let (headers, body) = self.connection.send_bytes(request).await?;
        let data_table = DataTable::from_csv(&body)?;
        let number_of_records = number_of_records(&headers).unwrap_or(data_table.len() as u64);

        Ok(QueryJobResults {
            job_reference: job_reference.clone(),
            locator: next_locator(&headers),
            number_of_records,
            data_table,
        })
    }
}

/// Locator of the next page; the server sends the string `null` on the last one.
fn next_locator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SFORCE_LOCATOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "null")
        .map(str::to_string)
}

fn number_of_records(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(SFORCE_NUMBER_OF_RECORDS_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
