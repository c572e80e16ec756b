//! Bulk API v2.0 Ingest operations for loading, updating, or deleting large data sets.

use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{CsvFormat, Error, IngestJobReference, JobState, JobStateUpdate};
use crate::datatable::{DataTable, DEFAULT_BYTE_BUDGET};
use crate::http::{self, Connection};

pub(crate) fn job_path(reference: &IngestJobReference) -> String {
    format!("/jobs/ingest/{}", reference.id())
}

/// Operation an ingest job applies to each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IngestOperation {
    /// Create new records.
    Insert,
    /// Update existing records by `Id`.
    Update,
    /// Insert or update by external id.
    Upsert,
    /// Move records to the recycle bin.
    Delete,
    /// Delete records permanently.
    HardDelete,
}

/// What to ingest and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    /// sObject type (e.g. `Account`).
    pub object: String,
    /// Operation to apply.
    pub operation: IngestOperation,
    /// External id field, required for [`IngestOperation::Upsert`].
    pub external_id_field_name: Option<String>,
    /// Assignment rule to apply to Case or Lead records.
    pub assignment_rule_id: Option<String>,
}

impl IngestRequest {
    /// Creates a request for `operation` on `object`.
    pub fn new(object: impl Into<String>, operation: IngestOperation) -> Self {
        Self {
            object: object.into(),
            operation,
            external_id_field_name: None,
            assignment_rule_id: None,
        }
    }

    /// Sets the external id field used to match records on upsert.
    #[must_use]
    pub fn external_id_field_name(mut self, field: impl Into<String>) -> Self {
        self.external_id_field_name = Some(field.into());
        self
    }

    /// Sets the assignment rule id.
    #[must_use]
    pub fn assignment_rule_id(mut self, id: impl Into<String>) -> Self {
        self.assignment_rule_id = Some(id.into());
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateIngestJobBody<'a> {
    object: &'a str,
    operation: IngestOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id_field_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignment_rule_id: Option<&'a str>,
    #[serde(flatten)]
    format: CsvFormat,
}

/// Ingest job information returned by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJobInfo {
    /// Job id.
    pub id: String,
    /// Operation applied by the job.
    pub operation: IngestOperation,
    /// sObject type.
    pub object: String,
    /// Current state.
    pub state: JobState,
    /// External id field for upserts.
    #[serde(default)]
    pub external_id_field_name: Option<String>,
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
    /// Records that failed so far.
    #[serde(default)]
    pub number_records_failed: Option<u64>,
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

/// Outcome of submitting one chunk of an ingest.
#[derive(Debug)]
pub enum IngestResult {
    /// The chunk was uploaded and its job closed for processing.
    Success {
        /// Job processing the chunk.
        job_reference: IngestJobReference,
    },
    /// A step failed for the chunk.
    Failure {
        /// Job created for the chunk, if creation got that far.
        job_reference: Option<IngestJobReference>,
        /// The failure.
        error: Error,
    },
}

impl IngestResult {
    /// Returns the job reference, if a job was created.
    pub fn job_reference(&self) -> Option<&IngestJobReference> {
        match self {
            IngestResult::Success { job_reference } => Some(job_reference),
            IngestResult::Failure { job_reference, .. } => job_reference.as_ref(),
        }
    }

    /// Returns true for [`IngestResult::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, IngestResult::Success { .. })
    }
}

/// Client for Bulk API v2.0 Ingest operations.
///
/// Use this client to create and manage ingest jobs for loading, updating,
/// upserting, or deleting large numbers of records in Salesforce.
#[derive(Clone, Debug)]
pub struct IngestClient {
    connection: Connection,
}

impl IngestClient {
    /// Creates a new ingest client.
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Submits `table` for ingestion, one job per chunk.
    ///
    /// The table is split so that each uploaded chunk stays under the Bulk
    /// API upload limit. Chunks are processed in order and each yields one
    /// [`IngestResult`]; a failed chunk does not stop the ones after it.
    ///
    /// # Errors
    ///
    /// Fails as a whole only on cancellation or when the table cannot be
    /// chunked.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use applink_core::bulkapi::{IngestOperation, IngestRequest};
    /// use applink_core::datatable::DataTable;
    /// # use applink_core::Org;
    ///
    /// # async fn run(org: Org) -> Result<(), Box<dyn std::error::Error>> {
    /// let mut builder = DataTable::builder(["Id", "Phone"])?;
    /// builder.add_row([Some("001xx000003DGb1AAG"), Some("555-0000")])?;
    ///
    /// let request = IngestRequest::new("Account", IngestOperation::Update);
    /// let results = org.bulk_api().ingest().ingest(&request, &builder.build()).await?;
    /// assert_eq!(results.len(), 1);
    /// # Ok(())
    /// # }
    /// ```
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn ingest(
        &self,
        request: &IngestRequest,
        table: &DataTable,
    ) -> Result<Vec<IngestResult>, Error> {
        self.ingest_with_budget(request, table, DEFAULT_BYTE_BUDGET)
            .await
    }

    /// Like [`ingest`](Self::ingest) with a custom per-chunk byte budget.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn ingest_with_budget(
        &self,
        request: &IngestRequest,
        table: &DataTable,
        byte_budget: usize,
    ) -> Result<Vec<IngestResult>, Error> {
        let mut results = Vec::new();

        for (index, chunk) in table.chunks(byte_budget)?.enumerate() {
            if self.connection.is_cancelled() {
                return Err(http::Error::Cancelled.into());
            }
            let chunk = chunk?;

            match self.ingest_chunk(request, &chunk).await {
                Ok(job_reference) => {
                    tracing::info!(
                        chunk = index,
                        rows = chunk.len(),
                        job_id = job_reference.id(),
                        "Submitted ingest chunk"
                    );
                    results.push(IngestResult::Success { job_reference });
                }
                Err((_, error)) if error.is_cancelled() => return Err(error),
                Err((job_reference, error)) => {
                    tracing::warn!(
                        chunk = index,
                        job_id = job_reference.as_ref().map(IngestJobReference::id),
                        error = %error,
                        "Ingest chunk failed"
                    );
                    results.push(IngestResult::Failure {
                        job_reference,
                        error,
                    });
                }
            }
        }

        Ok(results)
    }

    async fn ingest_chunk(
        &self,
        request: &IngestRequest,
        chunk: &DataTable,
    ) -> Result<IngestJobReference, (Option<IngestJobReference>, Error)> {
        let csv = match chunk.to_csv() {
            Ok(csv) => csv,
            Err(e) => return Err((None, Error::from(e))),
        };
        let job_reference = match self.create_job(request).await {
            Ok(job_reference) => job_reference,
            Err(e) => return Err((None, e)),
        };
        if let Err(e) = self.upload_data(&job_reference, csv).await {
            return Err((Some(job_reference), e));
        }
        if let Err(e) = self.close_job(&job_reference).await {
            return Err((Some(job_reference), e));
        }
        Ok(job_reference)
    }

    /// Creates a new bulk ingest job.
    ///
    /// After creating the job, upload data with [`upload_data`](Self::upload_data)
    /// and then close it with [`close_job`](Self::close_job) to begin processing.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn create_job(&self, request: &IngestRequest) -> Result<IngestJobReference, Error> {
        let body = CreateIngestJobBody {
            object: &request.object,
            operation: request.operation,
            external_id_field_name: request.external_id_field_name.as_deref(),
            assignment_rule_id: request.assignment_rule_id.as_deref(),
            format: CsvFormat::DEFAULT,
        };
        let info: IngestJobInfo = self
            .connection
            .send_json(
                self.connection
                    .data_request(Method::POST, "/jobs/ingest")
                    .json(&body),
            )
            .await?;
        Ok(IngestJobReference::new(info.id))
    }

    /// Uploads CSV data to an open ingest job.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn upload_data(
        &self,
        job_reference: &IngestJobReference,
        csv_data: Vec<u8>,
    ) -> Result<(), Error> {
        let path = format!("{}/batches", job_path(job_reference));
        self.connection
            .send(
                self.connection
                    .data_request(Method::PUT, &path)
                    .header(CONTENT_TYPE, "text/csv")
                    .body(csv_data),
            )
            .await?;
        Ok(())
    }

    /// Marks an ingest job as upload complete and ready for processing.
    ///
    /// After calling this, no more data can be added to the job.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn close_job(&self, job_reference: &IngestJobReference) -> Result<IngestJobInfo, Error> {
        Ok(self
            .connection
            .send_json(
                self.connection
                    .data_request(Method::PATCH, &job_path(job_reference))
                    .json(&JobStateUpdate {
                        state: JobState::UploadComplete,
                    }),
            )
            .await?)
    }

    /// Retrieves information about an ingest job.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_job(&self, job_reference: &IngestJobReference) -> Result<IngestJobInfo, Error> {
        Ok(self
            .connection
            .send_json(
                self.connection
                    .data_request(Method::GET, &job_path(job_reference)),
            )
            .await?)
    }

    /// Retrieves successfully processed records for a completed job.
    ///
    /// Rows carry `sf__Id` and `sf__Created` plus the original fields.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_successful_results(
        &self,
        job_reference: &IngestJobReference,
    ) -> Result<DataTable, Error> {
        self.get_result_table(job_reference, "successfulResults").await
    }

    /// Retrieves failed records for a completed job.
    ///
    /// Rows carry `sf__Id` and `sf__Error` plus the original fields.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_failed_results(
        &self,
        job_reference: &IngestJobReference,
    ) -> Result<DataTable, Error> {
        self.get_result_table(job_reference, "failedResults").await
    }

    /// Retrieves records that were not processed by a failed or aborted job.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_unprocessed_records(
        &self,
        job_reference: &IngestJobReference,
    ) -> Result<DataTable, Error> {
        self.get_result_table(job_reference, "unprocessedrecords").await
    }

    async fn get_result_table(
        &self,
        job_reference: &IngestJobReference,
        resource: &str,
    ) -> Result<DataTable, Error> {
        let path = format!("{}/{resource}", job_path(job_reference));
        let (_, body) = self
            .connection
            .send_bytes(self.connection.data_request(Method::GET, &path))
            .await?;
        Ok(DataTable::from_csv(&body)?)
    }
}
