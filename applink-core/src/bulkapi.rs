//! Salesforce Bulk API v2.0 for querying and ingesting large data sets.
//!
//! This module provides access to the Salesforce Bulk API v2.0, which allows you to:
//! - **Query**: Asynchronously query large data sets using SOQL, page by page
//! - **Ingest**: Load, update, upsert, or delete large numbers of records from a
//!   [`DataTable`](crate::datatable::DataTable), split into as many jobs as the
//!   upload size limit requires
//!
//! # Example
//!
//! ```no_run
//! use applink_core::bulkapi::{IngestOperation, IngestRequest, IngestResult};
//! use applink_core::datatable::DataTable;
//! # use applink_core::Org;
//!
//! # async fn run(org: Org) -> Result<(), Box<dyn std::error::Error>> {
//! let bulk_client = org.bulk_api();
//!
//! let mut builder = DataTable::builder(["Name", "Phone"])?;
//! builder.add_row([Some("Acme Inc"), Some("555-1234")])?;
//! builder.add_row([Some("Global Corp"), None])?;
//!
//! let results = bulk_client
//!     .ingest()
//!     .ingest(&IngestRequest::new("Account", IngestOperation::Insert), &builder.build())
//!     .await?;
//! for result in results {
//!     match result {
//!         IngestResult::Success { job_reference } => println!("Submitted {job_reference}"),
//!         IngestResult::Failure { error, .. } => eprintln!("Chunk failed: {error}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::datatable;
use crate::http;

mod client;
pub mod ingest;
pub mod query;

pub use client::{Client, JobInfo};
pub use ingest::{IngestClient, IngestJobInfo, IngestOperation, IngestRequest, IngestResult};
pub use query::{QueryClient, QueryJobInfo, QueryJobResults, QueryOperation, QueryRequest};

/// Value that explicitly clears a field in ingest CSV data.
pub const NULL_VALUE: &str = "#N/A";

/// Formats a date the way Bulk API CSV expects it (`YYYY-MM-DD`).
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Formats a timestamp the way Bulk API CSV expects it
/// (`YYYY-MM-DDTHH:MM:SS.sssZ`, in UTC).
pub fn format_date_time<Tz: TimeZone>(date_time: &DateTime<Tz>) -> String {
    date_time
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Error type for Bulk API operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Transport or status error.
    #[error("Bulk API request failed: {source}")]
    Http {
        #[source]
        source: http::Error,
    },
    /// Table serialization, chunking or result parsing failed.
    #[error("Bulk API data error: {source}")]
    DataTable {
        #[source]
        source: datatable::Error,
    },
    /// A further result page was requested after the last one.
    #[error("Query job {job_id} has no more results")]
    NoMoreResults {
        /// Id of the query job.
        job_id: String,
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

impl From<datatable::Error> for Error {
    fn from(source: datatable::Error) -> Self {
        Error::DataTable { source }
    }
}

/// Processing state of a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Accepting data uploads (ingest only).
    Open,
    /// Upload finished; waiting to be processed.
    UploadComplete,
    /// Being processed.
    InProgress,
    /// Processing finished.
    JobComplete,
    /// Aborted by a client.
    Aborted,
    /// Processing failed.
    Failed,
}

/// Handle on a server-side ingest job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IngestJobReference(String);

/// Handle on a server-side query job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryJobReference(String);

impl IngestJobReference {
    /// Wraps a known ingest job id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The job id.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl QueryJobReference {
    /// Wraps a known query job id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The job id.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IngestJobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for QueryJobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a job of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobReference {
    /// An ingest job.
    Ingest(IngestJobReference),
    /// A query job.
    Query(QueryJobReference),
}

impl JobReference {
    /// The job id.
    pub fn id(&self) -> &str {
        match self {
            JobReference::Ingest(reference) => reference.id(),
            JobReference::Query(reference) => reference.id(),
        }
    }

    /// Resource path below the versioned Data API root.
    pub(crate) fn path(&self) -> String {
        match self {
            JobReference::Ingest(reference) => ingest::job_path(reference),
            JobReference::Query(reference) => query::job_path(reference),
        }
    }
}

impl From<IngestJobReference> for JobReference {
    fn from(reference: IngestJobReference) -> Self {
        JobReference::Ingest(reference)
    }
}

impl From<QueryJobReference> for JobReference {
    fn from(reference: QueryJobReference) -> Self {
        JobReference::Query(reference)
    }
}

/// Body of a job state change request.
#[derive(Debug, Serialize)]
pub(crate) struct JobStateUpdate {
    pub(crate) state: JobState,
}

/// CSV format settings sent with every job creation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CsvFormat {
    content_type: &'static str,
    line_ending: &'static str,
    column_delimiter: &'static str,
}

impl CsvFormat {
    pub(crate) const DEFAULT: CsvFormat = CsvFormat {
        content_type: "CSV",
        line_ending: "LF",
        column_delimiter: "COMMA",
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_format_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_date(date), "2024-03-07");
    }

    #[test]
    fn test_format_date_time_converts_to_utc() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let date_time = offset.with_ymd_and_hms(2024, 3, 7, 14, 30, 5).unwrap();
        assert_eq!(format_date_time(&date_time), "2024-03-07T12:30:05.000Z");
    }

    #[test]
    fn test_job_reference_paths() {
        let ingest: JobReference = IngestJobReference::new("750xx").into();
        let query: JobReference = QueryJobReference::new("750yy").into();
        assert_eq!(ingest.path(), "/jobs/ingest/750xx");
        assert_eq!(query.path(), "/jobs/query/750yy");
        assert_eq!(query.id(), "750yy");
    }

    #[test]
    fn test_job_state_wire_names() {
        assert_eq!(
            serde_json::to_value(JobStateUpdate {
                state: JobState::UploadComplete
            })
            .unwrap(),
            serde_json::json!({"state": "UploadComplete"})
        );
        let state: JobState = serde_json::from_str(r#""JobComplete""#).unwrap();
        assert_eq!(state, JobState::JobComplete);
    }

    #[test]
    fn test_cancelled_error() {
        let error = Error::from(http::Error::Cancelled);
        assert!(error.is_cancelled());
        assert!(!Error::NoMoreResults {
            job_id: "750xx".to_string()
        }
        .is_cancelled());
    }
}
