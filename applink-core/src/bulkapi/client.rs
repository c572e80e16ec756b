//! Bulk API v2.0 client bound to an authorized org.

use reqwest::Method;
use tokio_util::sync::CancellationToken;

use super::ingest::{IngestClient, IngestJobInfo};
use super::query::{QueryClient, QueryJobInfo};
use super::{Error, JobReference, JobState, JobStateUpdate};
use crate::http::Connection;

/// Job information for a job of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum JobInfo {
    /// An ingest job.
    Ingest(IngestJobInfo),
    /// A query job.
    Query(QueryJobInfo),
}

impl JobInfo {
    /// Current state of the job.
    pub fn state(&self) -> JobState {
        match self {
            JobInfo::Ingest(info) => info.state,
            JobInfo::Query(info) => info.state,
        }
    }
}

/// Client for Salesforce Bulk API v2.0.
///
/// Provides access to bulk query and ingest operations, plus the job
/// management calls that apply to both kinds of job.
///
/// # Example
///
/// ```no_run
/// use applink_core::bulkapi::{JobReference, QueryRequest};
/// # use applink_core::Org;
///
/// # async fn run(org: Org) -> Result<(), Box<dyn std::error::Error>> {
/// let bulk_client = org.bulk_api();
///
/// let job = bulk_client
///     .query()
///     .create_job(&QueryRequest::new("SELECT Id FROM Contact"))
///     .await?;
///
/// // Job management works for either kind of job.
/// let job = JobReference::from(job);
/// println!("{:?}", bulk_client.get_info(&job).await?.state());
/// bulk_client.abort(&job).await?;
/// bulk_client.delete(&job).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    connection: Connection,
}

impl Client {
    /// Creates a new Bulk API client.
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

    /// Creates a query client for bulk query operations.
    pub fn query(&self) -> QueryClient {
        QueryClient::new(self.connection.clone())
    }

    /// Creates an ingest client for bulk ingest operations.
    pub fn ingest(&self) -> IngestClient {
        IngestClient::new(self.connection.clone())
    }

    /// Retrieves information about a job.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_info(&self, job: &JobReference) -> Result<JobInfo, Error> {
        let request = self.connection.data_request(Method::GET, &job.path());
        self.send_for_info(job, request).await
    }

    /// Aborts a job.
    ///
    /// This stops processing of the job but does not delete it.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn abort(&self, job: &JobReference) -> Result<JobInfo, Error> {
        let request = self
            .connection
            .data_request(Method::PATCH, &job.path())
            .json(&JobStateUpdate {
                state: JobState::Aborted,
            });
        self.send_for_info(job, request).await
    }

    /// Deletes a job.
    ///
    /// The job must be in UploadComplete, JobComplete, Aborted, or Failed state.
    /// Once deleted, the job and its data cannot be retrieved.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn delete(&self, job: &JobReference) -> Result<(), Error> {
        self.connection
            .send(self.connection.data_request(Method::DELETE, &job.path()))
            .await?;
        Ok(())
    }

    async fn send_for_info(
        &self,
        job: &JobReference,
        request: reqwest::RequestBuilder,
    ) -> Result<JobInfo, Error> {
        Ok(match job {
            JobReference::Ingest(_) => JobInfo::Ingest(self.connection.send_json(request).await?),
            JobReference::Query(_) => JobInfo::Query(self.connection.send_json(request).await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulkapi::{IngestJobReference, QueryJobReference};
    use crate::http::tests::test_connection;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_abort_dispatches_by_job_kind() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/services/data/v65.0/jobs/ingest/750I"))
            .and(body_json(json!({"state": "Aborted"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "750I", "operation": "delete", "object": "Lead", "state": "Aborted"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/services/data/v65.0/jobs/query/750Q"))
            .and(body_json(json!({"state": "Aborted"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "750Q", "operation": "query", "object": "Lead", "state": "Aborted"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = Client::new(test_connection(&mock_server.uri()));

        let ingest = client
            .abort(&IngestJobReference::new("750I").into())
            .await
            .unwrap();
        assert!(matches!(&ingest, JobInfo::Ingest(info) if info.id == "750I"));
        assert_eq!(ingest.state(), JobState::Aborted);

        let query = client
            .abort(&QueryJobReference::new("750Q").into())
            .await
            .unwrap();
        assert!(matches!(&query, JobInfo::Query(info) if info.id == "750Q"));
    }

    #[tokio::test]
    async fn test_get_info_and_delete() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v65.0/jobs/query/750Q"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "750Q", "operation": "query", "object": "Account",
                "state": "JobComplete", "numberRecordsProcessed": 10
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/services/data/v65.0/jobs/query/750Q"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = Client::new(test_connection(&mock_server.uri()));
        let job = JobReference::from(QueryJobReference::new("750Q"));

        match client.get_info(&job).await.unwrap() {
            JobInfo::Query(info) => assert_eq!(info.number_records_processed, Some(10)),
            other => panic!("unexpected job info: {other:?}"),
        }
        client.delete(&job).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_unknown_job() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!([
                {"errorCode": "NOT_FOUND", "message": "Job not found"}
            ])))
            .mount(&mock_server)
            .await;

        let client = Client::new(test_connection(&mock_server.uri()));
        let result = client
            .delete(&IngestJobReference::new("750missing").into())
            .await;
        assert!(matches!(result, Err(Error::Http { .. })));
    }
}
