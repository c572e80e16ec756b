//! Example of using Bulk API 2.0 Query and Ingest operations through AppLink.
//!
//! This example demonstrates:
//!
//! - Resolving an org authorization from the AppLink add-on configuration
//! - Ingesting a `DataTable`, split into as many jobs as needed
//! - Retrieving successful and failed ingest results
//! - Running a query job and paging through its results
//! - Aborting and deleting jobs
//!
//! Requires `HEROKU_APP_ID`, `HEROKU_APPLINK_API_URL` and `HEROKU_APPLINK_TOKEN`
//! in the environment, and the authorization developer name as the first argument.

use applink_core::authorization;
use applink_core::bulkapi::{
    self, IngestOperation, IngestRequest, IngestResult, JobReference, JobState, QueryRequest,
};
use applink_core::datatable::DataTable;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,applink_core=debug".into()),
        )
        .init();

    let developer_name = std::env::args().nth(1).ok_or("usage: bulkapi <developer-name>")?;

    let org = authorization::Builder::new()
        .build()?
        .get_authorization(&developer_name, None)
        .await?;
    info!("Authorized as {} on {}", org.user.username, org.instance_url);

    let bulk_client = org.bulk_api();
    let ingest_client = bulk_client.ingest();

    let mut builder = DataTable::builder(["Name", "Industry", "Website", "Description"])?;
    builder.add_row([
        Some("Acme Corp"),
        Some("Technology"),
        Some("https://acme.example.com"),
        Some("Created on 2024-01-15"),
    ])?;
    builder.add_row([
        Some("Globus Inc"),
        Some("Manufacturing"),
        None,
        Some(bulkapi::NULL_VALUE),
    ])?;
    let table = builder.build();

    info!("Ingesting {} rows", table.len());
    let results = ingest_client
        .ingest(&IngestRequest::new("Account", IngestOperation::Insert), &table)
        .await?;

    for result in results {
        let job = match result {
            IngestResult::Success { job_reference } => job_reference,
            IngestResult::Failure { error, .. } => {
                error!("Chunk failed: {error}");
                continue;
            }
        };

        info!("Monitoring job {job}");
        loop {
            let status = ingest_client.get_job(&job).await?;
            match status.state {
                JobState::JobComplete => break,
                JobState::Failed | JobState::Aborted => {
                    error!("Job ended in {:?}: {:?}", status.state, status.error_message);
                    break;
                }
                _ => tokio::time::sleep(tokio::time::Duration::from_secs(2)).await,
            }
        }

        let successful = ingest_client.get_successful_results(&job).await?;
        for row in successful.rows() {
            info!("Created {:?}", row.get("sf__Id"));
        }
        let failed = ingest_client.get_failed_results(&job).await?;
        for row in failed.rows() {
            error!("Failed: {:?}", row.get("sf__Error"));
        }
    }

    let query_client = bulk_client.query();

    info!("Creating a query job");
    let job = query_client
        .create_job(&QueryRequest::new(
            "SELECT Id, Name, Industry FROM Account LIMIT 100",
        ))
        .await?;

    loop {
        let status = query_client.get_job(&job).await?;
        info!("Current state: {:?}", status.state);
        match status.state {
            JobState::JobComplete => break,
            JobState::Failed | JobState::Aborted => {
                error!("Query job did not complete");
                return Ok(());
            }
            _ => tokio::time::sleep(tokio::time::Duration::from_secs(2)).await,
        }
    }

    let mut page = query_client.get_results(&job, Some(50)).await?;
    loop {
        for row in page.data_table.rows() {
            info!("{:?} {:?}", row.get("Name"), row.get("Industry"));
        }
        if page.done() {
            break;
        }
        page = query_client.get_more_results(&page, Some(50)).await?;
    }

    info!("Creating a job to abort");
    let abort_job = JobReference::from(
        query_client
            .create_job(&QueryRequest::new("SELECT Id FROM Contact LIMIT 10"))
            .await?,
    );
    let aborted = bulk_client.abort(&abort_job).await?;
    info!("Job state: {:?}", aborted.state());
    bulk_client.delete(&abort_job).await?;
    info!("Job deleted");

    Ok(())
}
