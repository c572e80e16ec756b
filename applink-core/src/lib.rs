//! Rust SDK for Heroku AppLink.
//!
//! This crate resolves Salesforce and Data Cloud org authorizations from the
//! Heroku AppLink add-on configuration and provides typed clients for the
//! Data API, the Bulk API v2.0 and the Data Cloud API.
//!
//! # Examples
//!
//! ```no_run
//! use applink_core::authorization;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = authorization::Builder::new().build()?;
//! let org = client.get_authorization("my-org", None).await?;
//!
//! let accounts = org.data_api().query("SELECT Id, Name FROM Account").await?;
//! println!("{} accounts", accounts.total_size);
//! # Ok(())
//! # }
//! ```

/// Default connection timeout for org API requests (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default request timeout for org API requests (120 seconds).
///
/// This longer timeout is appropriate for bulk operations which may take longer to process.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default connection timeout for AppLink authorization requests (15 seconds).
pub const DEFAULT_AUTH_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default request timeout for AppLink authorization requests (30 seconds).
pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 30;

/// AppLink add-on configuration lookup.
pub mod config;

/// Org authorization through the AppLink API.
pub mod authorization;

/// Authorized org context.
pub mod org;

/// Shared HTTP connection and transport errors.
pub mod http;

/// SOQL query records.
pub mod record;

/// In-memory CSV tables and upload chunking.
pub mod datatable;

/// Composite graph batching of record changes.
pub mod unit_of_work;

/// Salesforce REST Data API.
pub mod data_api;

/// Salesforce Bulk API v2.0 for querying and ingesting large data sets.
pub mod bulkapi;

/// Data Cloud query and ingestion API.
pub mod data_cloud;

pub use org::Org;
