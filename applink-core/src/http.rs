//! Authenticated HTTP connection shared by the Data, Bulk and Data Cloud APIs.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// User agent sent with every request.
const USER_AGENT: &str = concat!("applink-core/", env!("CARGO_PKG_VERSION"));

/// Errors raised while talking to a remote API.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The underlying HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {source}")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },
    /// A header value contained characters that are not valid in HTTP headers.
    #[error("Invalid value for header {name}")]
    InvalidHeader {
        /// Name of the offending header.
        name: &'static str,
    },
    /// The request could not be sent or the response body could not be read.
    #[error("HTTP request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("HTTP {status}{}", describe(.title, .detail))]
    Status {
        /// Response status code.
        status: StatusCode,
        /// Error title or Salesforce error code, when the body carried one.
        title: Option<String>,
        /// Error detail or message, when the body carried one.
        detail: Option<String>,
    },
    /// The response body did not match the expected schema.
    #[error("Failed to decode response body: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
    /// The operation was cancelled through its cancellation token.
    #[error("Request cancelled")]
    Cancelled,
}

impl Error {
    /// Returns true if this error is the result of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns the HTTP status for [`Error::Status`] errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[allow(clippy::ref_option)]
fn describe(title: &Option<String>, detail: &Option<String>) -> String {
    match (title, detail) {
        (Some(title), Some(detail)) => format!(": {title}: {detail}"),
        (Some(text), None) | (None, Some(text)) => format!(": {text}"),
        (None, None) => String::new(),
    }
}

/// Salesforce REST error entry; error responses are arrays of these.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SalesforceError {
    error_code: Option<String>,
    message: Option<String>,
}

/// Problem-style error body used by the AppLink and Data Cloud APIs.
#[derive(Debug, Deserialize)]
struct ProblemBody {
    title: Option<String>,
    detail: Option<String>,
    message: Option<String>,
}

/// Extracts a title/detail pair from an error response body.
pub(crate) fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    if let Ok(errors) = serde_json::from_str::<Vec<SalesforceError>>(body) {
        if let Some(first) = errors.into_iter().next() {
            return (first.error_code, first.message);
        }
    }

    if let Ok(problem) = serde_json::from_str::<ProblemBody>(body) {
        let detail = problem.detail.or(problem.message);
        if problem.title.is_some() || detail.is_some() {
            return (problem.title, detail);
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        (None, None)
    } else {
        (None, Some(trimmed.to_string()))
    }
}

/// Converts a non-success response into [`Error::Status`].
pub(crate) async fn error_for_status(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (title, detail) = parse_error_body(&body);
    Err(Error::Status {
        status,
        title,
        detail,
    })
}

/// Races `future` against `cancel`, failing with [`Error::Cancelled`] if the
/// token fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

/// Authenticated connection to a single org instance.
#[derive(Clone, Debug)]
pub(crate) struct Connection {
    http: reqwest::Client,
    instance_url: String,
    api_version: String,
    cancel: CancellationToken,
}

impl Connection {
    /// Builds a connection that sends `Authorization: Bearer {access_token}`
    /// on every request.
    pub(crate) fn new(
        instance_url: &str,
        api_version: &str,
        access_token: &str,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| Error::InvalidHeader {
                name: "Authorization",
            })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|source| Error::ClientBuild { source })?;

        Ok(Self {
            http,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            api_version: api_version.trim_start_matches('v').to_string(),
            cancel: CancellationToken::new(),
        })
    }

    /// Returns a copy of this connection bound to `cancel`.
    pub(crate) fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub(crate) fn api_version(&self) -> &str {
        &self.api_version
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Base URL of the versioned Data API: `{instance}/services/data/v{version}`.
    pub(crate) fn data_url(&self) -> String {
        format!(
            "{}/services/data/v{}",
            self.instance_url, self.api_version
        )
    }

    /// Starts a request against `{instance}{path}`.
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        tracing::debug!(%method, path, "Sending request");
        self.http
            .request(method, format!("{}{}", self.instance_url, path))
    }

    /// Starts a request against `{instance}/services/data/v{version}{path}`.
    pub(crate) fn data_request(&self, method: Method, path: &str) -> RequestBuilder {
        tracing::debug!(%method, path, "Sending data request");
        self.http
            .request(method, format!("{}{}", self.data_url(), path))
    }

    /// Sends the request and fails on a non-success status.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, Error> {
        cancellable(&self.cancel, async {
            let response = request
                .send()
                .await
                .map_err(|source| Error::Request { source })?;
            error_for_status(response).await
        })
        .await
    }

    /// Sends the request and decodes a JSON response body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, Error> {
        cancellable(&self.cancel, async {
            let response = request
                .send()
                .await
                .map_err(|source| Error::Request { source })?;
            let response = error_for_status(response).await?;
            let bytes = response
                .bytes()
                .await
                .map_err(|source| Error::Request { source })?;
            serde_json::from_slice(&bytes).map_err(|source| Error::Decode { source })
        })
        .await
    }

    /// Sends the request and returns the response headers and raw body.
    pub(crate) async fn send_bytes(
        &self,
        request: RequestBuilder,
    ) -> Result<(HeaderMap, Vec<u8>), Error> {
        cancellable(&self.cancel, async {
            let response = request
                .send()
                .await
                .map_err(|source| Error::Request { source })?;
            let response = error_for_status(response).await?;
            let headers = response.headers().clone();
            let bytes = response
                .bytes()
                .await
                .map_err(|source| Error::Request { source })?;
            Ok((headers, bytes.to_vec()))
        })
        .await
    }
}
