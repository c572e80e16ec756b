//! AppLink org authorization.
//!
//! Exchanges an authorization developer name for an [`Org`] by calling the
//! AppLink API with the add-on credentials resolved from configuration.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{self, AddonConfig, ConfigProvider, EnvProvider};
use crate::http;
use crate::org::{Org, OrgType, User};

/// Header carrying the Heroku app UUID.
const APP_UUID_HEADER: &str = "X-App-UUID";

/// Retries issued after the first failed authorization request.
const AUTHORIZATION_RETRIES: usize = 1;

/// Errors that can occur while resolving an org authorization.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Add-on configuration could not be resolved.
    #[error("Configuration error: {source}")]
    Config {
        #[source]
        source: config::Error,
    },
    /// The AppLink API URL is malformed.
    #[error("Invalid URL format: {source}")]
    ParseUrl {
        #[source]
        source: url::ParseError,
    },
    /// The AppLink API URL cannot carry path segments.
    #[error("AppLink API URL cannot be a base: {url}")]
    InvalidApiUrl {
        /// The offending URL.
        url: String,
    },
    /// The AppLink API returned a structured error.
    #[error("Authorization failed: {title}: {detail}")]
    Api {
        /// Error title.
        title: String,
        /// Error detail.
        detail: String,
    },
    /// Transport failure or unstructured error response.
    #[error("Authorization request failed: {source}")]
    Http {
        #[source]
        source: http::Error,
    },
    /// The authorization response was decoded but the org client could not be built.
    #[error("Failed to build org client: {source}")]
    OrgClient {
        #[source]
        source: http::Error,
    },
}

impl From<config::Error> for Error {
    fn from(source: config::Error) -> Self {
        Error::Config { source }
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizationResponse {
    org: OrgPayload,
}

#[derive(Debug, Deserialize)]
struct OrgPayload {
    id: String,
    #[serde(default)]
    developer_name: Option<String>,
    instance_url: String,
    #[serde(rename = "type")]
    org_type: OrgType,
    api_version: String,
    user_auth: UserAuthPayload,
}

#[derive(Debug, Deserialize)]
struct UserAuthPayload {
    username: String,
    user_id: String,
    access_token: String,
}

impl OrgPayload {
    fn into_org(self) -> Result<Org, Error> {
        let mut org = Org::new(
            self.id,
            self.org_type,
            self.instance_url,
            self.api_version,
            User {
                id: self.user_auth.user_id,
                username: self.user_auth.username,
            },
            self.user_auth.access_token,
        )
        .map_err(|source| Error::OrgClient { source })?;
        org.developer_name = self.developer_name;
        Ok(org)
    }
}

/// Client for the AppLink authorization endpoint.
///
/// Use [`Builder`] to construct a client instance.
///
/// # Example
///
/// ```no_run
/// use applink_core::authorization;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = authorization::Builder::new().build()?;
/// let org = client.get_authorization("MyAuthorization", None).await?;
/// println!("Authorized as {} in {}", org.user.username, org.instance_url);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    provider: Arc<dyn ConfigProvider>,
    http: reqwest::Client,
    cancel: CancellationToken,
}

impl Client {
    /// Resolves the org authorization registered under `developer_name`.
    ///
    /// `attachment_or_url` selects the AppLink add-on by attachment name,
    /// color, or API URL; `None` uses the default add-on attachment.
    ///
    /// Configuration is resolved before any request is sent. A failed request
    /// is retried once.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration cannot be resolved ([`Error::Config`])
    /// - The API URL is malformed ([`Error::ParseUrl`])
    /// - The API answers with a title/detail error body ([`Error::Api`])
    /// - The request fails for any other reason ([`Error::Http`])
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn get_authorization(
        &self,
        developer_name: &str,
        attachment_or_url: Option<&str>,
    ) -> Result<Org, Error> {
        let config = config::resolve(self.provider.as_ref(), attachment_or_url)?;
        let url = authorization_url(&config.api_url, developer_name)?;

        let mut attempt = 0;
        loop {
            match self.fetch(&url, &config).await {
                Ok(payload) => return payload.into_org(),
                Err(source) if source.is_cancelled() => return Err(Error::Http { source }),
                Err(source) if attempt < AUTHORIZATION_RETRIES => {
                    tracing::warn!(error = %source, developer_name, "Authorization request failed, retrying");
                    attempt += 1;
                }
                Err(source) => return Err(into_authorization_error(source)),
            }
        }
    }

    async fn fetch(&self, url: &Url, config: &AddonConfig) -> Result<OrgPayload, http::Error> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| http::Error::InvalidHeader {
                name: "Authorization",
            })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            APP_UUID_HEADER,
            HeaderValue::from_str(&config.app_uuid).map_err(|_| http::Error::InvalidHeader {
                name: APP_UUID_HEADER,
            })?,
        );

        tracing::debug!(path = url.path(), "Requesting org authorization");
        http::cancellable(&self.cancel, async {
            let response = self
                .http
                .get(url.clone())
                .headers(headers)
                .send()
                .await
                .map_err(|source| http::Error::Request { source })?;
            let response = http::error_for_status(response).await?;
            let bytes = response
                .bytes()
                .await
                .map_err(|source| http::Error::Request { source })?;
            let body: AuthorizationResponse = serde_json::from_slice(&bytes)
                .map_err(|source| http::Error::Decode { source })?;
            Ok(body.org)
        })
        .await
    }
}

fn authorization_url(api_url: &str, developer_name: &str) -> Result<Url, Error> {
    let mut url = Url::parse(api_url).map_err(|source| Error::ParseUrl { source })?;
    url.path_segments_mut()
        .map_err(|()| Error::InvalidApiUrl {
            url: api_url.to_string(),
        })?
        .pop_if_empty()
        .push("authorizations")
        .push(developer_name);
    Ok(url)
}

fn into_authorization_error(source: http::Error) -> Error {
    match source {
        http::Error::Status {
            title: Some(title),
            detail: Some(detail),
            ..
        } => Error::Api { title, detail },
        source => Error::Http { source },
    }
}

/// Builder for constructing a [`Client`].
///
/// # Examples
///
/// ## Reading configuration from the environment
///
/// ```no_run
/// use applink_core::authorization;
///
/// let client = authorization::Builder::new().build()?;
/// # Ok::<(), applink_core::authorization::Error>(())
/// ```
///
/// ## Supplying fixed configuration
///
/// ```
/// use applink_core::authorization;
/// use applink_core::config::StaticProvider;
///
/// let provider = StaticProvider::new()
///     .with("HEROKU_APP_ID", "2a1b0f4e-0000-0000-0000-000000000000")
///     .with("HEROKU_APPLINK_API_URL", "https://applink.example.com")
///     .with("HEROKU_APPLINK_TOKEN", "token");
///
/// let client = authorization::Builder::new()
///     .config_provider(provider)
///     .build()?;
/// # Ok::<(), applink_core::authorization::Error>(())
/// ```
#[derive(Default)]
pub struct Builder {
    provider: Option<Arc<dyn ConfigProvider>>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration source. Defaults to [`EnvProvider`].
    pub fn config_provider(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Sets the connection timeout for authorization requests.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the overall timeout for authorization requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Cancels in-flight authorization requests when `cancel` fires.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<Client, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout.unwrap_or(Duration::from_secs(
                crate::DEFAULT_AUTH_CONNECT_TIMEOUT_SECS,
            )))
            .timeout(self.request_timeout.unwrap_or(Duration::from_secs(
                crate::DEFAULT_AUTH_REQUEST_TIMEOUT_SECS,
            )))
            .build()
            .map_err(|source| Error::Http {
                source: http::Error::ClientBuild { source },
            })?;

        Ok(Client {
            provider: self.provider.unwrap_or_else(|| Arc::new(EnvProvider)),
            http,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}
