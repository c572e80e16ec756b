//! Heroku AppLink add-on configuration resolution.
//!
//! AppLink exposes its API endpoint and token through config vars named after
//! the add-on attachment (`MY_ATTACHMENT_API_URL`) or after the add-on name and
//! a color suffix (`HEROKU_APPLINK_PURPLE_API_URL`). Lookups go through a
//! [`ConfigProvider`] so that tests and embedders can supply fixed values
//! instead of mutating the process environment.

use std::collections::BTreeMap;
use std::fmt;

/// Config var holding the Heroku app UUID.
pub const APP_ID_VAR: &str = "HEROKU_APP_ID";

/// Config var overriding the add-on name used as a prefix for color lookups.
pub const ADDON_NAME_VAR: &str = "HEROKU_APPLINK_ADDON_NAME";

/// Add-on name used when [`ADDON_NAME_VAR`] is not set.
pub const DEFAULT_ADDON_NAME: &str = "HEROKU_APPLINK";

const API_URL_SUFFIX: &str = "_API_URL";
const TOKEN_SUFFIX: &str = "_TOKEN";

/// Errors raised while resolving add-on configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// `HEROKU_APP_ID` is not set.
    #[error("Heroku AppLink app UUID not found: {APP_ID_VAR} is not set")]
    MissingAppId,
    /// No API URL/token pair exists for the attachment or color.
    #[error("Heroku AppLink config not found under attachment or color {attachment}")]
    AttachmentNotFound {
        /// The attachment name or color that was looked up.
        attachment: String,
    },
    /// No `*_API_URL` config var holds the given URL.
    #[error("Heroku AppLink config not found for API URL {url}")]
    UrlNotFound {
        /// The URL that was looked up.
        url: String,
    },
    /// The API URL was found but its sibling token var is not set.
    #[error("Heroku AppLink token not found: {var} is not set")]
    MissingToken {
        /// Name of the token config var that was expected.
        var: String,
    },
}

/// Source of configuration values.
pub trait ConfigProvider: fmt::Debug + Send + Sync {
    /// Returns the value of `key`, if set.
    fn var(&self, key: &str) -> Option<String>;

    /// Returns every `(key, value)` pair known to the provider.
    fn vars(&self) -> Vec<(String, String)>;
}

/// Reads configuration from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvProvider;

impl ConfigProvider for EnvProvider {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// Fixed set of configuration values.
///
/// ```
/// use applink_core::config::{ConfigProvider, StaticProvider};
///
/// let provider = StaticProvider::new()
///     .with("HEROKU_APP_ID", "2a1b0f4e-0000-0000-0000-000000000000")
///     .with("HEROKU_APPLINK_API_URL", "https://applink.example.com")
///     .with("HEROKU_APPLINK_TOKEN", "token");
/// assert_eq!(
///     provider.var("HEROKU_APPLINK_TOKEN").as_deref(),
///     Some("token")
/// );
/// ```
#[derive(Debug, Default, Clone)]
pub struct StaticProvider {
    vars: BTreeMap<String, String>,
}

impl StaticProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticProvider {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl ConfigProvider for StaticProvider {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Resolved AppLink endpoint, token and app identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct AddonConfig {
    /// Base URL of the AppLink API.
    pub api_url: String,
    /// Bearer token for the AppLink API.
    pub token: String,
    /// UUID of the Heroku app, sent as `X-App-UUID`.
    pub app_uuid: String,
}

impl fmt::Debug for AddonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonConfig")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("app_uuid", &self.app_uuid)
            .finish()
    }
}

/// Resolves add-on configuration.
///
/// `attachment_or_url` may be an attachment name, a color suffix, or the
/// AppLink API URL itself. When `None`, the add-on name is used as the
/// attachment.
pub fn resolve(
    provider: &dyn ConfigProvider,
    attachment_or_url: Option<&str>,
) -> Result<AddonConfig, Error> {
    let addon_name = addon_name(provider);
    let (api_url, token) = match attachment_or_url {
        Some(url) if is_url(url) => resolve_by_url(provider, url)?,
        Some(attachment) => resolve_by_attachment_or_color(provider, &addon_name, attachment)?,
        None => resolve_by_attachment_or_color(provider, &addon_name, &addon_name)?,
    };

    let app_uuid = non_empty(provider.var(APP_ID_VAR)).ok_or(Error::MissingAppId)?;

    Ok(AddonConfig {
        api_url,
        token,
        app_uuid,
    })
}

fn addon_name(provider: &dyn ConfigProvider) -> String {
    non_empty(provider.var(ADDON_NAME_VAR))
        .unwrap_or_else(|| DEFAULT_ADDON_NAME.to_string())
        .to_uppercase()
}

fn is_url(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn resolve_by_attachment_or_color(
    provider: &dyn ConfigProvider,
    addon_name: &str,
    attachment_or_color: &str,
) -> Result<(String, String), Error> {
    let name = attachment_or_color.to_uppercase();

    let candidates = [name.clone(), format!("{addon_name}_{name}")];
    for prefix in candidates {
        let api_url = non_empty(provider.var(&format!("{prefix}{API_URL_SUFFIX}")));
        let token = non_empty(provider.var(&format!("{prefix}{TOKEN_SUFFIX}")));
        if let (Some(api_url), Some(token)) = (api_url, token) {
            return Ok((api_url, token));
        }
    }

    Err(Error::AttachmentNotFound {
        attachment: attachment_or_color.to_string(),
    })
}

fn resolve_by_url(provider: &dyn ConfigProvider, url: &str) -> Result<(String, String), Error> {
    let wanted = normalize_url(url);
    let mut vars = provider.vars();
    vars.sort();

    let prefix = vars
        .into_iter()
        .find_map(|(key, value)| {
            let prefix = key.strip_suffix(API_URL_SUFFIX)?;
            (normalize_url(&value) == wanted).then(|| prefix.to_string())
        })
        .ok_or_else(|| Error::UrlNotFound {
            url: url.to_string(),
        })?;

    let token_var = format!("{prefix}{TOKEN_SUFFIX}");
    let token = non_empty(provider.var(&token_var)).ok_or(Error::MissingToken { var: token_var })?;

    Ok((url.to_string(), token))
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}
