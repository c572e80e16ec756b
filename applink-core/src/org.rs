//! Authorized org context and entry point to the typed API clients.

use std::fmt;

use serde::Deserialize;

use crate::bulkapi;
use crate::data_api::DataApi;
use crate::data_cloud::DataCloudApi;
use crate::http::{self, Connection};

/// Kind of org an authorization resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum OrgType {
    /// A Salesforce org (Data API and Bulk API).
    SalesforceOrg,
    /// A Data Cloud org (Data Cloud API).
    DataCloudOrg,
    /// Any org type this crate does not know about.
    #[serde(other)]
    Other,
}

/// The user an org authorization acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Salesforce user id (`005…`).
    pub id: String,
    /// Salesforce username.
    pub username: String,
}

/// A resolved org authorization.
///
/// Obtain one from [`authorization::Client::get_authorization`](crate::authorization::Client::get_authorization).
#[derive(Clone)]
pub struct Org {
    /// Org id (`00D…`).
    pub id: String,
    /// Developer name of the AppLink authorization.
    pub developer_name: Option<String>,
    /// Kind of org.
    pub org_type: OrgType,
    /// Instance URL (e.g. `https://mydomain.my.salesforce.com`).
    pub instance_url: String,
    /// API version without the `v` prefix (e.g. `65.0`).
    pub api_version: String,
    /// Authorized user.
    pub user: User,
    access_token: String,
    connection: Connection,
}

impl fmt::Debug for Org {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Org")
            .field("id", &self.id)
            .field("developer_name", &self.developer_name)
            .field("org_type", &self.org_type)
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .field("user", &self.user)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl Org {
    /// Builds an org context from an access token obtained elsewhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value or the HTTP
    /// client cannot be built.
    pub fn new(
        id: impl Into<String>,
        org_type: OrgType,
        instance_url: impl Into<String>,
        api_version: impl Into<String>,
        user: User,
        access_token: impl Into<String>,
    ) -> Result<Self, http::Error> {
        let instance_url = instance_url.into();
        let api_version = api_version.into();
        let access_token = access_token.into();
        let connection = Connection::new(&instance_url, &api_version, &access_token)?;

        Ok(Self {
            id: id.into(),
            developer_name: None,
            org_type,
            instance_url: connection.instance_url().to_string(),
            api_version: connection.api_version().to_string(),
            user,
            access_token,
            connection,
        })
    }

    /// Returns the org access token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns a client for the REST Data API.
    pub fn data_api(&self) -> DataApi {
        DataApi::new(self.connection.clone())
    }

    /// Returns a client for the Bulk API v2.0.
    pub fn bulk_api(&self) -> bulkapi::Client {
        bulkapi::Client::new(self.connection.clone())
    }

    /// Returns a client for the Data Cloud API.
    pub fn data_cloud_api(&self) -> DataCloudApi {
        DataCloudApi::new(self.connection.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_org() -> Org {
        Org::new(
            "00Dxx0000000001",
            OrgType::SalesforceOrg,
            "https://test.my.salesforce.com/",
            "v65.0",
            User {
                id: "005xx0000000001".to_string(),
                username: "admin@example.com".to_string(),
            },
            "secret_token",
        )
        .unwrap()
    }

    #[test]
    fn test_org_normalizes_instance_and_version() {
        let org = test_org();
        assert_eq!(org.instance_url, "https://test.my.salesforce.com");
        assert_eq!(org.api_version, "65.0");
        assert_eq!(org.access_token(), "secret_token");
    }

    #[test]
    fn test_org_debug_redacts_token() {
        let debug = format!("{:?}", test_org());
        assert!(!debug.contains("secret_token"));
        assert!(debug.contains("00Dxx0000000001"));
    }

    #[test]
    fn test_org_type_deserialization() {
        let org_type: OrgType = serde_json::from_str(r#""DataCloudOrg""#).unwrap();
        assert_eq!(org_type, OrgType::DataCloudOrg);
        let org_type: OrgType = serde_json::from_str(r#""SomethingNew""#).unwrap();
        assert_eq!(org_type, OrgType::Other);
    }

    #[test]
    fn test_api_clients_share_api_version() {
        let org = test_org();
        assert_eq!(org.bulk_api().api_version(), "65.0");
        assert_eq!(org.data_api().api_version(), "65.0");
    }
}
