//! Connection and credential models

use crate::api::constants::{DEFAULT_MAX_RECORDS, DEFAULT_WEB_API_VERSION};
use crate::api::error::{Result, WebApiError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything needed to reach one organisation's Web API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub name: String,
    /// Organisation URL, e.g. `https://contoso.crm.dynamics.com`
    pub server_url: String,
    #[serde(default = "default_web_api_version")]
    pub web_api_version: String,
    pub credential: Credential,
    /// Row cap for `fetch` when the caller gives none
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "BypassOptions::is_default")]
    pub bypass: BypassOptions,
}

fn default_web_api_version() -> String {
    DEFAULT_WEB_API_VERSION.to_string()
}

fn default_max_records() -> usize {
    DEFAULT_MAX_RECORDS
}

impl ConnectionOptions {
    pub fn new(name: impl Into<String>, server_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            name: name.into(),
            server_url: server_url.into(),
            web_api_version: default_web_api_version(),
            credential,
            max_records: DEFAULT_MAX_RECORDS,
            timeout_secs: None,
            bypass: BypassOptions::default(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.web_api_version = version.into();
        self
    }

    /// Version with a leading `v`: `9.1` and `v9.1` both give `v9.1`
    pub fn version_segment(&self) -> String {
        let version = self.web_api_version.trim();
        let version = version.strip_prefix('v').or_else(|| version.strip_prefix('V')).unwrap_or(version);
        format!("v{}", version)
    }

    /// `{server_url}/api/data/v{version}/`
    pub fn service_root(&self) -> Result<String> {
        let base = self.server_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(WebApiError::configuration(format!(
                "connection '{}' has no server URL",
                self.name
            )));
        }
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(WebApiError::configuration(format!(
                "server URL '{}' must start with http:// or https://",
                base
            )));
        }
        if self.version_segment() == "v" {
            return Err(WebApiError::configuration("web API version must not be empty"));
        }
        Ok(format!("{}/api/data/{}/", base, self.version_segment()))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// How to authenticate against an organisation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    /// On-premises integrated authentication
    Windows {
        domain: String,
        username: String,
        password: String,
    },
    #[serde(rename = "oauth")]
    OAuth {
        username: String,
        password: String,
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
    },
    AzureAdClient {
        client_id: String,
        client_secret: String,
        tenant_id: String,
    },
    AzureAdUser {
        username: String,
        password: String,
        client_id: String,
        tenant_id: String,
    },
    CdsOnline {
        username: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
    },
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Windows { .. } => "windows",
            Self::OAuth { .. } => "oauth",
            Self::AzureAdClient { .. } => "azure_ad_client",
            Self::AzureAdUser { .. } => "azure_ad_user",
            Self::CdsOnline { .. } => "cds_online",
        }
    }

    /// Who this credential signs in as
    pub fn display_name(&self) -> String {
        match self {
            Self::Windows { domain, username, .. } if !domain.is_empty() => {
                format!("{}\\{}", domain, username)
            }
            Self::Windows { username, .. }
            | Self::OAuth { username, .. }
            | Self::AzureAdUser { username, .. }
            | Self::CdsOnline { username, .. } => username.clone(),
            Self::AzureAdClient { client_id, .. } => client_id.clone(),
        }
    }

    /// A bearer token already acquired for this credential, if any
    pub fn access_token(&self) -> Option<&str> {
        match self {
            Self::OAuth { access_token, .. } | Self::CdsOnline { access_token, .. } => {
                access_token.as_deref().filter(|t| !t.is_empty())
            }
            _ => None,
        }
    }
}

/// Opt-outs from server-side custom business logic, sent as `MSCRM.*` headers.
///
/// Most options need the `prvBypassCustomBusinessLogic` privilege; skipping
/// Power Automate flows needs none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BypassOptions {
    /// Synchronous plugins and real-time workflows
    pub custom_sync: bool,
    /// Asynchronous plugins and workflows
    pub custom_async: bool,
    /// Specific plugin step ids
    pub step_ids: Vec<String>,
    pub power_automate_flows: bool,
}

impl BypassOptions {
    pub fn all() -> Self {
        Self {
            custom_sync: true,
            custom_async: true,
            step_ids: Vec::new(),
            power_automate_flows: true,
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Request headers for the enabled options
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        let logic: Vec<&str> = [("CustomSync", self.custom_sync), ("CustomAsync", self.custom_async)]
            .iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| *name)
            .collect();
        if !logic.is_empty() {
            headers.push(("MSCRM.BypassBusinessLogicExecution", logic.join(",")));
        }
        if !self.step_ids.is_empty() {
            headers.push(("MSCRM.BypassBusinessLogicExecutionStepIds", self.step_ids.join(",")));
        }
        if self.power_automate_flows {
            headers.push(("MSCRM.SuppressCallbackRegistrationExpanderJob", "true".to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_credential() -> Credential {
        Credential::CdsOnline {
            username: "admin@contoso.onmicrosoft.com".into(),
            password: "secret".into(),
            access_token: Some("abc".into()),
        }
    }

    #[test]
    fn test_service_root_normalises_version_and_slash() {
        let options = ConnectionOptions::new("dev", "https://contoso.crm.dynamics.com/", token_credential());
        assert_eq!(
            options.service_root().unwrap(),
            "https://contoso.crm.dynamics.com/api/data/v9.1/"
        );
        let options = options.with_version("9.2");
        assert_eq!(
            options.service_root().unwrap(),
            "https://contoso.crm.dynamics.com/api/data/v9.2/"
        );
    }

    #[test]
    fn test_service_root_rejects_bad_urls() {
        let options = ConnectionOptions::new("dev", "contoso", token_credential());
        assert!(matches!(options.service_root(), Err(WebApiError::Configuration(_))));
        let options = ConnectionOptions::new("dev", "", token_credential());
        assert!(options.service_root().is_err());
    }

    #[test]
    fn test_defaults_from_toml() {
        let options: ConnectionOptions = toml::from_str(
            r#"
            name = "dev"
            server_url = "https://contoso.crm.dynamics.com"
            [credential]
            kind = "azure_ad_client"
            client_id = "app"
            client_secret = "s"
            tenant_id = "t"
            "#,
        )
        .unwrap();
        assert_eq!(options.web_api_version, "v9.1");
        assert_eq!(options.max_records, 100);
        assert_eq!(options.credential.kind(), "azure_ad_client");
        assert_eq!(options.credential.display_name(), "app");
        assert_eq!(options.credential.access_token(), None);
        assert!(options.bypass.is_default());
    }

    #[test]
    fn test_credential_tagged_by_kind() {
        let json = serde_json::to_value(token_credential()).unwrap();
        assert_eq!(json["kind"], "cds_online");
        assert_eq!(token_credential().access_token(), Some("abc"));

        let windows: Credential = serde_json::from_value(serde_json::json!({
            "kind": "windows", "domain": "CORP", "username": "jdoe", "password": "p"
        }))
        .unwrap();
        assert_eq!(windows.display_name(), "CORP\\jdoe");

        let unknown = serde_json::from_value::<Credential>(serde_json::json!({"kind": "kerberos"}));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_bypass_headers() {
        assert!(BypassOptions::default().headers().is_empty());
        let headers = BypassOptions {
            custom_sync: true,
            custom_async: false,
            step_ids: vec!["a".into(), "b".into()],
            power_automate_flows: true,
        }
        .headers();
        assert_eq!(
            headers,
            vec![
                ("MSCRM.BypassBusinessLogicExecution", "CustomSync".to_string()),
                ("MSCRM.BypassBusinessLogicExecutionStepIds", "a,b".to_string()),
                ("MSCRM.SuppressCallbackRegistrationExpanderJob", "true".to_string()),
            ]
        );
        assert_eq!(
            BypassOptions::all().headers()[0].1,
            "CustomSync,CustomAsync"
        );
    }
}
