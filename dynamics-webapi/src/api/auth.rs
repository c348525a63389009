//! Bearer token supply
//!
//! Token acquisition (OAuth flows, refresh) lives outside this crate. The client asks a
//! [`TokenProvider`] for a token before every request and sends it as `Authorization`.

use crate::api::error::{Result, WebApiError};
use crate::api::models::Credential;
use async_trait::async_trait;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A bearer token valid for the next request
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, e.g. from `DYNAMICS_ACCESS_TOKEN` or a stored credential
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    /// Use the token a credential already carries
    pub fn from_credential(credential: &Credential) -> Result<Self> {
        credential.access_token().map(Self::new).ok_or_else(|| {
            WebApiError::Authentication(format!(
                "{} credential for '{}' carries no access token",
                credential.kind(),
                credential.display_name()
            ))
        })
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(WebApiError::Authentication("access token is empty".to_string()));
        }
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_from_credential() {
        let credential = Credential::OAuth {
            username: "jdoe".into(),
            password: "p".into(),
            client_id: "app".into(),
            access_token: Some("eyJ0eXAi".into()),
        };
        let provider = StaticToken::from_credential(&credential).unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "eyJ0eXAi");
        assert!(!format!("{:?}", provider).contains("eyJ0eXAi"));
    }

    #[tokio::test]
    async fn test_missing_token_is_authentication_error() {
        let credential = Credential::AzureAdClient {
            client_id: "app".into(),
            client_secret: "s".into(),
            tenant_id: "t".into(),
        };
        assert!(matches!(
            StaticToken::from_credential(&credential),
            Err(WebApiError::Authentication(_))
        ));
        assert!(StaticToken::new(" ").access_token().await.is_err());
    }
}
