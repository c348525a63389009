//! Connection configuration
//!
//! Connections are read from a TOML file and may be overlaid from environment
//! variables (a `.env` file in the working directory is honoured).
//!
//! ```toml
//! default = "dev"
//!
//! [[connections]]
//! name = "dev"
//! server_url = "https://contoso.crm.dynamics.com"
//! web_api_version = "9.2"
//!
//! [connections.credential]
//! kind = "oauth"
//! username = "jdoe@contoso.com"
//! password = "..."
//! client_id = "51f81489-12ee-4a9e-aaae-a2591f45987d"
//! ```

use crate::api::models::{ConnectionOptions, Credential};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_URL: &str = "DYNAMICS_URL";
pub const ENV_API_VERSION: &str = "DYNAMICS_API_VERSION";
pub const ENV_ACCESS_TOKEN: &str = "DYNAMICS_ACCESS_TOKEN";
pub const ENV_USERNAME: &str = "DYNAMICS_USERNAME";

/// Name of the connection built from `DYNAMICS_URL`
pub const ENV_CONNECTION: &str = "env";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub connections: Vec<ConnectionOptions>,
}

impl Config {
    /// `{config_dir}/dynamics-webapi/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine the user configuration directory")?;
        Ok(dir.join("dynamics-webapi").join("config.toml"))
    }

    /// Load the file at `path` (default location when `None`), then apply the
    /// environment overlay. A missing file is an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&text).with_context(|| format!("Invalid config file: {}", path.display()))?
        } else {
            log::debug!("No config file at {}", path.display());
            Self::default()
        };

        match dotenvy::dotenv() {
            Ok(file) => log::debug!("Loaded environment from {}", file.display()),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("Ignoring unreadable .env file: {}", e),
        }
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, connection) in self.connections.iter().enumerate() {
            if self.connections[..i].iter().any(|c| c.name == connection.name) {
                anyhow::bail!("Connection '{}' is defined more than once", connection.name);
            }
        }
        if let Some(default) = &self.default {
            if self.find(default).is_none() {
                anyhow::bail!("Default connection '{}' is not defined", default);
            }
        }
        Ok(())
    }

    /// Overlay values from `lookup`, normally `std::env::var`.
    ///
    /// `DYNAMICS_URL` adds (or replaces) the `env` connection and makes it the default.
    /// `DYNAMICS_API_VERSION` and `DYNAMICS_ACCESS_TOKEN` apply to the default connection.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_URL) {
            let credential = Credential::CdsOnline {
                username: get(ENV_USERNAME).unwrap_or_default(),
                password: String::new(),
                access_token: None,
            };
            self.connections.retain(|c| c.name != ENV_CONNECTION);
            self.connections
                .push(ConnectionOptions::new(ENV_CONNECTION, url, credential));
            self.default = Some(ENV_CONNECTION.to_string());
        }

        let Some(target) = self.default_name().map(str::to_string) else {
            return;
        };
        let Some(connection) = self.connections.iter_mut().find(|c| c.name == target) else {
            return;
        };

        if let Some(version) = get(ENV_API_VERSION) {
            connection.web_api_version = version;
        }
        if let Some(token) = get(ENV_ACCESS_TOKEN) {
            match &mut connection.credential {
                Credential::OAuth { access_token, .. } | Credential::CdsOnline { access_token, .. } => {
                    *access_token = Some(token);
                }
                other => log::warn!(
                    "{} ignored: '{}' uses a {} credential",
                    ENV_ACCESS_TOKEN,
                    target,
                    other.kind()
                ),
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&ConnectionOptions> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// The configured default, or the only connection when there is just one
    pub fn default_name(&self) -> Option<&str> {
        match (&self.default, self.connections.as_slice()) {
            (Some(name), _) => Some(name.as_str()),
            (None, [only]) => Some(only.name.as_str()),
            _ => None,
        }
    }

    /// The named connection, or the default one
    pub fn connection(&self, name: Option<&str>) -> Result<&ConnectionOptions> {
        let name = match name.or_else(|| self.default_name()) {
            Some(name) => name,
            None if self.connections.is_empty() => anyhow::bail!(
                "No connections configured. Add one to {} or set {}",
                Self::default_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "the config file".to_string()),
                ENV_URL
            ),
            None => anyhow::bail!("Several connections configured and no default; pass --env"),
        };
        self.find(name)
            .with_context(|| format!("Connection '{}' not found", name))
    }
}
