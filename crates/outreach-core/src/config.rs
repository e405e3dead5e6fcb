//! Backend environment configuration.
//!
//! A `BackendConfig` describes one backend origin: the API base URL, the
//! CSRF priming path, and the cookie/header names that origin uses. Values
//! are supplied by the host app's environment layer and treated as opaque
//! strings.
//!
//! Configuration is stored at `~/.config/outreach/config.json`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "outreach";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base API URL, without a trailing slash
    pub api_url: String,
    /// Path of the GraphQL endpoint on the API origin
    pub graphql_path: String,
    /// Path fetched to harvest a CSRF cookie when none is cached
    pub csrf_login_path: String,
    /// Name of the cookie the backend sets the CSRF token in
    pub csrf_cookie_name: String,
    /// Name of the request header the CSRF token is sent back in
    pub csrf_header_name: String,
    /// Name of the session cookie
    pub session_cookie_name: String,
    /// Referer attached to every request on non-web platforms
    pub referer: Option<String>,
    /// Base URL of the HMIS REST API, if this environment has one
    pub hmis_url: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            graphql_path: "/graphql".to_string(),
            csrf_login_path: "/admin/login/".to_string(),
            csrf_cookie_name: "csrftoken".to_string(),
            csrf_header_name: "x-csrftoken".to_string(),
            session_cookie_name: "sessionid".to_string(),
            referer: None,
            hmis_url: None,
        }
    }
}

impl BackendConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Full URL for a path on the API origin
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Full URL of the GraphQL endpoint
    pub fn graphql_url(&self) -> String {
        self.endpoint(&self.graphql_path)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
