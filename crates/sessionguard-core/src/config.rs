//! Session configuration management.
//!
//! Holds the API base URL, the auth endpoint paths, the token lifetime
//! policy and the route guard's path lists.
//!
//! Configuration is stored at `~/.config/sessionguard/config.json`. A missing
//! file yields the defaults, which match the reference auth service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionguard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `base_url`
pub const BASE_URL_ENV: &str = "SESSIONGUARD_API_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Access tokens issued by the auth service live for 15 minutes.
const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;

/// The route guard cookie expires a little earlier than the token itself
/// (9 minutes), so it never admits a navigation the token cannot back.
const DEFAULT_COOKIE_MAX_AGE_SECS: u64 = 9 * 60;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub signup: String,
    pub refresh: String,
    pub logout: String,
    pub health: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/api/auth/login".to_string(),
            signup: "/api/auth/signup".to_string(),
            refresh: "/api/auth/refresh-token".to_string(),
            logout: "/api/auth/logout".to_string(),
            health: "/api/health".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPolicy {
    /// Lifetime assumed for an access token when the server does not say.
    pub access_token_ttl_secs: u64,
    /// Upper bound for the `access_token` cookie's max-age.
    pub cookie_max_age_secs: u64,
    /// Force the cookie's `Secure` attribute; derived from the base URL when unset.
    pub secure_cookies: Option<bool>,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            cookie_max_age_secs: DEFAULT_COOKIE_MAX_AGE_SECS,
            secure_cookies: None,
        }
    }
}

impl TokenPolicy {
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    pub fn cookie_max_age(&self) -> Duration {
        Duration::from_secs(self.cookie_max_age_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePolicy {
    /// Path prefixes that require the access cookie.
    pub protected_prefixes: Vec<String>,
    /// Login/signup pages; authenticated users are sent away from these.
    pub entry_paths: Vec<String>,
    /// Where unauthenticated users land.
    pub entry_redirect: String,
    /// Where authenticated users land.
    pub landing_redirect: String,
    /// Asset and API prefixes the guard never inspects.
    pub bypass_prefixes: Vec<String>,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            protected_prefixes: vec!["/dashboard".to_string()],
            entry_paths: vec!["/login".to_string(), "/signup".to_string()],
            entry_redirect: "/login".to_string(),
            landing_redirect: "/dashboard".to_string(),
            bypass_prefixes: vec![
                "/api".to_string(),
                "/_next/static".to_string(),
                "/_next/image".to_string(),
                "/favicon.ico".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub endpoints: Endpoints,
    pub tokens: TokenPolicy,
    pub routes: RoutePolicy,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoints: Endpoints::default(),
            tokens: TokenPolicy::default(),
            routes: RoutePolicy::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Ok(Self::load_from(&path)?.with_env_overrides())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `SESSIONGUARD_API_BASE_URL` when set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            if !base_url.trim().is_empty() {
                self.base_url = base_url.trim().to_string();
            }
        }
        self
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

    /// Absolute URL for an endpoint path.
    pub fn url(&self, endpoint: &str) -> String {
        join_url(&self.base_url, endpoint)
    }

    /// Whether cookies get the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.tokens
            .secure_cookies
            .unwrap_or_else(|| self.base_url.starts_with("https://"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub(crate) fn join_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    }
}
