use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::storage::{KeyValueStore, MemoryStore};

const CSRF_TOKEN_KEY: &str = "csrf_token";

/// Header carrying the token on outbound state-changing requests.
pub const CSRF_REQUEST_HEADER: &str = "x-csrf-token";

/// Response header the server uses to issue or rotate the token.
pub const CSRF_RESPONSE_HEADER: &str = "x-csrf-token";

/// Per-session anti-forgery token.
///
/// Backed by a session-scoped store; the token is never persisted across
/// restarts. Storage failures are logged and treated as "no token", in which
/// case protected endpoints reject the request and the failure surfaces
/// normally.
pub struct AntiForgeryCache {
    storage: Arc<dyn KeyValueStore>,
}

impl AntiForgeryCache {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn get(&self) -> Option<String> {
        match self.storage.get(CSRF_TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read CSRF token");
                None
            }
        }
    }

    pub fn set(&self, token: &str) {
        if let Err(e) = self.storage.set(CSRF_TOKEN_KEY, token) {
            warn!(error = %e, "Failed to store CSRF token");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(CSRF_TOKEN_KEY) {
            warn!(error = %e, "Failed to remove CSRF token");
        }
    }

    /// Add the token header when a token is cached; otherwise unchanged.
    pub fn attach(&self, mut headers: HeaderMap) -> HeaderMap {
        if let Some(token) = self.get() {
            match HeaderValue::from_str(&token) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(CSRF_REQUEST_HEADER), value);
                }
                Err(_) => warn!("Cached CSRF token is not a valid header value"),
            }
        }
        headers
    }

    /// Cache the token from a response. A response without the header
    /// leaves the cached token in place.
    pub fn extract(&self, headers: &HeaderMap) {
        let Some(value) = headers.get(CSRF_RESPONSE_HEADER) else {
            return;
        };
        match value.to_str() {
            Ok(token) if !token.trim().is_empty() => {
                debug!("CSRF token received");
                self.set(token.trim());
            }
            Ok(_) => debug!("Ignoring empty CSRF header"),
            Err(_) => warn!("Ignoring CSRF header with non-ASCII value"),
        }
    }
}
