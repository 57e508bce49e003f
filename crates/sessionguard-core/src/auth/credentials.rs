use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::storage::{CookieSink, KeyValueStore};

/// Storage key for the persisted token, and name of the route guard cookie.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Longest lifetime accepted from a TTL hint.
const MAX_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Persisted form of the access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub token: String,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredCredential {
    fn new(token: &str, ttl: Duration) -> Self {
        let stored_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl.min(MAX_TOKEN_TTL))
            .unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            token: token.to_string(),
            stored_at,
            expires_at: stored_at + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Owner of the access token.
///
/// The token lives in the persistent store, which requests read from, and is
/// mirrored into the `access_token` cookie, which only the route guard reads.
/// This is the only writer of that cookie. The cookie's max-age never exceeds
/// the token's own lifetime, so the guard cannot admit a navigation the token
/// no longer backs.
pub struct CredentialStore {
    persistent: Arc<dyn KeyValueStore>,
    cookies: Arc<dyn CookieSink>,
    cookie_max_age: Duration,
    secure: bool,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(
        persistent: Arc<dyn KeyValueStore>,
        cookies: Arc<dyn CookieSink>,
        cookie_max_age: Duration,
        secure: bool,
    ) -> Self {
        Self {
            persistent,
            cookies,
            cookie_max_age,
            secure,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &Config,
        persistent: Arc<dyn KeyValueStore>,
        cookies: Arc<dyn CookieSink>,
    ) -> Self {
        Self::new(
            persistent,
            cookies,
            config.tokens.cookie_max_age(),
            config.secure_cookies(),
        )
    }

    /// Current token, or `None` when absent, expired or unreadable.
    pub fn get(&self) -> Option<String> {
        let stored = self.load();
        if stored.is_none() && self.cookies.cookie(ACCESS_TOKEN_KEY).is_some() {
            let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if self.load().is_none() {
                debug!("Removing access cookie without a backing token");
                self.cookies.remove_cookie(ACCESS_TOKEN_KEY);
            }
        }
        stored.map(|c| c.token)
    }

    /// When the current token expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.load().map(|c| c.expires_at)
    }

    /// Replace the token. The persistent store is written first, then the
    /// cookie, before this returns.
    pub fn set(&self, token: &str, ttl_hint: Duration) -> Result<()> {
        let record = StoredCredential::new(token, ttl_hint);
        let contents = serde_json::to_string(&record).context("Failed to encode access token")?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.persistent.set(ACCESS_TOKEN_KEY, &contents) {
            // The previous token is superseded; neither sink may keep it.
            self.cookies.remove_cookie(ACCESS_TOKEN_KEY);
            if let Err(remove_err) = self.persistent.remove(ACCESS_TOKEN_KEY) {
                warn!(error = %remove_err, "Failed to remove superseded access token");
            }
            return Err(e).context("Failed to store access token");
        }
        self.cookies.set_cookie(self.access_cookie(token, ttl_hint));
        debug!(expires_at = %record.expires_at, "Access token stored");
        Ok(())
    }

    /// Rewrite the cookie from the persisted token, for a cookie sink that
    /// did not survive a restart. The cookie's max-age is capped by the time
    /// the token has left. Returns whether a cookie was written.
    pub fn restore_cookie(&self) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = self.load() else {
            self.cookies.remove_cookie(ACCESS_TOKEN_KEY);
            return false;
        };
        let remaining = (record.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if remaining.as_secs() == 0 {
            self.cookies.remove_cookie(ACCESS_TOKEN_KEY);
            return false;
        }
        self.cookies.set_cookie(self.access_cookie(&record.token, remaining));
        debug!(expires_at = %record.expires_at, "Access cookie restored");
        true
    }

    /// Remove the token from both sinks. Safe to call when nothing is stored.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cookies.remove_cookie(ACCESS_TOKEN_KEY);
        self.persistent
            .remove(ACCESS_TOKEN_KEY)
            .context("Failed to remove access token")
    }

    fn load(&self) -> Option<StoredCredential> {
        let contents = match self.persistent.get(ACCESS_TOKEN_KEY) {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read access token");
                return None;
            }
        };
        match serde_json::from_str::<StoredCredential>(&contents) {
            Ok(record) if record.is_expired() => {
                debug!(expired_at = %record.expires_at, "Stored access token expired");
                None
            }
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Failed to parse stored access token");
                None
            }
        }
    }

    fn access_cookie(&self, token: &str, ttl_hint: Duration) -> Cookie<'static> {
        let max_age = self.cookie_max_age.min(ttl_hint).as_secs();
        Cookie::build((ACCESS_TOKEN_KEY, token.to_string()))
            .path("/")
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .max_age(time::Duration::seconds(max_age as i64))
            .build()
    }
}
