use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use cookie::Cookie;

use super::{CookieSink, KeyValueStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory key/value store. Contents vanish with the process, which is
/// the lifetime the anti-forgery token wants.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

#[derive(Debug)]
struct StoredCookie {
    cookie: Cookie<'static>,
    expires_at: Option<Instant>,
}

impl StoredCookie {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// Cookie jar that honors `Max-Age`. Cookies without a max-age live until
/// removed.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<BTreeMap<String, StoredCookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full cookie (attributes included) for inspection.
    pub fn get_cookie(&self, name: &str) -> Option<Cookie<'static>> {
        let now = Instant::now();
        lock(&self.cookies)
            .get(name)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.cookie.clone())
    }
}

impl CookieSink for MemoryCookieJar {
    fn set_cookie(&self, cookie: Cookie<'static>) {
        let name = cookie.name().to_string();
        let expires_at = match cookie.max_age() {
            Some(age) if age.whole_seconds() <= 0 => {
                lock(&self.cookies).remove(&name);
                return;
            }
            Some(age) => Some(Instant::now() + Duration::from_secs(age.whole_seconds() as u64)),
            None => None,
        };
        lock(&self.cookies).insert(name, StoredCookie { cookie, expires_at });
    }

    fn remove_cookie(&self, name: &str) {
        lock(&self.cookies).remove(name);
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.get_cookie(name).map(|c| c.value().to_string())
    }

    fn header_value(&self) -> String {
        let now = Instant::now();
        let mut cookies = lock(&self.cookies);
        cookies.retain(|_, stored| stored.is_live(now));
        cookies
            .values()
            .map(|stored| format!("{}={}", stored.cookie.name(), stored.cookie.value()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
