//! Storage back-ends for tokens and cookies.
//!
//! The session layer owns the policy of what is stored where and for how
//! long; these traits are the primitive get/set/remove operations it drives.
//!
//! - `MemoryStore`: process-lifetime store (anti-forgery token, tests)
//! - `FileStore`: JSON file under the cache directory, survives restarts
//! - `KeyringStore`: OS keychain via `keyring`
//! - `MemoryCookieJar`: navigation-visible cookies with max-age expiry

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;
use cookie::Cookie;

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::{MemoryCookieJar, MemoryStore};

/// Primitive key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Cookie storage visible to navigation requests.
pub trait CookieSink: Send + Sync {
    /// Store a cookie. A max-age of zero or less deletes it.
    fn set_cookie(&self, cookie: Cookie<'static>);

    fn remove_cookie(&self, name: &str);

    /// Current value of a live (non-expired) cookie.
    fn cookie(&self, name: &str) -> Option<String>;

    /// All live cookies formatted as a `Cookie` request header.
    fn header_value(&self) -> String;
}
