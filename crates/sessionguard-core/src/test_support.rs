//! Shared fixtures for unit tests.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use wiremock::{MockServer, Request};

use crate::api::RequestPipeline;
use crate::auth::{AntiForgeryCache, CredentialStore, RenewalCoordinator};
use crate::config::Config;
use crate::storage::{MemoryCookieJar, MemoryStore};

/// Sandboxed runners may forbid binding sockets; wiremock tests skip there.
pub(crate) fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Requests the mock server received for one path, in arrival order.
pub(crate) async fn requests_to(server: &MockServer, path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == path)
        .collect()
}

/// Credential store, anti-forgery cache and renewal coordinator wired to
/// in-memory back-ends and one shared client.
pub(crate) struct Harness {
    pub config: Config,
    pub client: Client,
    pub cookies: Arc<MemoryCookieJar>,
    pub credentials: Arc<CredentialStore>,
    pub csrf: Arc<AntiForgeryCache>,
    pub renewal: Arc<RenewalCoordinator>,
}

impl Harness {
    pub fn new(base_url: &str) -> Self {
        let config = Config {
            base_url: base_url.to_string(),
            ..Config::default()
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .cookie_store(true)
            .build()
            .expect("client");
        let cookies = Arc::new(MemoryCookieJar::new());
        let credentials = Arc::new(CredentialStore::from_config(
            &config,
            Arc::new(MemoryStore::new()),
            cookies.clone(),
        ));
        let csrf = Arc::new(AntiForgeryCache::in_memory());
        let renewal = Arc::new(RenewalCoordinator::new(
            &config,
            client.clone(),
            credentials.clone(),
            csrf.clone(),
        ));
        Self {
            config,
            client,
            cookies,
            credentials,
            csrf,
            renewal,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.config.tokens.access_token_ttl()
    }

    pub fn pipeline(&self) -> RequestPipeline {
        RequestPipeline::new(
            &self.config,
            self.client.clone(),
            self.credentials.clone(),
            self.csrf.clone(),
            self.renewal.clone(),
        )
    }
}
