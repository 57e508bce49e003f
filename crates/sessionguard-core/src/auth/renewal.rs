//! Single-flight access token renewal.
//!
//! When several requests hit a 401 at once, they must not each spend the
//! single-use refresh cookie: the first caller starts the renewal and every
//! other caller awaits the same shared future. The slot is emptied once the
//! renewal resolves, so the next expiry starts a fresh one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use tracing::{debug, info, warn};

use super::{AntiForgeryCache, CredentialStore};
use crate::api::pipeline::json_headers;
use crate::api::{ApiError, ApiResponse, RefreshTokenResponse};
use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    Renewed,
    /// The session is over; callers must not retry.
    Failed(String),
}

impl RenewalOutcome {
    pub fn is_renewed(&self) -> bool {
        matches!(self, RenewalOutcome::Renewed)
    }
}

type InFlight = Shared<BoxFuture<'static, RenewalOutcome>>;

struct RenewalWorker {
    client: Client,
    url: String,
    access_token_ttl: Duration,
    credentials: Arc<CredentialStore>,
    csrf: Arc<AntiForgeryCache>,
}

impl RenewalWorker {
    async fn run(&self) -> RenewalOutcome {
        match self.request().await {
            Ok(()) => {
                info!("Access token renewed");
                RenewalOutcome::Renewed
            }
            Err(e) => {
                warn!(error = %e, "Token renewal failed, clearing access token");
                if let Err(clear_err) = self.credentials.clear() {
                    warn!(error = %clear_err, "Failed to clear access token");
                }
                RenewalOutcome::Failed(e.to_string())
            }
        }
    }

    async fn request(&self) -> Result<(), ApiError> {
        // The refresh token rides along in the client's cookie store.
        let response = self
            .client
            .post(&self.url)
            .headers(self.csrf.attach(json_headers()))
            .send()
            .await?;
        let response = ApiResponse::read(response).await?;

        if !response.is_success() {
            return Err(response.error());
        }
        self.csrf.extract(&response.headers);

        let renewed: RefreshTokenResponse = response.payload()?;
        if renewed.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "Empty access token in refresh response".to_string(),
            ));
        }
        let ttl = renewed.ttl().unwrap_or(self.access_token_ttl);
        self.credentials.set(&renewed.access_token, ttl)?;
        Ok(())
    }
}

/// Performs token renewal, at most one call in flight at a time.
pub struct RenewalCoordinator {
    worker: Arc<RenewalWorker>,
    in_flight: Mutex<Option<InFlight>>,
}

impl RenewalCoordinator {
    pub fn new(
        config: &Config,
        client: Client,
        credentials: Arc<CredentialStore>,
        csrf: Arc<AntiForgeryCache>,
    ) -> Self {
        Self {
            worker: Arc::new(RenewalWorker {
                client,
                url: config.url(&config.endpoints.refresh),
                access_token_ttl: config.tokens.access_token_ttl(),
                credentials,
                csrf,
            }),
            in_flight: Mutex::new(None),
        }
    }

    /// Renew the access token, joining a renewal already in progress.
    pub async fn renew(&self) -> RenewalOutcome {
        let renewal = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining renewal in progress");
                    existing.clone()
                }
                None => {
                    let worker = Arc::clone(&self.worker);
                    let started = async move { worker.run().await }.boxed().shared();
                    *slot = Some(started.clone());
                    started
                }
            }
        };

        let outcome = renewal.clone().await;

        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&renewal)) {
            *slot = None;
        }
        outcome
    }

    /// Whether a renewal is currently in flight.
    pub fn is_renewing(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
