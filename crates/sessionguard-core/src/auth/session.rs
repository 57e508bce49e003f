//! The session state machine.
//!
//! `SessionController` is the single owner of the session the UI observes.
//! Every change to it (startup check, login, logout, refresh) goes through
//! a method here; the request pipeline only updates the credential store,
//! and `reconcile` folds those updates back into the session.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::validation::{validate_login, validate_signup};
use super::{AntiForgeryCache, CredentialStore, RenewalCoordinator, RenewalOutcome, UserIdentity};
use crate::api::types::{LoginRequest, SignupRequest};
use crate::api::{
    ApiError, ApiResponse, LoginResponse, RequestOptions, RequestPipeline, SignupResponse,
};
use crate::config::{Config, Endpoints};
use crate::storage::{CookieSink, KeyValueStore, MemoryCookieJar, MemoryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionStatus {
    Checking,
    Authenticated,
    Unauthenticated,
}

/// Snapshot of the session as the UI sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub user: Option<UserIdentity>,
    pub access_token: Option<String>,
    pub is_loading: bool,
    pub is_authenticated: bool,
}

impl SessionState {
    /// State at process start, before the startup check has run.
    pub fn checking() -> Self {
        Self {
            user: None,
            access_token: None,
            is_loading: true,
            is_authenticated: false,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            is_loading: false,
            ..Self::checking()
        }
    }

    fn authenticated(user: Option<UserIdentity>, access_token: String) -> Self {
        Self {
            user,
            access_token: Some(access_token),
            is_loading: false,
            is_authenticated: true,
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_authenticated {
            SessionStatus::Authenticated
        } else if self.is_loading {
            SessionStatus::Checking
        } else {
            SessionStatus::Unauthenticated
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::checking()
    }
}

/// Storage back-ends the session writes to.
#[derive(Clone)]
pub struct SessionStores {
    /// Survives restarts; holds the access token.
    pub persistent: Arc<dyn KeyValueStore>,
    /// Lives as long as the process; holds the anti-forgery token.
    pub session: Arc<dyn KeyValueStore>,
    /// Navigation-visible cookies read by the route guard.
    pub cookies: Arc<dyn CookieSink>,
}

impl SessionStores {
    pub fn in_memory() -> Self {
        Self {
            persistent: Arc::new(MemoryStore::new()),
            session: Arc::new(MemoryStore::new()),
            cookies: Arc::new(MemoryCookieJar::new()),
        }
    }
}

pub struct SessionController {
    endpoints: Endpoints,
    access_token_ttl: Duration,
    credentials: Arc<CredentialStore>,
    csrf: Arc<AntiForgeryCache>,
    renewal: Arc<RenewalCoordinator>,
    pipeline: RequestPipeline,
    state: watch::Sender<SessionState>,
}

impl SessionController {
    pub fn new(config: &Config, stores: SessionStores) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .cookie_store(true)
            .build()?;
        Ok(Self::with_client(config, stores, client))
    }

    /// Build on an existing client. The client must keep a cookie store, or
    /// the refresh cookie never reaches the renewal endpoint.
    pub fn with_client(config: &Config, stores: SessionStores, client: Client) -> Self {
        let credentials = Arc::new(CredentialStore::from_config(
            config,
            stores.persistent,
            stores.cookies,
        ));
        let csrf = Arc::new(AntiForgeryCache::new(stores.session));
        let renewal = Arc::new(RenewalCoordinator::new(
            config,
            client.clone(),
            credentials.clone(),
            csrf.clone(),
        ));
        let pipeline = RequestPipeline::new(
            config,
            client,
            credentials.clone(),
            csrf.clone(),
            renewal.clone(),
        );
        let (state, _) = watch::channel(SessionState::checking());

        Self {
            endpoints: config.endpoints.clone(),
            access_token_ttl: config.tokens.access_token_ttl(),
            credentials,
            csrf,
            renewal,
            pipeline,
            state,
        }
    }

    /// Receiver that sees every session change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status()
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn anti_forgery(&self) -> &AntiForgeryCache {
        &self.csrf
    }

    /// Validate a stored token once at startup.
    ///
    /// The health endpoint is called without the pipeline's own renewal, so a
    /// rejected check leads to exactly one renewal attempt.
    pub async fn check_session(&self) -> SessionStatus {
        self.state.send_modify(|s| s.is_loading = true);

        if self.credentials.get().is_none() {
            debug!("No stored access token");
            self.end_session();
            return SessionStatus::Unauthenticated;
        }

        let validated = match self
            .pipeline
            .execute_once(&self.endpoints.health, RequestOptions::get())
            .await
        {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                debug!(status = %response.status, "Stored token rejected, renewing");
                self.renewal.renew().await.is_renewed()
            }
            Err(e) => {
                debug!(error = %e, "Session check failed, renewing");
                self.renewal.renew().await.is_renewed()
            }
        };

        match self.credentials.get() {
            Some(token) if validated => {
                info!("Stored session is valid");
                // The cookie sink may not have outlived the previous process.
                self.credentials.restore_cookie();
                self.state.send_modify(|s| {
                    s.access_token = Some(token);
                    s.is_authenticated = true;
                    s.is_loading = false;
                });
                SessionStatus::Authenticated
            }
            _ => {
                info!("Stored session is no longer valid");
                self.end_session();
                SessionStatus::Unauthenticated
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, ApiError> {
        validate_login(email, password).map_err(ApiError::Validation)?;
        self.state.send_modify(|s| s.is_loading = true);

        let login = match self.request_login(email.trim(), password).await {
            Ok(login) => login,
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.state.send_modify(|s| s.is_loading = false);
                return Err(e);
            }
        };

        let ttl = login.ttl().unwrap_or(self.access_token_ttl);
        if let Err(e) = self.credentials.set(&login.access_token, ttl) {
            self.state.send_modify(|s| s.is_loading = false);
            return Err(ApiError::Storage(e));
        }

        info!(user_id = %login.user.id, "Login successful");
        let user = login.user;
        self.state
            .send_replace(SessionState::authenticated(Some(user.clone()), login.access_token));
        Ok(user)
    }

    /// Register an account. The new user still has to log in.
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserIdentity, ApiError> {
        validate_signup(name, email, password).map_err(ApiError::Validation)?;

        let body = to_body(&SignupRequest {
            name: name.trim(),
            email: email.trim(),
            password,
        })?;
        let response = self
            .pipeline
            .execute_once(&self.endpoints.signup, RequestOptions::post(body))
            .await?;
        let created: SignupResponse = response.into_payload()?;
        info!(user_id = %created.user.id, "Signup successful");
        Ok(created.user)
    }

    /// End the session locally. Safe to call repeatedly.
    pub fn logout(&self) {
        self.end_session();
        info!("Logged out");
    }

    /// Ask the server to drop its refresh cookie, then log out locally.
    /// Server failures are logged and do not prevent the local logout.
    pub async fn logout_remote(&self) {
        match self
            .pipeline
            .execute_once(&self.endpoints.logout, RequestOptions::new(Method::POST))
            .await
        {
            Ok(response) if !response.is_success() => {
                debug!(status = %response.status, "Server logout rejected");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Server logout failed"),
        }
        self.logout();
    }

    /// Renew the access token on demand. Failure ends the session.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let reason = match self.renewal.renew().await {
            RenewalOutcome::Renewed => match self.credentials.get() {
                Some(token) => {
                    self.state.send_modify(|s| {
                        s.access_token = Some(token);
                        s.is_authenticated = true;
                        s.is_loading = false;
                    });
                    return Ok(());
                }
                None => "Failed to get new access token".to_string(),
            },
            RenewalOutcome::Failed(reason) => reason,
        };
        self.logout();
        Err(ApiError::Renewal(reason))
    }

    /// Authenticated request, followed by `reconcile`.
    pub async fn execute(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let result = self.pipeline.execute(endpoint, options).await;
        self.reconcile();
        result
    }

    /// Fold credential store changes made by the pipeline into the session:
    /// a vanished token demotes the session, a rotated one is recorded.
    pub fn reconcile(&self) {
        let current = self.credentials.get();
        let mut demoted = false;
        self.state.send_if_modified(|state| {
            if !state.is_authenticated {
                return false;
            }
            match current {
                None => {
                    *state = SessionState::unauthenticated();
                    demoted = true;
                    true
                }
                Some(token) if state.access_token.as_deref() != Some(token.as_str()) => {
                    state.access_token = Some(token);
                    true
                }
                Some(_) => false,
            }
        });
        if demoted {
            info!("Access token gone, session ended");
            self.csrf.clear();
        }
    }

    async fn request_login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = to_body(&LoginRequest { email, password })?;
        // A 401 here means bad credentials, not an expired token.
        let response = self
            .pipeline
            .execute_once(&self.endpoints.login, RequestOptions::post(body))
            .await?;
        if response.is_unauthorized() {
            let message = response.message().unwrap_or("Invalid email or password");
            return Err(ApiError::Rejected(message.to_string()));
        }
        response.into_payload()
    }

    fn end_session(&self) {
        if let Err(e) = self.credentials.clear() {
            warn!(error = %e, "Failed to clear access token");
        }
        self.csrf.clear();
        let cleared = SessionState::unauthenticated();
        self.state.send_if_modified(|state| {
            if *state == cleared {
                false
            } else {
                *state = cleared;
                true
            }
        });
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))
}
