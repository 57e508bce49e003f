//! Client-side session management for single-page applications.
//!
//! This crate keeps a short-lived access token alive on behalf of a UI:
//!
//! - `auth`: credential store, anti-forgery cache, renewal coordinator and
//!   the `SessionController` that owns the reactive session state
//! - `api`: the authenticated request pipeline wrapping `reqwest`
//! - `guard`: the navigation-time route guard
//! - `storage`: key/value and cookie back-ends
//! - `config`: endpoint, token and route policy

pub mod api;
pub mod auth;
pub mod config;
pub mod guard;
pub mod storage;

pub use api::{ApiError, ApiResponse, RequestOptions, RequestPipeline};
pub use auth::{
    AntiForgeryCache, CredentialStore, RenewalCoordinator, RenewalOutcome, SessionController,
    SessionState, SessionStatus, SessionStores, UserIdentity,
};
pub use config::Config;
pub use guard::{RouteDecision, RouteGuard};

#[cfg(test)]
pub(crate) mod test_support;
