//! Session management: tokens, renewal and the session state machine.
//!
//! This module provides:
//! - `CredentialStore`: the access token, mirrored into the route guard cookie
//! - `AntiForgeryCache`: the per-session CSRF token
//! - `RenewalCoordinator`: single-flight token renewal
//! - `SessionController`: login, logout, startup check and the reactive
//!   `SessionState` the UI observes
//!
//! Refresh tokens never pass through here; the server keeps them in an
//! HttpOnly cookie that the HTTP client's cookie store resends.

pub mod credentials;
pub mod csrf;
pub mod renewal;
pub mod session;
pub mod validation;

pub use crate::api::UserIdentity;
pub use credentials::CredentialStore;
pub use csrf::AntiForgeryCache;
pub use renewal::{RenewalCoordinator, RenewalOutcome};
pub use session::{SessionController, SessionState, SessionStatus, SessionStores};
pub use validation::{FieldError, FieldErrors};
