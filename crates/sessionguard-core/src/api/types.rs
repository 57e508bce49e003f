//! Wire types for the auth service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Authenticated user as reported by the auth service. Replaced wholesale on
/// every login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SignupRequest<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserIdentity,
    pub access_token: String,
    /// Token lifetime in seconds, when the server reports it.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl LoginResponse {
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub user: UserIdentity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl RefreshTokenResponse {
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }
}
