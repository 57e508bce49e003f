//! Navigation-time route guard.
//!
//! Decides, before a page renders, whether a navigation is allowed. The only
//! input besides the path is whether the `access_token` cookie is present;
//! the guard never touches the network or the token itself.

use cookie::Cookie;
use serde::Serialize;

use crate::auth::credentials::ACCESS_TOKEN_KEY;
use crate::config::RoutePolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "action", content = "to", rename_all = "lowercase")]
pub enum RouteDecision {
    Allow,
    Redirect(String),
}

pub struct RouteGuard {
    policy: RoutePolicy,
}

impl RouteGuard {
    pub fn new(policy: RoutePolicy) -> Self {
        Self { policy }
    }

    pub fn evaluate(&self, path: &str, has_access_cookie: bool) -> RouteDecision {
        let path = strip_query(path);

        if self.is_bypassed(path) {
            return RouteDecision::Allow;
        }
        if !has_access_cookie && self.is_protected(path) {
            return RouteDecision::Redirect(self.policy.entry_redirect.clone());
        }
        if has_access_cookie && self.is_entry(path) {
            return RouteDecision::Redirect(self.policy.landing_redirect.clone());
        }
        RouteDecision::Allow
    }

    /// Evaluate against a raw `Cookie` request header.
    pub fn evaluate_cookie_header(&self, path: &str, cookie_header: Option<&str>) -> RouteDecision {
        let present = cookie_header.is_some_and(has_access_cookie);
        self.evaluate(path, present)
    }

    fn is_bypassed(&self, path: &str) -> bool {
        self.policy
            .bypass_prefixes
            .iter()
            .any(|prefix| under_prefix(path, prefix))
    }

    fn is_protected(&self, path: &str) -> bool {
        self.policy
            .protected_prefixes
            .iter()
            .any(|prefix| under_prefix(path, prefix))
    }

    fn is_entry(&self, path: &str) -> bool {
        let path = trim_trailing_slash(path);
        self.policy
            .entry_paths
            .iter()
            .any(|entry| trim_trailing_slash(entry) == path)
    }
}

/// Whether a `Cookie` header carries a non-empty access token.
pub fn has_access_cookie(cookie_header: &str) -> bool {
    Cookie::split_parse(cookie_header)
        .filter_map(Result::ok)
        .any(|c| c.name() == ACCESS_TOKEN_KEY && !c.value().is_empty())
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn trim_trailing_slash(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// `/dashboard` covers `/dashboard` and `/dashboard/x`, not `/dashboards`.
fn under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = trim_trailing_slash(prefix);
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
