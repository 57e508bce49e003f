//! Authenticated request pipeline.
//!
//! Every outbound call goes through `RequestPipeline::execute`, which
//! attaches the current access token and anti-forgery token, renews the
//! session once when the server answers 401, and replays the call with the
//! new token.

use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, ApiResponse};
use crate::auth::{AntiForgeryCache, CredentialStore, RenewalCoordinator};
use crate::config::{join_url, Config};

/// Method, body and extra headers for one call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post(body: Value) -> Self {
        Self::new(Method::POST).with_body(body)
    }

    pub fn put(body: Value) -> Self {
        Self::new(Method::PUT).with_body(body)
    }

    pub fn patch(body: Value) -> Self {
        Self::new(Method::PATCH).with_body(body)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// POST, PUT, PATCH and DELETE carry the anti-forgery token.
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

/// Wraps the HTTP client with credential handling.
/// Clones share the client, stores and renewal coordinator.
#[derive(Clone)]
pub struct RequestPipeline {
    client: Client,
    base_url: String,
    refresh_endpoint: String,
    credentials: Arc<CredentialStore>,
    csrf: Arc<AntiForgeryCache>,
    renewal: Arc<RenewalCoordinator>,
}

impl RequestPipeline {
    pub fn new(
        config: &Config,
        client: Client,
        credentials: Arc<CredentialStore>,
        csrf: Arc<AntiForgeryCache>,
        renewal: Arc<RenewalCoordinator>,
    ) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            refresh_endpoint: config.endpoints.refresh.clone(),
            credentials,
            csrf,
            renewal,
        }
    }

    /// Send a request, renewing the session once on a 401.
    ///
    /// 401 responses are returned as `Ok`; only transport failures are
    /// errors. A replay after renewal is returned as-is, even if it fails
    /// again.
    pub async fn execute(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let url = join_url(&self.base_url, endpoint);
        let sent_with = self.credentials.get();
        let response = self.send(&url, &options, sent_with.as_deref()).await?;

        if !response.is_unauthorized() || self.is_renewal_endpoint(endpoint) {
            return Ok(response);
        }

        // Another caller may have renewed while this request was in flight.
        let current = self.credentials.get();
        let renewed = match current {
            Some(ref token) if sent_with.as_ref() != Some(token) => {
                debug!(endpoint, "Token rotated during request, replaying without renewal");
                true
            }
            _ => {
                debug!(endpoint, "Unauthorized, renewing session");
                self.renewal.renew().await.is_renewed()
            }
        };

        if !renewed {
            debug!(endpoint, "Renewal failed, returning original response");
            return Ok(response);
        }

        let retry_with = self.credentials.get();
        if retry_with.is_none() {
            warn!(endpoint, "Token vanished after renewal, returning original response");
            return Ok(response);
        }
        self.send(&url, &options, retry_with.as_deref()).await
    }

    /// Send a request exactly once, without renewal on 401.
    pub async fn execute_once(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let url = join_url(&self.base_url, endpoint);
        let credential = self.credentials.get();
        self.send(&url, &options, credential.as_deref()).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.execute(endpoint, RequestOptions::get())
            .await?
            .into_payload()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute(endpoint, RequestOptions::post(to_value(body)?))
            .await?
            .into_payload()
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute(endpoint, RequestOptions::put(to_value(body)?))
            .await?
            .into_payload()
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.execute(endpoint, RequestOptions::delete())
            .await?
            .into_payload()
    }

    fn is_renewal_endpoint(&self, endpoint: &str) -> bool {
        let path = endpoint.split(['?', '#']).next().unwrap_or(endpoint);
        path.trim_end_matches('/') == self.refresh_endpoint.trim_end_matches('/')
            || path.ends_with(&self.refresh_endpoint)
    }

    fn build_headers(&self, options: &RequestOptions, credential: Option<&str>) -> HeaderMap {
        let mut headers = json_headers();
        headers.extend(options.headers.clone());

        if let Some(token) = credential {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => warn!("Access token is not a valid header value, sending without it"),
            }
        }

        if options.is_state_changing() {
            headers = self.csrf.attach(headers);
        }
        headers
    }

    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        credential: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let headers = self.build_headers(options, credential);
        let mut request = self
            .client
            .request(options.method.clone(), url)
            .headers(headers);
        if let Some(ref body) = options.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url, error = %e, "Request failed");
            ApiError::NetworkError(e)
        })?;

        let response = ApiResponse::read(response).await?;
        debug!(url, method = %options.method, status = %response.status, "Request completed");
        if response.status.is_success() {
            self.csrf.extract(&response.headers);
        }
        Ok(response)
    }
}

pub(crate) fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

fn to_value<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::csrf::CSRF_REQUEST_HEADER;
    use crate::test_support::{can_bind_localhost, requests_to, Harness};

    #[test]
    fn test_state_changing_methods() {
        assert!(RequestOptions::post(json!({})).is_state_changing());
        assert!(RequestOptions::put(json!({})).is_state_changing());
        assert!(RequestOptions::patch(json!({})).is_state_changing());
        assert!(RequestOptions::delete().is_state_changing());
        assert!(!RequestOptions::get().is_state_changing());
    }

    #[tokio::test]
    async fn attaches_bearer_and_csrf_on_post_only() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());
        harness.credentials.set("tok1", harness.ttl()).unwrap();
        harness.csrf.set("csrf-1");

        Mock::given(path("/api/items"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []})),
            )
            .mount(&server)
            .await;

        let pipeline = harness.pipeline();
        pipeline.execute("/api/items", RequestOptions::get()).await.unwrap();
        pipeline
            .execute("/api/items", RequestOptions::post(json!({"counter": 1})))
            .await
            .unwrap();

        let requests = requests_to(&server, "/api/items").await;
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert_eq!(request.headers.get("authorization").unwrap(), "Bearer tok1");
            assert_eq!(request.headers.get("content-type").unwrap(), "application/json");
        }
        assert!(requests[0].headers.get(CSRF_REQUEST_HEADER).is_none());
        assert_eq!(requests[1].headers.get(CSRF_REQUEST_HEADER).unwrap(), "csrf-1");
    }

    #[tokio::test]
    async fn sends_no_authorization_without_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());

        Mock::given(path("/api/public"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let response = harness
            .pipeline()
            .execute("/api/public", RequestOptions::get())
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, Value::Null);

        let requests = requests_to(&server, "/api/public").await;
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn retries_with_renewed_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());
        harness.credentials.set("tok1", harness.ttl()).unwrap();

        Mock::given(method("GET"))
            .and(path("/api/sample/items/1"))
            .and(header("authorization", "Bearer tok1"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "message": "Token expired"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sample/items/1"))
            .and(header("authorization", "Bearer tok2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"id": 1, "counter": 3}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"accessToken": "tok2"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = harness
            .pipeline()
            .execute("/api/sample/items/1", RequestOptions::get())
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body["data"]["counter"], 3);
        assert_eq!(harness.credentials.get().as_deref(), Some("tok2"));

        let requests = requests_to(&server, "/api/sample/items/1").await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].headers.get("authorization").unwrap(), "Bearer tok2");
    }

    #[tokio::test]
    async fn replays_rotated_token_without_renewing() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());
        harness.credentials.set("tok1", harness.ttl()).unwrap();

        Mock::given(method("GET"))
            .and(path("/api/sample/items/1"))
            .and(header("authorization", "Bearer tok1"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sample/items/1"))
            .and(header("authorization", "Bearer tok2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/api/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "tok3"})))
            .expect(0)
            .mount(&server)
            .await;

        let pipeline = harness.pipeline();
        let credentials = harness.credentials.clone();
        let ttl = harness.ttl();
        let (response, ()) = tokio::join!(
            pipeline.execute("/api/sample/items/1", RequestOptions::get()),
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                credentials.set("tok2", ttl).unwrap();
            }
        );

        assert!(response.unwrap().is_success());
        assert!(requests_to(&server, "/api/auth/refresh-token").await.is_empty());
        let requests = requests_to(&server, "/api/sample/items/1").await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].headers.get("authorization").unwrap(), "Bearer tok2");
        assert_eq!(harness.credentials.get().as_deref(), Some("tok2"));
    }

    #[tokio::test]
    async fn returns_original_401_when_renewal_fails() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());
        harness.credentials.set("tok1", harness.ttl()).unwrap();

        Mock::given(path("/api/items"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "message": "Token expired"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/api/auth/refresh-token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "message": "Invalid refresh token"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = harness
            .pipeline()
            .execute("/api/items", RequestOptions::get())
            .await
            .unwrap();
        assert!(response.is_unauthorized());
        assert_eq!(response.message(), Some("Token expired"));
        assert_eq!(harness.credentials.get(), None);
    }

    #[tokio::test]
    async fn replays_only_once() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());
        harness.credentials.set("tok1", harness.ttl()).unwrap();

        Mock::given(path("/api/items"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(path("/api/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "tok2"})))
            .expect(1)
            .mount(&server)
            .await;

        let response = harness
            .pipeline()
            .execute("/api/items", RequestOptions::get())
            .await
            .unwrap();
        assert!(response.is_unauthorized());
    }

    #[tokio::test]
    async fn renewal_endpoint_401_does_not_renew() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());
        harness.credentials.set("tok1", harness.ttl()).unwrap();

        Mock::given(path("/api/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let response = harness
            .pipeline()
            .execute("/api/auth/refresh-token", RequestOptions::post(Value::Null))
            .await
            .unwrap();
        assert!(response.is_unauthorized());
        assert_eq!(harness.credentials.get().as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn extracts_rotated_csrf_token() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());
        harness.csrf.set("csrf-old");

        Mock::given(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "csrf-new"))
            .mount(&server)
            .await;
        Mock::given(path("/api/items"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let pipeline = harness.pipeline();
        pipeline.execute("/api/health", RequestOptions::get()).await.unwrap();
        assert_eq!(harness.csrf.get().as_deref(), Some("csrf-new"));

        pipeline.execute("/api/items", RequestOptions::get()).await.unwrap();
        assert_eq!(harness.csrf.get().as_deref(), Some("csrf-new"));
    }

    #[tokio::test]
    async fn typed_helpers_decode_payload() {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return;
        }
        let server = MockServer::start().await;
        let harness = Harness::new(&server.uri());

        Mock::given(method("PUT"))
            .and(path("/api/sample/items/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"counter": 4}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/sample/items/9"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"success": false, "message": "Item not found"})),
            )
            .mount(&server)
            .await;

        let pipeline = harness.pipeline();
        let updated: Value = pipeline
            .put_json("/api/sample/items/1", &json!({"counter": 4}))
            .await
            .unwrap();
        assert_eq!(updated["counter"], 4);

        let missing = pipeline.get_json::<Value>("/api/sample/items/9").await;
        assert!(matches!(missing, Err(ApiError::NotFound(m)) if m == "Item not found"));
    }

    #[tokio::test]
    async fn network_errors_propagate() {
        let harness = Harness::new("http://127.0.0.1:1");
        let result = harness
            .pipeline()
            .execute("/api/items", RequestOptions::get())
            .await;
        assert!(matches!(result, Err(ApiError::NetworkError(_))));
    }
}
