//! Gateway client for the backend GraphQL/REST API.
//!
//! Every outgoing operation passes through the same pipeline: CSRF priming,
//! header injection, kind dispatch (REST path vs GraphQL endpoint), then
//! response inspection for unauthenticated signals. A 401 or an
//! `UNAUTHENTICATED` GraphQL error triggers the deduplicated redirect guard
//! unless the operation is on the exemption list; the error itself is always
//! propagated to the caller.

use std::collections::HashSet;

use anyhow::{Context, Result};
use reqwest::{header, Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::CredentialStore;
use crate::config::BackendConfig;

use super::error::GraphqlError;
use super::{ApiError, Operation, OperationKind, RedirectGuard};

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// The backend rejects requests without a browser User-Agent, so every
/// component sends the same fixed modern-browser string.
pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const REQUESTED_WITH: &str = "XMLHttpRequest";

/// Operation names whose auth failures never trigger a redirect. The
/// current-user probe is how the app checks auth state in the first place;
/// redirecting on its 401 would loop.
const DEFAULT_EXEMPT_OPERATIONS: &[&str] = &["currentUser"];

/// Body of a completed operation. REST responses are wrapped with the whole
/// payload as `data` so both kinds present the same shape to callers.
#[derive(Debug, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

impl GraphqlResponse {
    /// Convert to a hard result: any GraphQL error becomes `ApiError::Graphql`
    pub fn into_result(self) -> Result<Option<Value>, ApiError> {
        if self.errors.is_empty() {
            Ok(self.data)
        } else {
            Err(ApiError::Graphql(self.errors))
        }
    }
}

/// Gateway client for one backend origin.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    config: BackendConfig,
    store: CredentialStore,
    guard: RedirectGuard,
    exempt_operations: HashSet<String>,
}

impl GatewayClient {
    pub fn new(config: BackendConfig, store: CredentialStore, guard: RedirectGuard) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            config,
            store,
            guard,
            exempt_operations: DEFAULT_EXEMPT_OPERATIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        })
    }

    /// Replace the redirect exemption list
    pub fn with_exempt_operations<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_operations = names.into_iter().map(Into::into).collect();
        self
    }

    /// Execute one operation through the full pipeline.
    pub async fn execute(&self, op: &Operation) -> Result<GraphqlResponse> {
        self.ensure_csrf().await;
        let headers = self.request_headers()?;

        let response = match op.kind() {
            OperationKind::Rest { method, path } => {
                self.send_rest(method.clone(), path, &op.variables, headers)
                    .await?
            }
            OperationKind::Graphql => self
                .client
                .post(self.config.graphql_url())
                .headers(headers)
                .json(&op.envelope())
                .send()
                .await
                .with_context(|| format!("Failed to execute operation {}", op.name))?,
        };

        self.inspect(op, response).await
    }

    /// Ensure a CSRF token is cached, fetching the login page to harvest one
    /// if absent. Single attempt; on failure the request proceeds without the
    /// header and the server's rejection is handled downstream.
    async fn ensure_csrf(&self) {
        if self.store.csrf_token().is_some() {
            return;
        }
        let url = self.config.endpoint(&self.config.csrf_login_path);
        debug!(url = %url, "priming CSRF token");

        match self
            .client
            .get(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await
        {
            Ok(response) => {
                if let Some(token) = harvest_cookie(&response, &self.config.csrf_cookie_name) {
                    self.store.set_csrf_token(token);
                } else {
                    debug!("CSRF priming response carried no token cookie");
                }
            }
            Err(e) => {
                debug!(error = %e, "CSRF priming failed, proceeding without token");
            }
        }
    }

    fn request_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));
        headers.insert("X-Requested-With", header::HeaderValue::from_static(REQUESTED_WITH));

        if let Some(cookie) = self
            .store
            .cookie_header(&self.config.session_cookie_name, &self.config.csrf_cookie_name)
        {
            headers.insert(header::COOKIE, header::HeaderValue::from_str(&cookie)?);
        }
        if let Some(token) = self.store.csrf_token() {
            let name = header::HeaderName::from_bytes(self.config.csrf_header_name.as_bytes())?;
            headers.insert(name, header::HeaderValue::from_str(&token)?);
        }
        if let Some(ref referer) = self.config.referer {
            headers.insert(header::REFERER, header::HeaderValue::from_str(referer)?);
        }
        Ok(headers)
    }

    async fn send_rest(
        &self,
        method: Method,
        path: &str,
        variables: &Value,
        headers: header::HeaderMap,
    ) -> Result<Response> {
        let url = self.config.endpoint(path);
        let request = self.client.request(method.clone(), &url).headers(headers);

        let request = if method == Method::GET {
            match variables.as_object().filter(|map| !map.is_empty()) {
                Some(map) => {
                    let query: Vec<(String, String)> = map
                        .iter()
                        .map(|(key, value)| (key.clone(), query_value(value)))
                        .collect();
                    request.query(&query)
                }
                None => request,
            }
        } else {
            request.json(variables)
        };

        request
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, url))
    }

    async fn inspect(&self, op: &Operation, response: Response) -> Result<GraphqlResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                self.redirect_unless_exempt(op);
            }
            return Err(ApiError::from_status(status, &body).into());
        }

        match op.kind() {
            OperationKind::Rest { .. } => {
                let data: Value = response
                    .json()
                    .await
                    .with_context(|| format!("Failed to parse response for operation {}", op.name))?;
                Ok(GraphqlResponse {
                    data: Some(data),
                    errors: Vec::new(),
                })
            }
            OperationKind::Graphql => {
                let body: GraphqlResponse = response
                    .json()
                    .await
                    .with_context(|| format!("Failed to parse response for operation {}", op.name))?;

                if body.errors.iter().any(GraphqlError::is_unauthenticated) {
                    self.redirect_unless_exempt(op);
                }
                for error in &body.errors {
                    warn!(operation = %op.name, message = %error.message, "GraphQL error");
                }
                Ok(body)
            }
        }
    }

    fn redirect_unless_exempt(&self, op: &Operation) {
        if self.exempt_operations.contains(&op.name) {
            debug!(operation = %op.name, "unauthenticated on exempt operation, not redirecting");
            return;
        }
        self.guard.trigger();
    }
}

/// Value of a named cookie in the response's `Set-Cookie` headers
fn harvest_cookie(response: &Response, name: &str) -> Option<String> {
    for value in response.headers().get_all(header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        let pair = raw.split(';').next().unwrap_or(raw);
        if let Some((key, val)) = pair.split_once('=') {
            if key.trim() == name {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

/// Render a JSON variable as a query-string value
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RedirectAction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        server: MockServer,
        client: GatewayClient,
        store: CredentialStore,
        redirects: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    /// Route pipeline tracing to the test writer. Run with
    /// `RUST_LOG=outreach_core=debug` to see priming and redirect decisions.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn harness() -> Harness {
        init_tracing();
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path().to_path_buf());
        let redirects = Arc::new(AtomicUsize::new(0));
        let action: RedirectAction = {
            let redirects = Arc::clone(&redirects);
            Arc::new(move || {
                redirects.fetch_add(1, Ordering::SeqCst);
            })
        };
        let client = GatewayClient::new(
            BackendConfig::new(server.uri()),
            store.clone(),
            RedirectGuard::new(action),
        )
        .expect("client");

        Harness {
            server,
            client,
            store,
            redirects,
            _dir: dir,
        }
    }

    fn graphql_op(name: &str) -> Operation {
        Operation::new(
            name,
            format!("query {name} {{ {name} {{ id }} }}"),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn primes_csrf_once_before_mutating_request() {
        let h = harness().await;

        Mock::given(method("GET"))
            .and(path("/admin/login/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "csrftoken=abc123; Path=/; SameSite=Lax"),
            )
            .expect(1)
            .mount(&h.server)
            .await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header_matcher("x-csrftoken", "abc123"))
            .and(header_matcher("X-Requested-With", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "createNote": { "id": "1" } }
            })))
            .expect(2)
            .mount(&h.server)
            .await;

        let op = Operation::new(
            "CreateNote",
            "mutation CreateNote { createNote { id } }",
            serde_json::json!({}),
        );
        // Two requests, one priming fetch: the harvested token is reused
        h.client.execute(&op).await.unwrap();
        h.client.execute(&op).await.unwrap();
        assert_eq!(h.store.csrf_token().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn csrf_priming_failure_proceeds_without_header() {
        let h = harness().await;

        // No login mock: priming 404s. The request still goes out.
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "ok": true }
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        let response = h.client.execute(&graphql_op("ok")).await.unwrap();
        assert!(response.errors.is_empty());
        assert_eq!(h.store.csrf_token(), None);
    }

    #[tokio::test]
    async fn http_401_triggers_redirect_and_propagates_error() {
        let h = harness().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&h.server)
            .await;

        let result = h.client.execute(&graphql_op("notes")).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Unauthorized)
        ));
        assert_eq!(h.redirects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_unauthorized_operations_redirect_once() {
        let h = harness().await;
        h.store.set_csrf_token("tok".to_string());

        // A shared delay lands all five 401s in the same scheduler tick, the
        // shape of an expired session failing a screenful of queries at once
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(
                ResponseTemplate::new(401).set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(5)
            .mount(&h.server)
            .await;

        let op = graphql_op("notes");
        let results =
            futures::future::join_all((0..5).map(|_| h.client.execute(&op))).await;
        for result in results {
            assert!(matches!(
                result.unwrap_err().downcast_ref::<ApiError>(),
                Some(ApiError::Unauthorized)
            ));
        }
        assert_eq!(h.redirects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exempt_operation_never_redirects() {
        let h = harness().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&h.server)
            .await;

        let result = h.client.execute(&graphql_op("currentUser")).await;
        assert!(result.is_err());
        assert_eq!(h.redirects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unauthenticated_graphql_error_triggers_redirect_but_passes_through() {
        let h = harness().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": null,
                "errors": [{
                    "message": "User is not logged in.",
                    "extensions": { "code": "UNAUTHENTICATED" }
                }]
            })))
            .mount(&h.server)
            .await;

        let response = h.client.execute(&graphql_op("notes")).await.unwrap();
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].is_unauthenticated());
        assert_eq!(h.redirects.load(Ordering::SeqCst), 1);
        assert!(matches!(
            response.into_result(),
            Err(ApiError::Graphql(_))
        ));
    }

    #[tokio::test]
    async fn non_auth_graphql_errors_pass_through_without_redirect() {
        let h = harness().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": null,
                "errors": [{
                    "message": "Variable $id is invalid.",
                    "extensions": { "code": "BAD_USER_INPUT" }
                }]
            })))
            .mount(&h.server)
            .await;

        let response = h.client.execute(&graphql_op("notes")).await.unwrap();
        assert_eq!(response.errors.len(), 1);
        assert_eq!(h.redirects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rest_operation_routes_to_rest_path() {
        let h = harness().await;

        Mock::given(method("GET"))
            .and(path("/hmis/shelters"))
            .and(header_matcher("X-Requested-With", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "id": 1 }]
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        let op = Operation::new(
            "Shelters",
            r#"query Shelters { shelters @rest(path: "/hmis/shelters") { id } }"#,
            serde_json::json!({}),
        );
        let response = h.client.execute(&op).await.unwrap();
        assert_eq!(
            response.data,
            Some(serde_json::json!({ "items": [{ "id": 1 }] }))
        );
    }

    #[tokio::test]
    async fn rest_post_sends_variables_as_json_body() {
        let h = harness().await;

        Mock::given(method("POST"))
            .and(path("/notes"))
            .and(body_partial_json(serde_json::json!({ "title": "t" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "1" })),
            )
            .expect(1)
            .mount(&h.server)
            .await;

        let op = Operation::new(
            "CreateNote",
            r#"mutation CreateNote { createNote @rest(path: "/notes", method: "POST") { id } }"#,
            serde_json::json!({ "title": "t" }),
        );
        h.client.execute(&op).await.unwrap();
    }

    #[tokio::test]
    async fn session_cookie_is_attached_when_present() {
        let h = harness().await;
        h.store.set_session("sess-1".to_string(), None);
        h.store.set_csrf_token("tok".to_string());

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header_matcher("cookie", "sessionid=sess-1; csrftoken=tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "ok": true }
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        h.client.execute(&graphql_op("ok")).await.unwrap();
    }
}
