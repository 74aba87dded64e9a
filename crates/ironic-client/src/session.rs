//! Authenticated session abstraction
//!
//! [`HttpClient`](crate::HttpClient) never talks to reqwest directly. It sends
//! every request through a [`Session`], which knows how to reach the service and
//! which credentials to present. [`ReqwestSession`] covers token and no-auth
//! deployments; anything else (a Keystone-backed session, a test double) only
//! has to implement the trait.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::error::{IronicError, Result};

/// Service type Ironic registers in the service catalog
pub const SERVICE_TYPE: &str = "baremetal";

/// Default catalog interface
pub const DEFAULT_INTERFACE: &str = "public";

/// Service catalog filter used to locate the endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFilter {
    pub service_type: String,
    pub interface: String,
    pub region_name: Option<String>,
}

impl Default for EndpointFilter {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            interface: DEFAULT_INTERFACE.to_string(),
            region_name: None,
        }
    }
}

/// A single request handed to a [`Session`]
///
/// `url` is either absolute or a path relative to `endpoint_override` (or, when
/// that is absent, to the endpoint the session resolves from `endpoint_filter`).
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub endpoint_filter: EndpointFilter,
    pub endpoint_override: Option<String>,
}

impl SessionRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            endpoint_filter: EndpointFilter::default(),
            endpoint_override: None,
        }
    }
}

/// A fully received HTTP response
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    content: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, content: Bytes) -> Self {
        Self {
            status,
            headers,
            content,
        }
    }

    /// Drain a reqwest response into memory
    pub async fn from_reqwest(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let content = response.bytes().await?;
        Ok(Self::new(status, headers, content))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value by case-insensitive name, if present and valid text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.content)?)
    }
}

/// Transport and credentials for reaching the service
#[async_trait]
pub trait Session: Send + Sync {
    /// Send a request; error statuses are returned as responses, not errors
    async fn request(&self, request: SessionRequest) -> Result<Response>;

    /// Endpoint matching `filter`, if the session knows one
    async fn get_endpoint(&self, filter: &EndpointFilter) -> Result<Option<String>>;

    /// Token to present in `X-Auth-Token`, if any
    fn auth_token(&self) -> Option<String> {
        None
    }
}

static CRYPTO_PROVIDER: OnceLock<()> = OnceLock::new();

/// Install the ring provider for rustls once per process
pub(crate) fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.get_or_init(|| {
        // Another component may already have installed one
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Session backed by a reqwest client and an optional static token
///
/// The endpoint comes from configuration rather than a service catalog.
/// Redirects are not followed here; the HTTP client handles them itself.
#[derive(Debug, Clone)]
pub struct ReqwestSession {
    client: Client,
    endpoint: Option<String>,
    token: Option<String>,
}

impl ReqwestSession {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        ensure_crypto_provider();
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self::with_client(
            client,
            config.endpoint.clone(),
            config.token.clone(),
        ))
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: Client, endpoint: Option<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            token,
        }
    }

    /// Build from [`SessionConfig::from_env`]
    pub fn from_env() -> Result<Self> {
        Self::new(&SessionConfig::from_env()?)
    }

    fn resolve_url(&self, request: &SessionRequest) -> Result<String> {
        if request.url.starts_with("http://") || request.url.starts_with("https://") {
            return Ok(request.url.clone());
        }

        let base = request
            .endpoint_override
            .as_deref()
            .or(self.endpoint.as_deref())
            .ok_or_else(|| {
                IronicError::EndpointNotFound(format!(
                    "no endpoint to resolve '{}' against",
                    request.url
                ))
            })?;

        Ok(join_url(base, &request.url))
    }
}

/// Join a base URL and a path without doubling or dropping the separator
pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[async_trait]
impl Session for ReqwestSession {
    async fn request(&self, request: SessionRequest) -> Result<Response> {
        let url = self.resolve_url(&request)?;
        debug!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method, &url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        trace!("Response status: {}", response.status());
        Response::from_reqwest(response).await
    }

    async fn get_endpoint(&self, _filter: &EndpointFilter) -> Result<Option<String>> {
        Ok(self.endpoint.clone())
    }

    fn auth_token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> Client {
        ensure_crypto_provider();
        Client::new()
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h:6385", "/v1/nodes"), "http://h:6385/v1/nodes");
        assert_eq!(join_url("http://h:6385/", "/v1/nodes"), "http://h:6385/v1/nodes");
        assert_eq!(join_url("http://h:6385", "v1"), "http://h:6385/v1");
        assert_eq!(join_url("http://h:6385/", ""), "http://h:6385");
    }

    #[test]
    fn test_response_accessors() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let response = Response::new(StatusCode::OK, headers, Bytes::from_static(b"{\"a\": 1}"));

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.content_type(), Some("application/json"));

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_relative_url_without_endpoint_is_rejected() {
        let session = ReqwestSession::with_client(test_client(), None, None);
        let err = session
            .resolve_url(&SessionRequest::new(Method::GET, "/v1"))
            .unwrap_err();
        assert!(matches!(err, IronicError::EndpointNotFound(_)));
    }

    #[tokio::test]
    async fn test_request_uses_override_and_forwards_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/nodes"))
            .and(header("x-test", "yes"))
            .and(body_string("{}"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let session = ReqwestSession::with_client(
            test_client(),
            Some("http://unused.invalid".to_string()),
            None,
        );
        let mut request = SessionRequest::new(Method::POST, "/v1/nodes");
        request.headers.insert("x-test", HeaderValue::from_static("yes"));
        request.body = Some(Bytes::from_static(b"{}"));
        request.endpoint_override = Some(mock_server.uri());

        let response = session.request(request).await.unwrap();
        assert_eq!(response.status_code(), 201);
        assert_eq!(response.content().as_ref(), b"created");
    }

    #[tokio::test]
    async fn test_error_status_is_not_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let session = ReqwestSession::with_client(test_client(), Some(mock_server.uri()), None);
        let response = session
            .request(SessionRequest::new(Method::GET, "/v1"))
            .await
            .unwrap();
        assert_eq!(response.status_code(), 500);
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        // Bind and drop a listener to get a port nobody is listening on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let session =
            ReqwestSession::with_client(test_client(), Some(format!("http://{addr}")), None);
        let err = session
            .request(SessionRequest::new(Method::GET, "/v1"))
            .await
            .unwrap_err();

        assert!(err.is_retriable(), "unexpected error: {err:?}");
    }
}
