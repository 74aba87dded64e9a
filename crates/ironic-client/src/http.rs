//! HTTP client for the Bare Metal API
//!
//! [`HttpClient`] turns a logical call into a versioned, retried HTTP exchange:
//! it negotiates the microversion before the first request when the caller
//! asked for `latest` or a candidate list, renegotiates when the server answers
//! `406 Not Acceptable`, follows permanent and temporary redirects, and converts
//! error statuses into [`HttpError`] values.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{
    ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION, USER_AGENT,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::cache::{ServerKey, VersionCache};
use crate::config::ClientConfig;
use crate::error::{HttpError, IronicError, REQUEST_ID_HEADER, Result};
use crate::negotiation::{VersionDiscovery, VersionNegotiator};
use crate::retry::{Attempt, RetryBudget};
use crate::session::{EndpointFilter, Response, Session, SessionRequest, join_url};
use crate::version::{
    API_VERSION_HEADER, ApiVersion, DEFAULT_VERSION, RequestedVersion, VersionSelectState,
};

/// Header carrying the session token
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Redirects followed for a single request before giving up
pub const MAX_REDIRECTS: usize = 10;

const JSON_CONTENT_TYPE: &str = "application/json";
const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

const USER_AGENT_VALUE: &str = concat!("ironic-client/", env!("CARGO_PKG_VERSION"));

/// Strip a trailing slash and API version segment from an endpoint
pub fn trim_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((base, segment))
            if base.contains("://")
                && segment.len() > 1
                && segment.starts_with('v')
                && segment[1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            base.trim_end_matches('/').to_string()
        }
        _ => trimmed.to_string(),
    }
}

/// Builder for [`HttpClient`]
pub struct HttpClientBuilder {
    session: Arc<dyn Session>,
    endpoint_override: Option<String>,
    endpoint_filter: EndpointFilter,
    api_version: Option<RequestedVersion>,
    select_state: Option<VersionSelectState>,
    retry: RetryBudget,
    cache: Option<Arc<VersionCache>>,
    use_global_cache: bool,
    additional_headers: BTreeMap<String, String>,
    global_request_id: Option<String>,
}

impl HttpClientBuilder {
    fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            endpoint_override: None,
            endpoint_filter: EndpointFilter::default(),
            api_version: None,
            select_state: None,
            retry: RetryBudget::default(),
            cache: None,
            use_global_cache: true,
            additional_headers: BTreeMap::new(),
            global_request_id: None,
        }
    }

    /// Talk to `endpoint` instead of asking the session for one
    #[must_use]
    pub fn endpoint_override(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn endpoint_filter(mut self, filter: EndpointFilter) -> Self {
        self.endpoint_filter = filter;
        self
    }

    /// Version requested by the caller; the select state becomes `user`
    #[must_use]
    pub fn api_version(mut self, version: impl Into<RequestedVersion>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Select state for an explicitly requested version
    ///
    /// Ignored unless [`api_version`](Self::api_version) is set.
    #[must_use]
    pub fn select_state(mut self, state: VersionSelectState) -> Self {
        self.select_state = Some(state);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryBudget) -> Self {
        self.retry = retry;
        self
    }

    /// Use `cache` instead of the process-wide version cache
    #[must_use]
    pub fn version_cache(mut self, cache: Arc<VersionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Neither read nor write negotiated versions
    #[must_use]
    pub fn without_version_cache(mut self) -> Self {
        self.cache = None;
        self.use_global_cache = false;
        self
    }

    #[must_use]
    pub fn additional_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn global_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.global_request_id = Some(request_id.into());
        self
    }

    /// Apply everything a [`ClientConfig`] carries
    #[must_use]
    pub fn config(mut self, config: &ClientConfig) -> Self {
        if let Some(ref endpoint) = config.endpoint_override {
            self.endpoint_override = Some(endpoint.clone());
        }
        if let Some(ref version) = config.api_version {
            self.api_version = Some(version.clone());
        }
        if let Some(ref request_id) = config.global_request_id {
            self.global_request_id = Some(request_id.clone());
        }
        self.endpoint_filter = config.endpoint_filter();
        self.retry = config.retry;
        self.additional_headers
            .extend(config.additional_headers.clone());
        self
    }

    /// Resolve the endpoint and starting version, then build the client
    pub async fn build(self) -> Result<HttpClient> {
        let endpoint = match self.endpoint_override {
            Some(ref endpoint) => endpoint.clone(),
            None => self
                .session
                .get_endpoint(&self.endpoint_filter)
                .await?
                .ok_or_else(|| {
                    IronicError::EndpointNotFound(format!(
                        "Could not find the {} endpoint (interface {}, region {})",
                        self.endpoint_filter.service_type,
                        self.endpoint_filter.interface,
                        self.endpoint_filter.region_name.as_deref().unwrap_or("any")
                    ))
                })?,
        };
        let endpoint = trim_endpoint(&endpoint);
        url::Url::parse(&endpoint)?;

        let server = match self.endpoint_override {
            Some(ref endpoint) => Some(ServerKey::from_url(endpoint)?),
            None => None,
        };

        let cache = match self.cache {
            Some(cache) => Some(cache),
            None if self.use_global_cache => match VersionCache::global() {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("Version cache unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        let (requested, select_state) = match self.api_version {
            Some(version) => (
                version,
                self.select_state.unwrap_or(VersionSelectState::User),
            ),
            None => Self::starting_version(cache.as_deref(), server.as_ref()),
        };
        debug!(
            "Using {} API version {} against {}",
            select_state, requested, endpoint
        );

        let mut negotiator = VersionNegotiator::new(requested, select_state);
        if let Some(cache) = cache {
            negotiator = negotiator.with_cache(cache, server);
        }

        let mut additional_headers = HeaderMap::new();
        for (name, value) in &self.additional_headers {
            additional_headers.insert(
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    IronicError::Validation(format!("Invalid header name '{name}': {e}"))
                })?,
                header_value(value)?,
            );
        }

        let global_request_id = self
            .global_request_id
            .as_deref()
            .map(header_value)
            .transpose()?;

        Ok(HttpClient {
            session: self.session,
            endpoint,
            endpoint_filter: self.endpoint_filter,
            negotiator,
            negotiation_lock: Mutex::new(()),
            retry: self.retry.resolved(),
            additional_headers,
            global_request_id,
        })
    }

    fn starting_version(
        cache: Option<&VersionCache>,
        server: Option<&ServerKey>,
    ) -> (RequestedVersion, VersionSelectState) {
        let cached = match (cache, server) {
            (Some(cache), Some(server)) => cache.retrieve(server),
            _ => None,
        };

        match cached.map(|v| v.parse::<ApiVersion>()) {
            Some(Ok(version)) => (RequestedVersion::Pinned(version), VersionSelectState::Cached),
            Some(Err(e)) => {
                warn!("Ignoring unusable cached API version: {}", e);
                (
                    RequestedVersion::Pinned(DEFAULT_VERSION),
                    VersionSelectState::Default,
                )
            }
            None => (
                RequestedVersion::Pinned(DEFAULT_VERSION),
                VersionSelectState::Default,
            ),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| IronicError::Validation(format!("Invalid header value '{value}': {e}")))
}

/// Versioned, retrying client for the Bare Metal API
pub struct HttpClient {
    session: Arc<dyn Session>,
    endpoint: String,
    endpoint_filter: EndpointFilter,
    negotiator: VersionNegotiator,
    negotiation_lock: Mutex<()>,
    retry: RetryBudget,
    additional_headers: HeaderMap,
    global_request_id: Option<HeaderValue>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("endpoint", &self.endpoint)
            .field("negotiator", &self.negotiator)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn builder(session: Arc<dyn Session>) -> HttpClientBuilder {
        HttpClientBuilder::new(session)
    }

    /// Endpoint requests are sent to, without a version segment
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn current_api_version(&self) -> String {
        self.negotiator.current_version()
    }

    pub fn is_api_version_negotiated(&self) -> bool {
        self.negotiator.is_negotiated()
    }

    pub fn select_state(&self) -> VersionSelectState {
        self.negotiator.select_state()
    }

    pub fn retry_budget(&self) -> RetryBudget {
        self.retry
    }

    /// Negotiate now instead of on the first request
    ///
    /// A version pinned by the caller, or one already negotiated, is returned
    /// without contacting the server.
    pub async fn negotiate_api_version(&self) -> Result<String> {
        let _guard = self.negotiation_lock.lock().await;
        let pinned = self.negotiator.select_state() == VersionSelectState::User
            && !self.negotiator.must_negotiate();
        if pinned || self.negotiator.is_negotiated() {
            return Ok(self.negotiator.current_version());
        }
        let version = self.negotiator.negotiate(self, None, None).await?;
        Ok(version.to_string())
    }

    /// Send a JSON request and decode a JSON response
    ///
    /// Responses without content, or without a content type, decode to an
    /// empty array. A non-JSON body, or JSON that fails to decode, yields
    /// [`Value::Null`].
    pub async fn json_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: Option<HeaderMap>,
    ) -> Result<(Response, Value)> {
        let mut headers = headers.unwrap_or_default();
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static(JSON_CONTENT_TYPE));

        let body = body.map(serde_json::to_vec).transpose()?.map(Bytes::from);
        let response = self.send(method, url, headers, body).await?;

        let status = response.status_code();
        let value = match response.content_type() {
            _ if status == 204 || status == 205 => Value::Array(Vec::new()),
            None => Value::Array(Vec::new()),
            Some(content_type) if content_type.contains(JSON_CONTENT_TYPE) => {
                match response.json() {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Could not decode response body as JSON: {}", e);
                        Value::Null
                    }
                }
            }
            Some(_) => Value::Null,
        };

        Ok((response, value))
    }

    /// Send a request and return the body untouched
    pub async fn raw_request(
        &self,
        method: Method,
        url: &str,
        headers: Option<HeaderMap>,
    ) -> Result<(Response, Bytes)> {
        let mut headers = headers.unwrap_or_default();
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static(OCTET_STREAM_CONTENT_TYPE));

        let response = self.send(method, url, headers, None).await?;
        let content = response.content().clone();
        Ok((response, content))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Response> {
        let (method, headers, body) = (&method, &headers, body.as_ref());
        self.retry
            .execute(move |_| async move {
                Attempt::from(self.send_once(method, url, headers, body).await)
            })
            .await
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        call_headers: &HeaderMap,
        body: Option<&Bytes>,
    ) -> Result<Response> {
        if self.negotiator.must_negotiate() {
            let _guard = self.negotiation_lock.lock().await;
            if self.negotiator.must_negotiate() {
                self.negotiator.negotiate(self, None, None).await?;
            }
        }

        let per_call_version = call_headers.contains_key(API_VERSION_HEADER);
        let mut headers = self.request_headers(call_headers)?;
        let mut target = url.to_string();
        let mut redirects = 0;

        loop {
            let mut request = SessionRequest::new(method.clone(), target.clone());
            request.headers = headers.clone();
            request.body = body.cloned();
            request.endpoint_filter = self.endpoint_filter.clone();
            request.endpoint_override = Some(self.endpoint.clone());

            let response = self.session.request(request).await?;
            match response.status_code() {
                406 => {
                    let version = self
                        .renegotiate(&response, &headers, per_call_version)
                        .await?;
                    debug!("Resending {} {} with API version {}", method, target, version);
                    headers.insert(API_VERSION_HEADER, header_value(&version)?);
                }
                301 | 302 | 305 if redirects < MAX_REDIRECTS => {
                    let Some(location) = response.header(LOCATION.as_str()) else {
                        return Err(HttpError::from_response(&response, method.as_str(), &target)
                            .with_message("Redirect without a Location header")
                            .into());
                    };
                    let next = url::Url::parse(&target)
                        .or_else(|_| url::Url::parse(&join_url(&self.endpoint, &target)))?
                        .join(location)?;
                    debug!("Following redirect from {} to {}", target, next);
                    target = next.into();
                    redirects += 1;
                }
                // 300 and exhausted redirects land here too
                status if status >= 400 || matches!(status, 300 | 301 | 302 | 305) => {
                    return Err(HttpError::from_response(&response, method.as_str(), &target).into());
                }
                _ => return Ok(response),
            }
        }
    }

    async fn renegotiate(
        &self,
        response: &Response,
        sent: &HeaderMap,
        per_call_version: bool,
    ) -> Result<String> {
        let _guard = self.negotiation_lock.lock().await;
        let sent_version = sent.get(API_VERSION_HEADER).and_then(|v| v.to_str().ok());

        // Another request negotiated while this one was in flight
        if !per_call_version && self.negotiator.is_negotiated() {
            if let Some(current) = self.negotiator.header_value() {
                if sent_version != Some(current.as_str()) {
                    return Ok(current);
                }
            }
        }

        let version = self
            .negotiator
            .negotiate(self, Some(response), sent_version)
            .await?;
        Ok(version.to_string())
    }

    fn request_headers(&self, call_headers: &HeaderMap) -> Result<HeaderMap> {
        let mut headers = call_headers.clone();

        if !headers.contains_key(API_VERSION_HEADER) {
            if let Some(version) = self.negotiator.header_value() {
                headers.insert(API_VERSION_HEADER, header_value(&version)?);
            }
        }
        self.insert_auth(&mut headers)?;
        for (name, value) in &self.additional_headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(ref request_id) = self.global_request_id {
            headers
                .entry(REQUEST_ID_HEADER)
                .or_insert_with(|| request_id.clone());
        }

        Ok(headers)
    }

    fn insert_auth(&self, headers: &mut HeaderMap) -> Result<()> {
        if let Some(token) = self.session.auth_token() {
            if !headers.contains_key(AUTH_TOKEN_HEADER) {
                let mut value = header_value(&token)?;
                value.set_sensitive(true);
                headers.insert(AUTH_TOKEN_HEADER, value);
            }
        }
        headers
            .entry(USER_AGENT)
            .or_insert(HeaderValue::from_static(USER_AGENT_VALUE));
        Ok(())
    }
}

#[async_trait]
impl VersionDiscovery for HttpClient {
    async fn make_discovery_request(&self, major: u32) -> Result<Response> {
        let url = format!("/v{major}");
        let mut request = SessionRequest::new(Method::GET, url.clone());
        self.insert_auth(&mut request.headers)?;
        request.endpoint_filter = self.endpoint_filter.clone();
        request.endpoint_override = Some(self.endpoint.clone());

        debug!("Discovering supported API versions at {}", url);
        let response = self.session.request(request).await?;
        if response.status_code() >= 400 && response.status_code() != 406 {
            return Err(HttpError::from_response(&response, "GET", &url).into());
        }
        Ok(response)
    }
}
