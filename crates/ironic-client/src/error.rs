//! Error types for Ironic client operations
//!
//! HTTP failures are turned into [`HttpError`] values by [`HttpError::from_response`],
//! which picks an [`HttpErrorKind`] from a fixed status-code catalog and pulls the
//! server's fault message and request id out of the response.

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::cache::CacheError;
use crate::session::Response;

/// Header carrying the request id assigned by the service
pub const REQUEST_ID_HEADER: &str = "x-openstack-request-id";

/// Request id header sent by older services
pub const LEGACY_REQUEST_ID_HEADER: &str = "x-compute-request-id";

#[derive(Debug, Error)]
pub enum IronicError {
    #[error("{0}")]
    Http(Box<HttpError>),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Unsupported API version: {0}")]
    UnsupportedVersion(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Ambiguous authentication: {0}")]
    AmbiguousAuth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid API version '{0}', expected <major>.<minor>")]
    InvalidVersion(String),

    #[error("Invalid API version select state '{0}'")]
    InvalidSelectState(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl IronicError {
    /// Check if the failure is transient and the request may be sent again
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectionRefused(_) | Self::ConnectionFailure(_) => true,
            Self::Http(e) => matches!(
                e.kind(),
                HttpErrorKind::Conflict | HttpErrorKind::ServiceUnavailable
            ),
            _ => false,
        }
    }

    /// HTTP status for status-derived errors
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => Some(e.http_status()),
            _ => None,
        }
    }

    /// The classified HTTP error, if this is one
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Self::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HttpError> for IronicError {
    fn from(err: HttpError) -> Self {
        Self::Http(Box::new(err))
    }
}

impl From<reqwest::Error> for IronicError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            if refused(&err) {
                Self::ConnectionRefused(err.to_string())
            } else {
                Self::ConnectionFailure(err.to_string())
            }
        } else {
            Self::Transport(err)
        }
    }
}

fn refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = e.source();
    }
    false
}

pub type Result<T> = std::result::Result<T, IronicError>;

/// Error kinds derived from HTTP status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    MultipleChoices,
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeout,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    RequestEntityTooLarge,
    RequestUriTooLong,
    UnsupportedMediaType,
    RequestedRangeNotSatisfiable,
    ExpectationFailed,
    UnprocessableEntity,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
    /// Any other 4xx status
    ClientError,
    /// Any other 5xx status
    ServerError,
    /// Anything outside the 4xx and 5xx ranges without a catalog entry
    Other,
}

impl HttpErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            300 => Self::MultipleChoices,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            406 => Self::NotAcceptable,
            407 => Self::ProxyAuthenticationRequired,
            408 => Self::RequestTimeout,
            409 => Self::Conflict,
            410 => Self::Gone,
            411 => Self::LengthRequired,
            412 => Self::PreconditionFailed,
            413 => Self::RequestEntityTooLarge,
            414 => Self::RequestUriTooLong,
            415 => Self::UnsupportedMediaType,
            416 => Self::RequestedRangeNotSatisfiable,
            417 => Self::ExpectationFailed,
            422 => Self::UnprocessableEntity,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            505 => Self::HttpVersionNotSupported,
            s if s >= 500 => Self::ServerError,
            s if s >= 400 => Self::ClientError,
            _ => Self::Other,
        }
    }

    /// Message used when the server did not supply one
    pub const fn default_message(&self) -> &'static str {
        match self {
            Self::MultipleChoices => "Multiple Choices",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::PaymentRequired => "Payment Required",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::ProxyAuthenticationRequired => "Proxy Authentication Required",
            Self::RequestTimeout => "Request Timeout",
            Self::Conflict => "Conflict",
            Self::Gone => "Gone",
            Self::LengthRequired => "Length Required",
            Self::PreconditionFailed => "Precondition Failed",
            Self::RequestEntityTooLarge => "Request Entity Too Large",
            Self::RequestUriTooLong => "Request-URI Too Long",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::RequestedRangeNotSatisfiable => "Requested Range Not Satisfiable",
            Self::ExpectationFailed => "Expectation Failed",
            Self::UnprocessableEntity => "Unprocessable Entity",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
            Self::HttpVersionNotSupported => "HTTP Version Not Supported",
            Self::ClientError => "HTTP Client Error",
            Self::ServerError => "HTTP Server Error",
            Self::Other => "HTTP Error",
        }
    }
}

/// A failed HTTP exchange, classified by status code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    kind: HttpErrorKind,
    http_status: u16,
    message: String,
    details: Option<String>,
    request_id: Option<String>,
    url: String,
    method: String,
    retry_after: Option<u64>,
}

impl HttpError {
    /// Build an error of the kind matching `status` with the default message
    pub fn new(status: u16, method: impl Into<String>, url: impl Into<String>) -> Self {
        let kind = HttpErrorKind::from_status(status);
        Self {
            kind,
            http_status: status,
            message: kind.default_message().to_string(),
            details: None,
            request_id: None,
            url: url.into(),
            method: method.into(),
            retry_after: None,
        }
    }

    /// Classify a response into a typed error
    ///
    /// JSON bodies shaped as a single key wrapping a mapping contribute the
    /// mapping's `message` (or `faultstring`) and `details` (or `debuginfo`, or the
    /// whole body). Ironic encodes that mapping as a JSON string under
    /// `error_message`, so string values are decoded before inspection. Plain
    /// text bodies become the details verbatim.
    pub fn from_response(response: &Response, method: &str, url: &str) -> Self {
        let mut error = Self::new(response.status_code(), method, url);
        error.request_id = request_id(response);

        if let Some(retry_after) = response.header(RETRY_AFTER.as_str()) {
            error.retry_after = Some(retry_after.trim().parse().unwrap_or(0));
        }

        let content_type = response
            .header(CONTENT_TYPE.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = String::from_utf8_lossy(response.content());

        if content_type.contains("json") {
            if let Some((message, details)) = extract_fault(&body) {
                if let Some(message) = message {
                    error.message = message;
                }
                error.details = Some(details);
            }
        } else if content_type.starts_with("text/") {
            error.details = Some(body.into_owned());
        }

        error
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Seconds from the `Retry-After` header; 0 when present but unparseable
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (HTTP {})", self.message, self.http_status)?;
        if let Some(ref request_id) = self.request_id {
            write!(f, " (Request-ID: {request_id})")?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}

/// The preferred header wins whenever it is present and non-empty
fn request_id(response: &Response) -> Option<String> {
    [REQUEST_ID_HEADER, LEGACY_REQUEST_ID_HEADER]
        .into_iter()
        .filter_map(|name| response.header(name))
        .find(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn extract_fault(body: &str) -> Option<(Option<String>, String)> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return None;
    };
    if map.len() != 1 {
        return None;
    }

    let inner = match map.into_iter().next() {
        Some((_, Value::String(encoded))) => serde_json::from_str::<Value>(&encoded).ok()?,
        Some((_, value)) => value,
        None => return None,
    };
    let Value::Object(fault) = inner else {
        return None;
    };

    let text = |key: &str| {
        fault
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };

    let message = text("message").or_else(|| text("faultstring"));
    let details = text("details")
        .or_else(|| text("debuginfo"))
        .unwrap_or_else(|| body.to_string());

    Some((message, details))
}
