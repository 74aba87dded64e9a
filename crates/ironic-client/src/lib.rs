//! # ironic-client - Bare Metal API transport and microversion negotiation
//!
//! This crate implements the HTTP layer of a client for OpenStack Ironic, the
//! bare metal provisioning service. It turns logical operations into versioned,
//! retried HTTP exchanges and works out which API microversion to speak with a
//! server without the caller having to know it in advance.
//!
//! ## Architecture Overview
//!
//! 1. **Session** ([`Session`], [`ReqwestSession`]): transport and credentials
//! 2. **HTTP Client** ([`HttpClient`]): headers, endpoint handling, redirects,
//!    error classification and the retry loop
//! 3. **Negotiation** ([`VersionNegotiator`]): picks the microversion from the
//!    range a server advertises, on first use or after `406 Not Acceptable`
//! 4. **Version Cache** ([`VersionCache`]): remembers negotiated versions per
//!    `host:port` so later clients start from a known-good version
//! 5. **Resources** ([`ResourceManager`]): thin CRUD helpers over the client
//!
//! ## Requesting a version
//!
//! | Requested          | Select state | Behavior                                  |
//! |--------------------|--------------|-------------------------------------------|
//! | `1.31`             | `user`       | Sent as-is, never negotiated              |
//! | `latest` or a list | `user`       | Negotiated before the first request       |
//! | nothing, cache hit | `cached`     | Cached version, renegotiated on `406`     |
//! | nothing            | `default`    | [`DEFAULT_VERSION`], renegotiated on `406`|
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ironic_client::{HttpClient, ReqwestSession, RequestedVersion, ResourceKind, ResourceManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Arc::new(ReqwestSession::from_env()?);
//!     let client = HttpClient::builder(session)
//!         .endpoint_override("http://ironic.example.com:6385")
//!         .api_version(RequestedVersion::Latest)
//!         .build()
//!         .await?;
//!
//!     let nodes = ResourceManager::new(Arc::new(client), ResourceKind::Node);
//!     for node in nodes.list(None, None).await? {
//!         println!("{}", node["uuid"]);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Environment
//!
//! - `IRONICCLIENT_CACHE_EXPIRY`: version cache entry lifetime in seconds
//! - `OS_ENDPOINT`, `OS_TOKEN`, `OS_AUTH_TYPE`: see [`SessionConfig::from_env`]
//! - `OS_BAREMETAL_API_VERSION`, `IRONIC_MAX_RETRIES`, `IRONIC_RETRY_INTERVAL`:
//!   see [`ClientConfig::from_env`]

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod negotiation;
pub mod resource;
pub mod retry;
pub mod session;
pub mod version;

pub use cache::{CacheError, ServerKey, VersionCache};
pub use config::{ClientConfig, SessionConfig};
pub use error::{HttpError, HttpErrorKind, IronicError, Result};
pub use http::{HttpClient, HttpClientBuilder};
pub use negotiation::{VersionDiscovery, VersionNegotiator};
pub use resource::{ResourceKind, ResourceManager};
pub use retry::{Attempt, RetryBudget};
pub use session::{EndpointFilter, ReqwestSession, Response, Session, SessionRequest};
pub use version::{
    API_VERSION_HEADER, ApiVersion, DEFAULT_VERSION, LATEST_KNOWN_VERSION, RequestedVersion,
    VersionSelectState,
};
