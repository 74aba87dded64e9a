//! API microversion negotiation
//!
//! [`VersionNegotiator`] owns the version a client speaks and why it speaks it.
//! It consults the range a server advertises (through a [`VersionDiscovery`]
//! implementation) whenever the client asks for `latest` or a candidate list,
//! or when a server rejects the current version with `406 Not Acceptable`.
//!
//! Once a version has been agreed upon the negotiator is in the
//! [`VersionSelectState::Negotiated`] state for good. A further negotiation
//! attempt in that state means the operation itself is unsupported, and is
//! reported as [`IronicError::UnsupportedVersion`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{ServerKey, VersionCache};
use crate::error::{IronicError, Result};
use crate::session::Response;
use crate::version::{
    ApiVersion, LATEST_KNOWN_VERSION, MAX_VERSION_HEADER, MIN_VERSION_HEADER, RequestedVersion,
    VersionSelectState,
};

/// How a negotiator reaches the server
#[async_trait]
pub trait VersionDiscovery: Send + Sync {
    /// Minimal GET against `/v<major>`, sent without a version header
    async fn make_discovery_request(&self, major: u32) -> Result<Response>;

    /// Advertised `(minimum, maximum)` versions, as sent by the server
    fn parse_version_headers(&self, response: &Response) -> (Option<String>, Option<String>) {
        (
            response.header(MIN_VERSION_HEADER).map(ToString::to_string),
            response.header(MAX_VERSION_HEADER).map(ToString::to_string),
        )
    }
}

#[derive(Debug, Clone)]
struct State {
    requested: RequestedVersion,
    select_state: VersionSelectState,
}

/// Version negotiation state machine for one client
#[derive(Debug)]
pub struct VersionNegotiator {
    state: RwLock<State>,
    cache: Option<Arc<VersionCache>>,
    server: Option<ServerKey>,
}

impl VersionNegotiator {
    pub fn new(requested: RequestedVersion, select_state: VersionSelectState) -> Self {
        Self {
            state: RwLock::new(State {
                requested,
                select_state,
            }),
            cache: None,
            server: None,
        }
    }

    /// Persist negotiated versions for `server` in `cache`
    ///
    /// Nothing is written when `server` is `None`.
    pub fn with_cache(mut self, cache: Arc<VersionCache>, server: Option<ServerKey>) -> Self {
        self.cache = Some(cache);
        self.server = server;
        self
    }

    pub fn requested(&self) -> RequestedVersion {
        self.state.read().requested.clone()
    }

    pub fn select_state(&self) -> VersionSelectState {
        self.state.read().select_state
    }

    pub fn is_negotiated(&self) -> bool {
        self.select_state() == VersionSelectState::Negotiated
    }

    /// Whether the server must be asked before the next request is sent
    pub fn must_negotiate(&self) -> bool {
        let state = self.state.read();
        state.select_state == VersionSelectState::User && state.requested.requires_discovery()
    }

    /// Value for the version request header, if the current version has one
    pub fn header_value(&self) -> Option<String> {
        self.state.read().requested.header_value()
    }

    /// The version currently held, in its display form
    pub fn current_version(&self) -> String {
        self.state.read().requested.to_string()
    }

    /// Agree on a version with the server
    ///
    /// `response` is the `406` that triggered negotiation, if any; without one
    /// the server is asked directly. `request_version` is the version header the
    /// rejected request carried, which identifies per-call overrides.
    pub async fn negotiate(
        &self,
        discovery: &dyn VersionDiscovery,
        response: Option<&Response>,
        request_version: Option<&str>,
    ) -> Result<ApiVersion> {
        let snapshot = self.state.read().clone();

        let (min, max) = match response {
            Some(response) => discovery.parse_version_headers(response),
            None => {
                let response = discovery
                    .make_discovery_request(snapshot.requested.major())
                    .await?;
                discovery.parse_version_headers(&response)
            }
        };

        // Error responses from older servers can omit the range
        let (min, max) = match (min, max) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                debug!("Version range missing from response, asking the server directly");
                let response = discovery
                    .make_discovery_request(snapshot.requested.major())
                    .await?;
                match discovery.parse_version_headers(&response) {
                    (Some(min), Some(max)) => (min, max),
                    _ => {
                        return Err(IronicError::UnsupportedVersion(
                            "The server does not advertise the API versions it supports"
                                .to_string(),
                        ));
                    }
                }
            }
        };

        let min: ApiVersion = min.parse()?;
        let mut max: ApiVersion = max.parse()?;
        if max > LATEST_KNOWN_VERSION {
            debug!(
                "Server supports API version {}, capping at {}",
                max, LATEST_KNOWN_VERSION
            );
            max = LATEST_KNOWN_VERSION;
        }

        let nominal = snapshot.requested.header_value();
        let overridden = snapshot.select_state == VersionSelectState::Negotiated
            && request_version.is_some_and(|sent| Some(sent) != nominal.as_deref());

        let contradiction = snapshot.select_state == VersionSelectState::User
            && !snapshot.requested.requires_discovery();
        if contradiction || overridden {
            let requested = match request_version {
                Some(sent) if overridden => sent.to_string(),
                _ => snapshot.requested.to_string(),
            };
            return Err(IronicError::UnsupportedVersion(format!(
                "Requested API version {requested} is not supported by the server, client, \
                 or the requested operation is not supported by the requested version. \
                 Supported version range is {min} to {max}"
            )));
        }

        if snapshot.select_state == VersionSelectState::Negotiated {
            return Err(IronicError::UnsupportedVersion(format!(
                "No API version was specified or the requested operation was not supported \
                 by the client's negotiated API version {}. Supported version range is: \
                 {min} to {max}",
                snapshot.requested
            )));
        }

        let negotiated = match &snapshot.requested {
            RequestedVersion::Pinned(version) => (*version).min(max),
            RequestedVersion::Latest => max,
            RequestedVersion::AnyOf(candidates) => candidates
                .iter()
                .copied()
                .filter(|v| *v >= min && *v <= max)
                .max()
                .ok_or_else(|| {
                    IronicError::UnsupportedVersion(format!(
                        "None of the requested API versions {} are supported by the server. \
                         Supported version range is {min} to {max}",
                        snapshot.requested
                    ))
                })?,
        }
        .max(min);

        {
            let mut state = self.state.write();
            state.requested = RequestedVersion::Pinned(negotiated);
            state.select_state = VersionSelectState::Negotiated;
        }
        debug!("Negotiated API version {}", negotiated);

        if let (Some(cache), Some(server)) = (&self.cache, &self.server) {
            if let Err(e) = cache.save(server, &negotiated.to_string()) {
                warn!("Failed to cache API version for {}: {}", server, e);
            }
        }

        Ok(negotiated)
    }
}
