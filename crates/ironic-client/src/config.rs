//! Configuration structures for sessions and clients

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{IronicError, Result};
use crate::retry::RetryBudget;
use crate::session::{DEFAULT_INTERFACE, EndpointFilter, SERVICE_TYPE};
use crate::version::RequestedVersion;

/// Settings for [`ReqwestSession`](crate::ReqwestSession)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the Bare Metal API
    pub endpoint: Option<String>,

    /// Token sent as `X-Auth-Token`; `None` for no-auth deployments
    pub token: Option<String>,

    /// Request timeout
    pub request_timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Create configuration from environment variables
    ///
    /// A token (`OS_TOKEN`) is required unless `OS_AUTH_TYPE` is `none`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("OS_TOKEN").ok().filter(|t| !t.is_empty());
        let auth_type = std::env::var("OS_AUTH_TYPE").ok();
        Self::validate_auth(token.as_deref(), auth_type.as_deref())?;

        Ok(Self {
            endpoint: std::env::var("OS_ENDPOINT").ok().filter(|e| !e.is_empty()),
            token,
            request_timeout: Duration::from_secs(
                std::env::var("IRONIC_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            connect_timeout: Duration::from_secs(
                std::env::var("IRONIC_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        })
    }

    fn validate_auth(token: Option<&str>, auth_type: Option<&str>) -> Result<()> {
        match (token, auth_type) {
            (Some(_), Some("none")) => Err(IronicError::AmbiguousAuth(
                "A token was supplied together with OS_AUTH_TYPE=none".to_string(),
            )),
            (Some(_), _) | (None, Some("none")) => Ok(()),
            (None, _) => Err(IronicError::AmbiguousAuth(
                "Must provide a token (OS_TOKEN) or disable authentication (OS_AUTH_TYPE=none)"
                    .to_string(),
            )),
        }
    }
}

/// Settings for [`HttpClient`](crate::HttpClient)
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Base URL bypassing endpoint discovery
    pub endpoint_override: Option<String>,

    /// Version to speak; `None` uses a cached or default version
    pub api_version: Option<RequestedVersion>,

    /// Retry budget for transient failures
    pub retry: RetryBudget,

    /// Region used when looking up the endpoint
    pub region_name: Option<String>,

    /// Catalog interface used when looking up the endpoint
    pub interface: Option<String>,

    /// Sent as `X-OpenStack-Request-ID` on every request
    pub global_request_id: Option<String>,

    /// Extra headers for every request; per-call headers take precedence
    pub additional_headers: BTreeMap<String, String>,
}

impl ClientConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_version = match std::env::var("OS_BAREMETAL_API_VERSION") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.parse()?),
            _ => None,
        };

        Ok(Self {
            endpoint_override: std::env::var("OS_ENDPOINT").ok().filter(|e| !e.is_empty()),
            api_version,
            retry: RetryBudget {
                max_retries: std::env::var("IRONIC_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                retry_interval: std::env::var("IRONIC_RETRY_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_secs),
            },
            region_name: std::env::var("OS_REGION_NAME").ok(),
            interface: std::env::var("OS_INTERFACE").ok(),
            global_request_id: None,
            additional_headers: BTreeMap::new(),
        })
    }

    /// Catalog filter derived from region and interface
    pub fn endpoint_filter(&self) -> EndpointFilter {
        EndpointFilter {
            service_type: SERVICE_TYPE.to_string(),
            interface: self
                .interface
                .clone()
                .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
            region_name: self.region_name.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.endpoint, None);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_auth_validation() {
        assert!(SessionConfig::validate_auth(Some("tok"), None).is_ok());
        assert!(SessionConfig::validate_auth(Some("tok"), Some("token")).is_ok());
        assert!(SessionConfig::validate_auth(None, Some("none")).is_ok());
        assert!(matches!(
            SessionConfig::validate_auth(None, None),
            Err(IronicError::AmbiguousAuth(_))
        ));
        assert!(matches!(
            SessionConfig::validate_auth(None, Some("password")),
            Err(IronicError::AmbiguousAuth(_))
        ));
        assert!(matches!(
            SessionConfig::validate_auth(Some("tok"), Some("none")),
            Err(IronicError::AmbiguousAuth(_))
        ));
    }

    #[test]
    fn test_endpoint_filter() {
        let config = ClientConfig {
            region_name: Some("RegionTwo".to_string()),
            ..Default::default()
        };
        let filter = config.endpoint_filter();
        assert_eq!(filter.service_type, "baremetal");
        assert_eq!(filter.interface, "public");
        assert_eq!(filter.region_name.as_deref(), Some("RegionTwo"));
    }
}
