//! API microversion types
//!
//! Ironic advertises a range of supported microversions (`major.minor`) through
//! response headers and accepts the version to speak in a request header (header
//! names are kept lowercase so they can be used directly as `HeaderName`s). This
//! module holds the comparable version type, the shapes a caller can request a
//! version in, and the provenance of the version a client currently uses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{IronicError, Result};

/// Request header carrying the microversion to speak
pub const API_VERSION_HEADER: &str = "x-openstack-ironic-api-version";

/// Response header with the minimum microversion the server supports
pub const MIN_VERSION_HEADER: &str = "x-openstack-ironic-api-minimum-version";

/// Response header with the maximum microversion the server supports
pub const MAX_VERSION_HEADER: &str = "x-openstack-ironic-api-maximum-version";

/// Major API version used in URL paths
pub const MAJOR_VERSION: u32 = 1;

/// Version used when the caller asked for nothing and nothing is cached
pub const DEFAULT_VERSION: ApiVersion = ApiVersion::new(1, 9);

/// Highest microversion this client knows how to speak
pub const LATEST_KNOWN_VERSION: ApiVersion = ApiVersion::new(MAJOR_VERSION, 78);

/// Literal accepted in place of a version to request the newest one available
pub const LATEST: &str = "latest";

/// A `major.minor` API microversion
///
/// Ordering compares the major component first, then the minor one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    major: u32,
    minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub const fn major(&self) -> u32 {
        self.major
    }

    pub const fn minor(&self) -> u32 {
        self.minor
    }
}

fn parse_component(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl FromStr for ApiVersion {
    type Err = IronicError;

    fn from_str(s: &str) -> Result<Self> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| IronicError::InvalidVersion(s.to_string()))?;

        match (parse_component(major), parse_component(minor)) {
            (Some(major), Some(minor)) => Ok(Self { major, minor }),
            _ => Err(IronicError::InvalidVersion(s.to_string())),
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The version a caller asked the client to speak
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedVersion {
    /// A single concrete version
    Pinned(ApiVersion),
    /// Whatever the server supports, capped at [`LATEST_KNOWN_VERSION`]
    Latest,
    /// The highest of these that the server supports
    AnyOf(Vec<ApiVersion>),
}

impl RequestedVersion {
    /// Build a candidate list from version strings
    ///
    /// `"latest"` cannot be mixed into a list; that is rejected here so that no
    /// request ever reaches the server with such a list.
    pub fn from_candidates<I, S>(candidates: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut versions = Vec::new();
        for candidate in candidates {
            let candidate = candidate.as_ref().trim();
            if candidate == LATEST {
                return Err(IronicError::Validation(
                    "The 'latest' API version can not be requested in a list of versions. \
                     Please explicitly request 'latest' or request only concrete versions"
                        .to_string(),
                ));
            }
            versions.push(candidate.parse()?);
        }

        if versions.is_empty() {
            return Err(IronicError::Validation(
                "At least one API version must be requested".to_string(),
            ));
        }

        Ok(Self::AnyOf(versions))
    }

    /// Whether this request can only be satisfied by asking the server
    pub fn requires_discovery(&self) -> bool {
        !matches!(self, Self::Pinned(_))
    }

    /// Value sent in [`API_VERSION_HEADER`], if this shape has one
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::Pinned(version) => Some(version.to_string()),
            Self::Latest => Some(LATEST.to_string()),
            Self::AnyOf(_) => None,
        }
    }

    /// Major version to use for discovery requests
    pub fn major(&self) -> u32 {
        match self {
            Self::Pinned(version) => version.major(),
            _ => MAJOR_VERSION,
        }
    }
}

impl FromStr for RequestedVersion {
    type Err = IronicError;

    /// Accepts `latest`, `1.31`, or a comma-separated candidate list
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == LATEST {
            Ok(Self::Latest)
        } else if s.contains(',') {
            Self::from_candidates(s.split(','))
        } else {
            Ok(Self::Pinned(s.parse()?))
        }
    }
}

impl From<ApiVersion> for RequestedVersion {
    fn from(version: ApiVersion) -> Self {
        Self::Pinned(version)
    }
}

impl fmt::Display for RequestedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pinned(version) => write!(f, "{version}"),
            Self::Latest => f.write_str(LATEST),
            Self::AnyOf(versions) => {
                let joined: Vec<String> = versions.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// Why the client speaks the version it currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSelectState {
    /// Pinned by the caller, or `latest`/a candidate list awaiting discovery
    User,
    /// Agreed upon with a server
    Negotiated,
    /// Loaded from the version cache
    Cached,
    /// Built-in default
    Default,
}

impl VersionSelectState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Negotiated => "negotiated",
            Self::Cached => "cached",
            Self::Default => "default",
        }
    }
}

impl FromStr for VersionSelectState {
    type Err = IronicError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "negotiated" => Ok(Self::Negotiated),
            "cached" => Ok(Self::Cached),
            "default" => Ok(Self::Default),
            other => Err(IronicError::InvalidSelectState(other.to_string())),
        }
    }
}

impl fmt::Display for VersionSelectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_valid_versions() {
        let v: ApiVersion = "1.31".parse().unwrap();
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 31);
        assert_eq!(v.to_string(), "1.31");

        let v: ApiVersion = "0.0".parse().unwrap();
        assert_eq!(v, ApiVersion::new(0, 0));
    }

    #[test]
    fn test_parse_rejects_malformed_versions() {
        for bad in ["1.2.3", "abc", "1", "", ".", "1.", ".1", "1.x", "+1.2", "1.-2", " 1.2"] {
            assert!(
                matches!(bad.parse::<ApiVersion>(), Err(IronicError::InvalidVersion(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_ordering_is_numeric() {
        let v1_9: ApiVersion = "1.9".parse().unwrap();
        let v1_10: ApiVersion = "1.10".parse().unwrap();
        let v2_0: ApiVersion = "2.0".parse().unwrap();

        assert!(v1_9 < v1_10);
        assert!(v1_10 < v2_0);
        assert_eq!(v1_10.max(v1_9), v1_10);
    }

    #[test]
    fn test_requested_version_from_str() {
        assert_eq!("latest".parse::<RequestedVersion>().unwrap(), RequestedVersion::Latest);
        assert_eq!(
            "1.5".parse::<RequestedVersion>().unwrap(),
            RequestedVersion::Pinned(ApiVersion::new(1, 5))
        );
        assert_eq!(
            "1.1, 1.5".parse::<RequestedVersion>().unwrap(),
            RequestedVersion::AnyOf(vec![ApiVersion::new(1, 1), ApiVersion::new(1, 5)])
        );
    }

    #[test]
    fn test_latest_is_rejected_inside_a_list() {
        let err = RequestedVersion::from_candidates(["latest", "1.2"]).unwrap_err();
        assert!(matches!(err, IronicError::Validation(_)));

        let err = "1.2,latest".parse::<RequestedVersion>().unwrap_err();
        assert!(matches!(err, IronicError::Validation(_)));
    }

    #[test]
    fn test_requires_discovery() {
        assert!(!RequestedVersion::Pinned(DEFAULT_VERSION).requires_discovery());
        assert!(RequestedVersion::Latest.requires_discovery());
        assert!(RequestedVersion::AnyOf(vec![DEFAULT_VERSION]).requires_discovery());
    }

    #[test]
    fn test_select_state_round_trip_and_rejection() {
        for state in [
            VersionSelectState::User,
            VersionSelectState::Negotiated,
            VersionSelectState::Cached,
            VersionSelectState::Default,
        ] {
            assert_eq!(state.as_str().parse::<VersionSelectState>().unwrap(), state);
        }

        assert!(matches!(
            "pinned".parse::<VersionSelectState>(),
            Err(IronicError::InvalidSelectState(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_ordering_matches_integer_pairs(a in 0u32..500, b in 0u32..500, c in 0u32..500, d in 0u32..500) {
            let left: ApiVersion = format!("{a}.{b}").parse().unwrap();
            let right: ApiVersion = format!("{c}.{d}").parse().unwrap();
            prop_assert_eq!(left.cmp(&right), (a, b).cmp(&(c, d)));
            prop_assert_eq!(left == right, (a, b) == (c, d));
        }

        #[test]
        fn prop_display_round_trips(a in 0u32..10_000, b in 0u32..10_000) {
            let v = ApiVersion::new(a, b);
            prop_assert_eq!(v.to_string().parse::<ApiVersion>().unwrap(), v);
        }
    }
}
