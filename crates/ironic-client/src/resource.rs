//! Thin resource managers over [`HttpClient::json_request`]

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{IronicError, Result};
use crate::http::HttpClient;
use crate::version::{API_VERSION_HEADER, MAJOR_VERSION};

/// Resource collections exposed by the Bare Metal API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Node,
    Port,
    Portgroup,
    Chassis,
    Driver,
    Allocation,
    DeployTemplate,
    VolumeConnector,
    VolumeTarget,
}

impl ResourceKind {
    pub const ALL: [Self; 9] = [
        Self::Node,
        Self::Port,
        Self::Portgroup,
        Self::Chassis,
        Self::Driver,
        Self::Allocation,
        Self::DeployTemplate,
        Self::VolumeConnector,
        Self::VolumeTarget,
    ];

    /// Collection path below `/v1`
    pub const fn path(&self) -> &'static str {
        match self {
            Self::Node => "nodes",
            Self::Port => "ports",
            Self::Portgroup => "portgroups",
            Self::Chassis => "chassis",
            Self::Driver => "drivers",
            Self::Allocation => "allocations",
            Self::DeployTemplate => "deploy_templates",
            Self::VolumeConnector => "volume/connectors",
            Self::VolumeTarget => "volume/targets",
        }
    }

    /// Key holding the items in a list response
    pub const fn collection_key(&self) -> &'static str {
        match self {
            Self::VolumeConnector => "connectors",
            Self::VolumeTarget => "targets",
            other => other.path(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for ResourceKind {
    type Err = IronicError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|kind| {
                kind.path().replace('/', "_") == wanted || kind.collection_key() == wanted
            })
            .ok_or_else(|| IronicError::Validation(format!("Unknown resource kind '{s}'")))
    }
}

/// CRUD operations on one resource collection
#[derive(Debug, Clone)]
pub struct ResourceManager {
    client: Arc<HttpClient>,
    kind: ResourceKind,
}

impl ResourceManager {
    pub fn new(client: Arc<HttpClient>, kind: ResourceKind) -> Self {
        Self { client, kind }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn collection_url(&self) -> String {
        format!("/v{}/{}", MAJOR_VERSION, self.kind.path())
    }

    fn item_url(&self, id: &str) -> String {
        format!("{}/{}", self.collection_url(), id)
    }

    /// List the collection, following `next` links
    ///
    /// `limit` of `None` or `0` fetches everything. `version` overrides the
    /// client's API version for these requests only.
    pub async fn list(&self, limit: Option<usize>, version: Option<&str>) -> Result<Vec<Value>> {
        let limit = limit.filter(|l| *l > 0);
        let mut url = match limit {
            Some(limit) => format!("{}?limit={}", self.collection_url(), limit),
            None => self.collection_url(),
        };
        let mut items = Vec::new();

        loop {
            let (_, body) = self
                .client
                .json_request(Method::GET, &url, None, version_headers(version)?)
                .await?;

            if let Some(page) = body.get(self.kind.collection_key()).and_then(Value::as_array) {
                items.extend(page.iter().cloned());
            }
            if let Some(limit) = limit {
                if items.len() >= limit {
                    items.truncate(limit);
                    break;
                }
            }

            match body.get("next").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => {
                    url = next_page_path(next)?;
                    debug!("Fetching next page of {}: {}", self.kind, url);
                }
                _ => break,
            }
        }

        Ok(items)
    }

    pub async fn get(&self, id: &str, version: Option<&str>) -> Result<Value> {
        let (_, body) = self
            .client
            .json_request(Method::GET, &self.item_url(id), None, version_headers(version)?)
            .await?;
        Ok(body)
    }

    pub async fn create(&self, body: &Value, version: Option<&str>) -> Result<Value> {
        let (_, body) = self
            .client
            .json_request(
                Method::POST,
                &self.collection_url(),
                Some(body),
                version_headers(version)?,
            )
            .await?;
        Ok(body)
    }

    /// Apply a JSON Patch document, sent as given
    pub async fn update(&self, id: &str, patch: &Value, version: Option<&str>) -> Result<Value> {
        let (_, body) = self
            .client
            .json_request(
                Method::PATCH,
                &self.item_url(id),
                Some(patch),
                version_headers(version)?,
            )
            .await?;
        Ok(body)
    }

    pub async fn delete(&self, id: &str, version: Option<&str>) -> Result<()> {
        self.client
            .json_request(Method::DELETE, &self.item_url(id), None, version_headers(version)?)
            .await?;
        Ok(())
    }
}

fn version_headers(version: Option<&str>) -> Result<Option<HeaderMap>> {
    let Some(version) = version else {
        return Ok(None);
    };
    let value = HeaderValue::from_str(version)
        .map_err(|_| IronicError::InvalidVersion(version.to_string()))?;
    let mut headers = HeaderMap::new();
    headers.insert(API_VERSION_HEADER, value);
    Ok(Some(headers))
}

/// `next` links are absolute; keep only path and query so the configured
/// endpoint is used for every page
fn next_page_path(next: &str) -> Result<String> {
    let parsed = url::Url::parse(next)?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::retry::RetryBudget;
    use crate::version::ApiVersion;
    use crate::session::ReqwestSession;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn manager(server: &MockServer, kind: ResourceKind) -> ResourceManager {
        let session = ReqwestSession::new(&SessionConfig {
            endpoint: Some(server.uri()),
            token: Some("token".to_string()),
            ..Default::default()
        })
        .unwrap();
        let client = HttpClient::builder(Arc::new(session))
            .endpoint_override(server.uri())
            .api_version(ApiVersion::new(1, 31))
            .retry(RetryBudget::new(0, Duration::ZERO))
            .without_version_cache()
            .build()
            .await
            .unwrap();
        ResourceManager::new(Arc::new(client), kind)
    }

    #[test]
    fn test_kind_paths() {
        assert_eq!(ResourceKind::Node.path(), "nodes");
        assert_eq!(ResourceKind::VolumeTarget.path(), "volume/targets");
        assert_eq!(ResourceKind::VolumeTarget.collection_key(), "targets");
        assert_eq!(ResourceKind::DeployTemplate.collection_key(), "deploy_templates");
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("nodes".parse::<ResourceKind>().unwrap(), ResourceKind::Node);
        assert_eq!(
            "deploy-templates".parse::<ResourceKind>().unwrap(),
            ResourceKind::DeployTemplate
        );
        assert_eq!(
            "volume_connectors".parse::<ResourceKind>().unwrap(),
            ResourceKind::VolumeConnector
        );
        assert!("widgets".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_next_page_path() {
        assert_eq!(
            next_page_path("http://ironic:6385/v1/nodes?limit=1&marker=abc").unwrap(),
            "/v1/nodes?limit=1&marker=abc"
        );
        assert!(next_page_path("not a url").is_err());
    }

    #[tokio::test]
    async fn test_list_follows_next_links() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/ports"))
            .and(query_param("marker", "p1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ports": [{"uuid": "p2"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/ports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ports": [{"uuid": "p1"}],
                "next": format!("{}/v1/ports?marker=p1", server.uri()),
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let ports = manager(&server, ResourceKind::Port)
            .await
            .list(None, None)
            .await
            .unwrap();

        assert_eq!(ports, vec![json!({"uuid": "p1"}), json!({"uuid": "p2"})]);
    }

    #[tokio::test]
    async fn test_list_stops_at_limit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/nodes"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [{"uuid": "a"}, {"uuid": "b"}],
                "next": format!("{}/v1/nodes?limit=2&marker=b", server.uri()),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let nodes = manager(&server, ResourceKind::Node)
            .await
            .list(Some(2), None)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_update_passes_patch_and_version_through() {
        let server = MockServer::start().await;
        let patch = json!([{"op": "replace", "path": "/name", "value": "web-1"}]);

        Mock::given(method("PATCH"))
            .and(path("/v1/nodes/n1"))
            .and(header(API_VERSION_HEADER, "1.52"))
            .and(header("x-auth-token", "token"))
            .and(body_json(patch.clone()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"uuid": "n1", "name": "web-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let node = manager(&server, ResourceKind::Node)
            .await
            .update("n1", &patch, Some("1.52"))
            .await
            .unwrap();
        assert_eq!(node["name"], "web-1");
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chassis"))
            .and(header(API_VERSION_HEADER, "1.31"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"uuid": "c1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/chassis/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "c1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/chassis/c1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let chassis = manager(&server, ResourceKind::Chassis).await;
        let created = chassis.create(&json!({"description": "rack"}), None).await.unwrap();
        assert_eq!(created["uuid"], "c1");
        assert_eq!(chassis.get("c1", None).await.unwrap()["uuid"], "c1");
        chassis.delete("c1", None).await.unwrap();
    }
}
