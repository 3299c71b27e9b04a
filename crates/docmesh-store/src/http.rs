//! [`StoreClient`] over the CouchDB HTTP dialect.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::client::{Connector, StoreClient};
use crate::error::{Result, StoreError};
use crate::types::{
    is_design_id, Credentials, DatabaseInfo, DeleteOutcome, DocumentSnapshot, Node, NodeStatus,
    ReplicationLinkSpec, Revision,
};

/// Database holding replication link definitions on every node.
pub const REPLICATOR_DB: &str = "_replicator";

/// Default per-request timeout. Large databases answer `_all_docs` slowly.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Hands out [`HttpStoreClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    credentials: Credentials,
}

impl HttpConnector {
    /// Create a connector authenticating every request with `credentials`.
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Connection {
                node: "-".to_string(),
                msg: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self { http, credentials })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, node: &Node) -> Result<Arc<dyn StoreClient>> {
        let base = reqwest::Url::parse(&node.url).map_err(|e| StoreError::InvalidAddress {
            addr: node.url.clone(),
            msg: e.to_string(),
        })?;
        Ok(Arc::new(HttpStoreClient {
            node_id: node.id.clone(),
            base: base.as_str().trim_end_matches('/').to_string(),
            http: self.http.clone(),
            credentials: self.credentials.clone(),
        }))
    }
}

/// Client bound to one node's external address.
#[derive(Debug, Clone)]
pub struct HttpStoreClient {
    node_id: String,
    base: String,
    http: reqwest::Client,
    credentials: Credentials,
}

#[derive(Deserialize)]
struct AllDocs {
    rows: Vec<AllDocsRow>,
}

#[derive(Deserialize)]
struct AllDocsRow {
    id: String,
}

#[derive(Deserialize)]
struct Welcome {
    version: Option<String>,
}

#[derive(Deserialize)]
struct RawDatabaseInfo {
    doc_count: u64,
    #[serde(default)]
    doc_del_count: u64,
    disk_size: Option<u64>,
    data_size: Option<u64>,
    sizes: Option<RawSizes>,
}

#[derive(Deserialize)]
struct RawSizes {
    file: Option<u64>,
    active: Option<u64>,
}

impl From<RawDatabaseInfo> for DatabaseInfo {
    fn from(raw: RawDatabaseInfo) -> Self {
        let sizes = raw.sizes.as_ref();
        Self {
            doc_count: raw.doc_count,
            doc_del_count: raw.doc_del_count,
            disk_size: sizes
                .and_then(|s| s.file)
                .or(raw.disk_size)
                .unwrap_or_default(),
            data_size: sizes
                .and_then(|s| s.active)
                .or(raw.data_size)
                .unwrap_or_default(),
        }
    }
}

fn doc_path(db: &str, id: &str) -> String {
    format!("/{}/{}", urlencoding::encode(db), urlencoding::encode(id))
}

impl HttpStoreClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base, path);
        let mut request = self.http.request(method, url);
        if !self.credentials.username.is_empty() {
            request = request.basic_auth(
                &self.credentials.username,
                self.credentials.password.as_deref(),
            );
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| StoreError::Connection {
            node: self.node_id.clone(),
            msg: e.to_string(),
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(&self, response: Response) -> Result<T> {
        response.json::<T>().await.map_err(|e| StoreError::Decode {
            node: self.node_id.clone(),
            msg: e.to_string(),
        })
    }

    /// Maps any status the caller did not handle itself.
    fn status_error(&self, status: StatusCode, path: &str, db: &str, id: &str) -> StoreError {
        if status == StatusCode::NOT_FOUND {
            StoreError::NotFound {
                db: db.to_string(),
                id: id.to_string(),
            }
        } else if status.is_server_error() {
            StoreError::Connection {
                node: self.node_id.clone(),
                msg: format!("HTTP {} for {}", status, path),
            }
        } else {
            StoreError::UnexpectedStatus {
                node: self.node_id.clone(),
                path: path.to_string(),
                status: status.as_u16(),
            }
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        db: &str,
        id: &str,
    ) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status, path, db, id));
        }
        self.json(response).await
    }

    async fn list_all_docs(&self, db: &str) -> Result<Vec<String>> {
        let path = format!("/{}/_all_docs", urlencoding::encode(db));
        let docs: AllDocs = self.get_json(&path, db, "").await?;
        Ok(docs
            .rows
            .into_iter()
            .map(|r| r.id)
            .filter(|id| !is_design_id(id))
            .collect())
    }
}

#[async_trait]
impl StoreClient for HttpStoreClient {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn fetch_with_conflicts(&self, db: &str, id: &str) -> Result<DocumentSnapshot> {
        let path = format!("{}?conflicts=true", doc_path(db, id));
        let mut payload: serde_json::Value = self.get_json(&path, db, id).await?;

        let current = payload
            .get("_rev")
            .and_then(|r| r.as_str())
            .map(Revision::new)
            .ok_or_else(|| StoreError::Decode {
                node: self.node_id.clone(),
                msg: format!("{}/{} has no _rev", db, id),
            })?;
        let conflicts = payload
            .as_object_mut()
            .and_then(|o| o.remove("_conflicts"))
            .and_then(|c| serde_json::from_value::<Vec<Revision>>(c).ok())
            .unwrap_or_default();

        Ok(DocumentSnapshot {
            id: id.to_string(),
            current,
            payload,
            conflicts,
        })
    }

    async fn fetch_revision(
        &self,
        db: &str,
        id: &str,
        rev: &Revision,
    ) -> Result<serde_json::Value> {
        let path = format!(
            "{}?rev={}",
            doc_path(db, id),
            urlencoding::encode(rev.as_str())
        );
        self.get_json(&path, db, id).await
    }

    async fn delete_revision(&self, db: &str, id: &str, rev: &Revision) -> Result<DeleteOutcome> {
        let path = format!(
            "{}?rev={}",
            doc_path(db, id),
            urlencoding::encode(rev.as_str())
        );
        let response = self.send(self.request(Method::DELETE, &path)).await?;
        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(DeleteOutcome::Deleted),
            StatusCode::CONFLICT => Ok(DeleteOutcome::VersionMismatch),
            status => Err(self.status_error(status, &path, db, id)),
        }
    }

    async fn list_ids(&self, db: &str) -> Result<Vec<String>> {
        self.list_all_docs(db).await
    }

    async fn create_replication_link(&self, spec: &ReplicationLinkSpec) -> Result<()> {
        let path = doc_path(REPLICATOR_DB, &spec.id);
        let body = serde_json::json!({
            "_id": spec.id,
            "source": spec.source_url,
            "target": spec.target_url,
            "continuous": spec.continuous,
            "create_target": spec.create_target,
        });
        let response = self
            .send(self.request(Method::PUT, &path).json(&body))
            .await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => Ok(()),
            status => Err(self.status_error(status, &path, REPLICATOR_DB, &spec.id)),
        }
    }

    async fn delete_replication_link(&self, id: &str) -> Result<bool> {
        #[derive(Deserialize)]
        struct RevOnly {
            #[serde(rename = "_rev")]
            rev: String,
        }

        let path = doc_path(REPLICATOR_DB, id);
        let current: RevOnly = match self.get_json(&path, REPLICATOR_DB, id).await {
            Ok(doc) => doc,
            Err(StoreError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let delete_path = format!("{}?rev={}", path, urlencoding::encode(&current.rev));
        let response = self
            .send(self.request(Method::DELETE, &delete_path))
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(self.status_error(status, &delete_path, REPLICATOR_DB, id)),
        }
    }

    async fn node_health(&self) -> Result<NodeStatus> {
        let response = match self.send(self.request(Method::GET, "/")).await {
            Ok(r) => r,
            Err(e) => {
                debug!(node = %self.node_id, error = %e, "health probe failed");
                return Ok(NodeStatus {
                    reachable: false,
                    version: None,
                });
            }
        };
        if response.status() != StatusCode::OK {
            return Ok(NodeStatus {
                reachable: false,
                version: None,
            });
        }
        let version = self
            .json::<Welcome>(response)
            .await
            .ok()
            .and_then(|w| w.version);
        Ok(NodeStatus {
            reachable: true,
            version,
        })
    }

    async fn database_info(&self, db: &str) -> Result<DatabaseInfo> {
        let path = format!("/{}", urlencoding::encode(db));
        let raw: RawDatabaseInfo = self.get_json(&path, db, "").await?;
        Ok(raw.into())
    }

    async fn list_replication_links(&self) -> Result<Vec<String>> {
        match self.list_all_docs(REPLICATOR_DB).await {
            Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn ensure_database(&self, db: &str) -> Result<bool> {
        let path = format!("/{}", urlencoding::encode(db));
        let response = self.send(self.request(Method::PUT, &path)).await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => Ok(true),
            StatusCode::PRECONDITION_FAILED => Ok(false),
            status => Err(self.status_error(status, &path, db, "")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> HttpConnector {
        HttpConnector::new(Credentials::new("admin", "pw"), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_doc_path_encodes_components() {
        assert_eq!(doc_path("orders", "a b/c"), "/orders/a%20b%2Fc");
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        let node = Node::new("X", "::nope::");
        assert!(connector().connect(&node).is_err());
    }

    #[test]
    fn test_connect_strips_trailing_slash() {
        let node = Node::new("NA1", "http://localhost:5987/");
        let client = connector().connect(&node).unwrap();
        assert_eq!(client.node_id(), "NA1");
    }

    #[test]
    fn test_raw_info_prefers_sizes_object() {
        let raw: RawDatabaseInfo = serde_json::from_value(serde_json::json!({
            "doc_count": 10,
            "doc_del_count": 2,
            "disk_size": 1,
            "sizes": { "file": 4096, "active": 2048 }
        }))
        .unwrap();
        let info: DatabaseInfo = raw.into();
        assert_eq!(info.doc_count, 10);
        assert_eq!(info.doc_del_count, 2);
        assert_eq!(info.disk_size, 4096);
        assert_eq!(info.data_size, 2048);
    }

    #[test]
    fn test_raw_info_legacy_fields() {
        let raw: RawDatabaseInfo = serde_json::from_value(serde_json::json!({
            "doc_count": 3,
            "disk_size": 100,
            "data_size": 50
        }))
        .unwrap();
        let info: DatabaseInfo = raw.into();
        assert_eq!(info.disk_size, 100);
        assert_eq!(info.data_size, 50);
    }

    #[tokio::test]
    async fn test_unreachable_node_reports_unhealthy() {
        // Port 9 (discard) on localhost is closed in test environments.
        let node = Node::new("DOWN", "http://127.0.0.1:9");
        let client = connector().connect(&node).unwrap();
        let status = client.node_health().await.unwrap();
        assert!(!status.reachable);
        assert!(status.version.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_node_fetch_is_connection_error() {
        let node = Node::new("DOWN", "http://127.0.0.1:9");
        let client = connector().connect(&node).unwrap();
        let err = client.list_ids("orders").await.unwrap_err();
        assert!(err.is_connection());
    }
}
