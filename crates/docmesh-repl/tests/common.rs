//! Fixtures shared by the integration tests: an in-memory cluster wired as a
//! full mesh and helpers for writing audited revisions.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use docmesh_repl::{ConflictResolver, ConflictScanner, ReplicationTopologyManager};
use docmesh_store::{Connector, Credentials, MemoryCluster, Node, Revision, StoreClient};
use serde_json::{json, Value};
use std::sync::Arc;

/// Payload carrying an audit record stamped `created_at`.
pub fn audited(created_at: &str, source_node: &str, body: Value) -> Value {
    json!({
        "body": body,
        "audit_trail": {
            "created_by": "integration",
            "created_at": created_at,
            "source_node": source_node,
            "validation_hash": format!("{:x}", created_at.len())
        }
    })
}

/// Parse an RFC 3339 timestamp.
pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// In-memory cluster plus the node descriptors pointing at it.
pub struct TestMesh {
    pub cluster: MemoryCluster,
    pub nodes: Vec<Node>,
    pub databases: Vec<String>,
}

impl TestMesh {
    /// Cluster with `ids`, every database created everywhere, no links yet.
    pub fn new(ids: &[&str], databases: &[&str]) -> Self {
        let cluster = MemoryCluster::with_nodes(ids);
        for db in databases {
            cluster.create_database_everywhere(db);
        }
        Self {
            nodes: cluster.nodes(),
            cluster,
            databases: databases.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// Same, with every link of the full mesh declared.
    pub async fn meshed(ids: &[&str], databases: &[&str]) -> Self {
        let mesh = Self::new(ids, databases);
        let report = mesh
            .topology()
            .establish_full_mesh(&mesh.nodes, &mesh.databases)
            .await
            .unwrap();
        assert!(report.is_complete());
        mesh
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.cluster.clone())
    }

    pub fn client(&self, node: &str) -> Arc<dyn StoreClient> {
        self.cluster
            .connect(&Node::new(node, format!("mem://{}", node)))
            .unwrap()
    }

    pub fn topology(&self) -> ReplicationTopologyManager {
        ReplicationTopologyManager::new(self.connector(), Credentials::new("admin", "secret"))
    }

    pub fn resolver(&self, node: &str) -> ConflictResolver {
        ConflictResolver::new(self.client(node))
    }

    pub fn scanner(&self, node: &str) -> ConflictScanner {
        ConflictScanner::new(self.client(node), 4)
    }

    /// Write `payload` on `node` as a child of `parent`.
    pub fn write(
        &self,
        node: &str,
        db: &str,
        id: &str,
        parent: Option<&Revision>,
        payload: Value,
    ) -> Revision {
        self.cluster.write(node, db, id, parent, payload).unwrap()
    }
}
