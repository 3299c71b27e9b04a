//! The client contract the conflict and consistency core consumes.
//!
//! A [`StoreClient`] talks to exactly one node. A [`Connector`] turns
//! configured [`Node`]s into clients, so the core can address any node of
//! the cluster without knowing which transport sits underneath.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{
    DatabaseInfo, DeleteOutcome, DocumentSnapshot, Node, NodeStatus, ReplicationLinkSpec,
    Revision,
};

/// Authenticated request/response interface to one node of the store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Identity of the node this client is bound to.
    fn node_id(&self) -> &str;

    /// Read a document with its current revision and every conflicting leaf.
    async fn fetch_with_conflicts(&self, db: &str, id: &str) -> Result<DocumentSnapshot>;

    /// Point-in-time read of one specific leaf revision.
    async fn fetch_revision(
        &self,
        db: &str,
        id: &str,
        rev: &Revision,
    ) -> Result<serde_json::Value>;

    /// Delete one leaf revision of a document, not the document as a whole.
    async fn delete_revision(&self, db: &str, id: &str, rev: &Revision) -> Result<DeleteOutcome>;

    /// All document ids in `db`, design documents excluded.
    async fn list_ids(&self, db: &str) -> Result<Vec<String>>;

    /// Declare a continuous replication link on this (source) node.
    async fn create_replication_link(&self, spec: &ReplicationLinkSpec) -> Result<()>;

    /// Remove a link definition. Returns false when it did not exist.
    async fn delete_replication_link(&self, id: &str) -> Result<bool>;

    /// Reachability probe.
    async fn node_health(&self) -> Result<NodeStatus>;

    /// Document count and sizes of `db` on this node.
    async fn database_info(&self, db: &str) -> Result<DatabaseInfo>;

    /// Ids of every replication link declared on this node.
    async fn list_replication_links(&self) -> Result<Vec<String>>;

    /// Create `db` if it is missing. Returns true when it was created.
    async fn ensure_database(&self, db: &str) -> Result<bool>;
}

/// Builds clients for configured nodes.
pub trait Connector: Send + Sync {
    /// Client bound to `node`.
    fn connect(&self, node: &Node) -> Result<Arc<dyn StoreClient>>;
}
