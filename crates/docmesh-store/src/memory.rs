//! In-memory multi-node document store.
//!
//! Each node keeps per-document revision trees with the same leaf semantics
//! as the real store: a write names its parent, a delete appends a tombstone
//! child to one leaf, the current revision is the live leaf with the highest
//! `(generation, token)`, and every other live leaf is a conflict. Replication
//! merges revision trees along declared links. Nodes can be taken offline and
//! deletes can be made to fail, which lets the core be exercised against
//! forks, partitions and concurrent writers without a running cluster.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::client::{Connector, StoreClient};
use crate::error::{Result, StoreError};
use crate::types::{
    is_design_id, DatabaseInfo, DeleteOutcome, DocumentSnapshot, Node, NodeStatus,
    ReplicationLinkSpec, Revision,
};

/// Version string reported by in-memory nodes.
pub const MEMORY_VERSION: &str = "3.3.3-memory";

#[derive(Debug, Clone)]
struct RevEntry {
    parent: Option<Revision>,
    payload: serde_json::Value,
    deleted: bool,
}

#[derive(Debug, Clone, Default)]
struct MemDocument {
    revisions: BTreeMap<Revision, RevEntry>,
}

impl MemDocument {
    fn live_leaves(&self) -> Vec<Revision> {
        let parents: BTreeSet<&Revision> = self
            .revisions
            .values()
            .filter_map(|e| e.parent.as_ref())
            .collect();
        self.revisions
            .iter()
            .filter(|(rev, e)| !e.deleted && !parents.contains(rev))
            .map(|(rev, _)| rev.clone())
            .collect()
    }

    /// The store's own pick: highest generation, then highest token.
    fn current(&self) -> Option<Revision> {
        self.live_leaves()
            .into_iter()
            .max_by(|a, b| {
                a.generation()
                    .unwrap_or(0)
                    .cmp(&b.generation().unwrap_or(0))
                    .then_with(|| a.cmp(b))
            })
    }

    fn is_live(&self) -> bool {
        !self.live_leaves().is_empty()
    }

    fn append(
        &mut self,
        parent: Option<&Revision>,
        payload: serde_json::Value,
        deleted: bool,
    ) -> Revision {
        let generation = parent.and_then(|p| p.generation()).unwrap_or(0) + 1;
        let mut hasher = Sha256::new();
        if let Some(p) = parent {
            hasher.update(p.as_str().as_bytes());
        }
        hasher.update(payload.to_string().as_bytes());
        hasher.update([deleted as u8]);
        let digest = hex::encode(hasher.finalize());
        let rev = Revision::new(format!("{}-{}", generation, &digest[..16]));
        self.revisions.insert(
            rev.clone(),
            RevEntry {
                parent: parent.cloned(),
                payload,
                deleted,
            },
        );
        rev
    }

    fn merge_from(&mut self, other: &MemDocument) -> bool {
        let mut changed = false;
        for (rev, entry) in &other.revisions {
            if !self.revisions.contains_key(rev) {
                self.revisions.insert(rev.clone(), entry.clone());
                changed = true;
            }
        }
        changed
    }
}

type Database = BTreeMap<String, MemDocument>;

#[derive(Debug)]
struct NodeState {
    reachable: bool,
    databases: BTreeMap<String, Database>,
    links: BTreeMap<String, ReplicationLinkSpec>,
}

impl NodeState {
    fn new() -> Self {
        Self {
            reachable: true,
            databases: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum DeleteFault {
    /// Answer version-mismatch this many more times, leaving the leaf alone.
    Mismatch { remaining: u32 },
    /// A concurrent writer extends the leaf first, so the delete misses.
    Supersede { payload: serde_json::Value },
}

type FaultKey = (String, String, String, Revision);

#[derive(Debug, Clone, Copy)]
enum FetchFault {
    /// The read fails as if the node dropped the connection.
    Unavailable,
    /// The read answers not-found while the data is still there.
    Missing,
}

/// `None` revision targets `fetch_with_conflicts`, `Some` a point read.
type FetchKey = (String, String, String, Option<Revision>);

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, NodeState>,
    faults: HashMap<FaultKey, DeleteFault>,
    fetch_faults: HashMap<FetchKey, FetchFault>,
}

/// Shared handle to an in-memory cluster. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<ClusterState>>,
}

fn unknown_node(node: &str) -> StoreError {
    StoreError::Connection {
        node: node.to_string(),
        msg: "unknown node".to_string(),
    }
}

impl MemoryCluster {
    /// Empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster with the given node ids, all reachable.
    pub fn with_nodes(ids: &[&str]) -> Self {
        let cluster = Self::new();
        for id in ids {
            cluster.add_node(id);
        }
        cluster
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a node. Re-adding an existing id keeps its data.
    pub fn add_node(&self, id: &str) {
        self.state()
            .nodes
            .entry(id.to_string())
            .or_insert_with(NodeState::new);
    }

    /// `Node` descriptors for every node, in id order, using `mem://` addresses.
    pub fn nodes(&self) -> Vec<Node> {
        self.state()
            .nodes
            .keys()
            .map(|id| Node::new(id.clone(), format!("mem://{}", id)))
            .collect()
    }

    /// Take a node offline or bring it back.
    pub fn set_reachable(&self, node: &str, reachable: bool) {
        if let Some(n) = self.state().nodes.get_mut(node) {
            n.reachable = reachable;
        }
    }

    /// Create `db` on `node` if missing.
    pub fn create_database(&self, node: &str, db: &str) -> Result<()> {
        let mut state = self.state();
        let n = state.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        n.databases.entry(db.to_string()).or_default();
        Ok(())
    }

    /// Create `db` on every node.
    pub fn create_database_everywhere(&self, db: &str) {
        for n in self.state().nodes.values_mut() {
            n.databases.entry(db.to_string()).or_default();
        }
    }

    /// Write a revision of `id` on `node`, as a child of `parent` (or a new
    /// root when `parent` is `None`). Offline nodes still accept local
    /// writes; that is how forks arise.
    pub fn write(
        &self,
        node: &str,
        db: &str,
        id: &str,
        parent: Option<&Revision>,
        payload: serde_json::Value,
    ) -> Result<Revision> {
        let mut state = self.state();
        let n = state.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        let database = n.databases.entry(db.to_string()).or_default();
        let doc = database.entry(id.to_string()).or_default();
        Ok(doc.append(parent, payload, false))
    }

    /// Live leaves of a document on a node, sorted.
    pub fn live_leaves(&self, node: &str, db: &str, id: &str) -> Vec<Revision> {
        self.state()
            .nodes
            .get(node)
            .and_then(|n| n.databases.get(db))
            .and_then(|d| d.get(id))
            .map(|doc| doc.live_leaves())
            .unwrap_or_default()
    }

    /// Payload of the current revision of a document on a node.
    pub fn current_payload(&self, node: &str, db: &str, id: &str) -> Option<serde_json::Value> {
        let state = self.state();
        let doc = state.nodes.get(node)?.databases.get(db)?.get(id)?;
        let current = doc.current()?;
        doc.revisions.get(&current).map(|e| e.payload.clone())
    }

    /// Make the next `times` deletes of `rev` on `node` answer version-mismatch.
    pub fn fail_deletes(&self, node: &str, db: &str, id: &str, rev: &Revision, times: u32) {
        self.state().faults.insert(
            (node.to_string(), db.to_string(), id.to_string(), rev.clone()),
            DeleteFault::Mismatch { remaining: times },
        );
    }

    /// On the next delete of `rev`, a concurrent writer first appends a child
    /// with `payload` to it, so the delete reports version-mismatch.
    pub fn supersede_on_delete(
        &self,
        node: &str,
        db: &str,
        id: &str,
        rev: &Revision,
        payload: serde_json::Value,
    ) {
        self.state().faults.insert(
            (node.to_string(), db.to_string(), id.to_string(), rev.clone()),
            DeleteFault::Supersede { payload },
        );
    }

    /// Make every conflict-aware read of `id` on `node` fail with a
    /// connection error.
    pub fn fail_fetches(&self, node: &str, db: &str, id: &str) {
        self.state().fetch_faults.insert(
            (node.to_string(), db.to_string(), id.to_string(), None),
            FetchFault::Unavailable,
        );
    }

    /// Make every conflict-aware read of `id` on `node` answer not-found, as
    /// if the document was removed between listing and reading.
    pub fn hide_on_fetch(&self, node: &str, db: &str, id: &str) {
        self.state().fetch_faults.insert(
            (node.to_string(), db.to_string(), id.to_string(), None),
            FetchFault::Missing,
        );
    }

    /// Make point reads of `rev` answer not-found, as if it was compacted
    /// away after a snapshot listed it.
    pub fn hide_revision(&self, node: &str, db: &str, id: &str, rev: &Revision) {
        self.state().fetch_faults.insert(
            (node.to_string(), db.to_string(), id.to_string(), Some(rev.clone())),
            FetchFault::Missing,
        );
    }

    /// Total replication link definitions across all nodes.
    pub fn link_count(&self) -> usize {
        self.state().nodes.values().map(|n| n.links.len()).sum()
    }

    /// Run every declared link whose endpoints are both reachable, repeating
    /// until nothing changes. Returns the number of passes that moved data.
    pub fn replicate(&self) -> usize {
        let mut passes = 0;
        loop {
            let changed = self.replicate_once();
            if !changed {
                return passes;
            }
            passes += 1;
        }
    }

    fn replicate_once(&self) -> bool {
        let mut state = self.state();
        let links: Vec<ReplicationLinkSpec> = state
            .nodes
            .values()
            .filter(|n| n.reachable)
            .flat_map(|n| n.links.values().cloned())
            .collect();

        let mut changed = false;
        for link in links {
            let Some(source) = state.nodes.get(&link.source_node) else {
                continue;
            };
            if !source.reachable {
                continue;
            }
            let Some(source_db) = source.databases.get(&link.db).cloned() else {
                continue;
            };
            let Some(target) = state.nodes.get_mut(&link.target_node) else {
                continue;
            };
            if !target.reachable {
                continue;
            }
            if !target.databases.contains_key(&link.db) {
                if !link.create_target {
                    continue;
                }
                target.databases.insert(link.db.clone(), Database::new());
                changed = true;
            }
            let Some(target_db) = target.databases.get_mut(&link.db) else {
                continue;
            };
            for (id, doc) in &source_db {
                changed |= target_db.entry(id.clone()).or_default().merge_from(doc);
            }
        }
        changed
    }

    fn with_node<T>(
        &self,
        node: &str,
        f: impl FnOnce(&mut NodeState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state();
        let n = state.nodes.get_mut(node).ok_or_else(|| unknown_node(node))?;
        if !n.reachable {
            return Err(StoreError::Connection {
                node: node.to_string(),
                msg: "node unreachable".to_string(),
            });
        }
        f(n)
    }

    fn fetch_fault(&self, node: &str, db: &str, id: &str, rev: Option<&Revision>) -> Result<()> {
        let key = (node.to_string(), db.to_string(), id.to_string(), rev.cloned());
        match self.state().fetch_faults.get(&key) {
            Some(FetchFault::Unavailable) => Err(StoreError::Connection {
                node: node.to_string(),
                msg: format!("read of {}/{} interrupted", db, id),
            }),
            Some(FetchFault::Missing) => Err(not_found(db, id)),
            None => Ok(()),
        }
    }

    fn take_fault(&self, key: &FaultKey) -> Option<DeleteFault> {
        let mut state = self.state();
        if let DeleteFault::Mismatch { remaining } = state.faults.get_mut(key)? {
            if *remaining > 1 {
                *remaining -= 1;
                return Some(DeleteFault::Mismatch { remaining: 1 });
            }
        }
        state.faults.remove(key)
    }
}

impl Connector for MemoryCluster {
    fn connect(&self, node: &Node) -> Result<Arc<dyn StoreClient>> {
        if !self.state().nodes.contains_key(&node.id) {
            return Err(unknown_node(&node.id));
        }
        Ok(Arc::new(MemoryClient {
            node_id: node.id.clone(),
            cluster: self.clone(),
        }))
    }
}

/// [`StoreClient`] bound to one node of a [`MemoryCluster`].
#[derive(Debug, Clone)]
pub struct MemoryClient {
    node_id: String,
    cluster: MemoryCluster,
}

fn not_found(db: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        db: db.to_string(),
        id: id.to_string(),
    }
}

fn database<'a>(n: &'a mut NodeState, db: &str) -> Result<&'a mut Database> {
    n.databases.get_mut(db).ok_or_else(|| not_found(db, ""))
}

#[async_trait]
impl StoreClient for MemoryClient {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn fetch_with_conflicts(&self, db: &str, id: &str) -> Result<DocumentSnapshot> {
        self.cluster.fetch_fault(&self.node_id, db, id, None)?;
        self.cluster.with_node(&self.node_id, |n| {
            let doc = database(n, db)?.get(id).ok_or_else(|| not_found(db, id))?;
            let current = doc.current().ok_or_else(|| not_found(db, id))?;
            let payload = doc
                .revisions
                .get(&current)
                .map(|e| e.payload.clone())
                .unwrap_or_default();
            let mut conflicts: Vec<Revision> = doc
                .live_leaves()
                .into_iter()
                .filter(|r| *r != current)
                .collect();
            conflicts.sort_by(|a, b| b.cmp(a));
            Ok(DocumentSnapshot {
                id: id.to_string(),
                current,
                payload,
                conflicts,
            })
        })
    }

    async fn fetch_revision(
        &self,
        db: &str,
        id: &str,
        rev: &Revision,
    ) -> Result<serde_json::Value> {
        self.cluster.fetch_fault(&self.node_id, db, id, Some(rev))?;
        self.cluster.with_node(&self.node_id, |n| {
            let doc = database(n, db)?.get(id).ok_or_else(|| not_found(db, id))?;
            match doc.revisions.get(rev) {
                Some(entry) if !entry.deleted => Ok(entry.payload.clone()),
                _ => Err(not_found(db, id)),
            }
        })
    }

    async fn delete_revision(&self, db: &str, id: &str, rev: &Revision) -> Result<DeleteOutcome> {
        // Fail fast for unreachable nodes before consuming any fault.
        self.cluster.with_node(&self.node_id, |_| Ok(()))?;

        let key = (
            self.node_id.clone(),
            db.to_string(),
            id.to_string(),
            rev.clone(),
        );
        match self.cluster.take_fault(&key) {
            Some(DeleteFault::Mismatch { .. }) => return Ok(DeleteOutcome::VersionMismatch),
            Some(DeleteFault::Supersede { payload }) => {
                self.cluster.with_node(&self.node_id, |n| {
                    let doc = database(n, db)?
                        .get_mut(id)
                        .ok_or_else(|| not_found(db, id))?;
                    doc.append(Some(rev), payload, false);
                    Ok(())
                })?;
                return Ok(DeleteOutcome::VersionMismatch);
            }
            None => {}
        }

        self.cluster.with_node(&self.node_id, |n| {
            let doc = database(n, db)?
                .get_mut(id)
                .ok_or_else(|| not_found(db, id))?;
            if !doc.revisions.contains_key(rev) {
                return Err(not_found(db, id));
            }
            if !doc.live_leaves().contains(rev) {
                return Ok(DeleteOutcome::VersionMismatch);
            }
            doc.append(Some(rev), serde_json::json!({ "_deleted": true }), true);
            Ok(DeleteOutcome::Deleted)
        })
    }

    async fn list_ids(&self, db: &str) -> Result<Vec<String>> {
        self.cluster.with_node(&self.node_id, |n| {
            Ok(database(n, db)?
                .iter()
                .filter(|(id, doc)| doc.is_live() && !is_design_id(id))
                .map(|(id, _)| id.clone())
                .collect())
        })
    }

    async fn create_replication_link(&self, spec: &ReplicationLinkSpec) -> Result<()> {
        self.cluster.with_node(&self.node_id, |n| {
            if n.links.contains_key(&spec.id) {
                return Err(StoreError::UnexpectedStatus {
                    node: self.node_id.clone(),
                    path: format!("/_replicator/{}", spec.id),
                    status: 409,
                });
            }
            n.links.insert(spec.id.clone(), spec.clone());
            Ok(())
        })
    }

    async fn delete_replication_link(&self, id: &str) -> Result<bool> {
        self.cluster
            .with_node(&self.node_id, |n| Ok(n.links.remove(id).is_some()))
    }

    async fn node_health(&self) -> Result<NodeStatus> {
        let state = self.cluster.state();
        let reachable = state
            .nodes
            .get(&self.node_id)
            .map(|n| n.reachable)
            .unwrap_or(false);
        Ok(NodeStatus {
            reachable,
            version: reachable.then(|| MEMORY_VERSION.to_string()),
        })
    }

    async fn database_info(&self, db: &str) -> Result<DatabaseInfo> {
        self.cluster.with_node(&self.node_id, |n| {
            let database = database(n, db)?;
            let mut info = DatabaseInfo::default();
            for doc in database.values() {
                if doc.is_live() {
                    info.doc_count += 1;
                } else {
                    info.doc_del_count += 1;
                }
                for (rev, entry) in &doc.revisions {
                    let size = entry.payload.to_string().len() as u64;
                    info.disk_size += size + rev.as_str().len() as u64;
                    if !entry.deleted {
                        info.data_size += size;
                    }
                }
            }
            Ok(info)
        })
    }

    async fn list_replication_links(&self) -> Result<Vec<String>> {
        self.cluster
            .with_node(&self.node_id, |n| Ok(n.links.keys().cloned().collect()))
    }

    async fn ensure_database(&self, db: &str) -> Result<bool> {
        self.cluster.with_node(&self.node_id, |n| {
            if n.databases.contains_key(db) {
                return Ok(false);
            }
            n.databases.insert(db.to_string(), Database::new());
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Credentials;
    use serde_json::json;

    fn client(cluster: &MemoryCluster, id: &str) -> Arc<dyn StoreClient> {
        cluster.connect(&Node::new(id, format!("mem://{}", id))).unwrap()
    }

    #[tokio::test]
    async fn test_single_write_has_no_conflicts() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        let rev = cluster.write("A", "db", "x", None, json!({"v": 1})).unwrap();
        let snap = client(&cluster, "A").fetch_with_conflicts("db", "x").await.unwrap();
        assert_eq!(snap.current, rev);
        assert!(!snap.has_conflicts());
        assert_eq!(rev.generation(), Some(1));
    }

    #[tokio::test]
    async fn test_sibling_writes_fork_the_document() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        let root = cluster.write("A", "db", "x", None, json!({"v": 1})).unwrap();
        let a = cluster.write("A", "db", "x", Some(&root), json!({"v": 2})).unwrap();
        let b = cluster.write("A", "db", "x", Some(&root), json!({"v": 3})).unwrap();
        let snap = client(&cluster, "A").fetch_with_conflicts("db", "x").await.unwrap();
        assert_eq!(snap.current, std::cmp::max(a.clone(), b.clone()));
        assert_eq!(snap.conflicts, vec![std::cmp::min(a, b)]);
    }

    #[tokio::test]
    async fn test_delete_leaf_then_stale_delete_mismatches() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        let root = cluster.write("A", "db", "x", None, json!({"v": 1})).unwrap();
        let a = cluster.write("A", "db", "x", Some(&root), json!({"v": 2})).unwrap();
        let b = cluster.write("A", "db", "x", Some(&root), json!({"v": 3})).unwrap();
        let c = client(&cluster, "A");

        assert_eq!(c.delete_revision("db", "x", &a).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(
            c.delete_revision("db", "x", &a).await.unwrap(),
            DeleteOutcome::VersionMismatch
        );
        assert_eq!(
            c.delete_revision("db", "x", &root).await.unwrap(),
            DeleteOutcome::VersionMismatch
        );
        assert_eq!(cluster.live_leaves("A", "db", "x"), vec![b]);
    }

    #[tokio::test]
    async fn test_deleting_last_leaf_removes_document() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        let root = cluster.write("A", "db", "x", None, json!({"v": 1})).unwrap();
        let c = client(&cluster, "A");
        c.delete_revision("db", "x", &root).await.unwrap();
        assert!(c.list_ids("db").await.unwrap().is_empty());
        let info = c.database_info("db").await.unwrap();
        assert_eq!(info.doc_count, 0);
        assert_eq!(info.doc_del_count, 1);
    }

    #[tokio::test]
    async fn test_unreachable_node_errors() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        cluster.create_database("A", "db").unwrap();
        cluster.set_reachable("A", false);
        let c = client(&cluster, "A");
        assert!(c.list_ids("db").await.unwrap_err().is_connection());
        assert!(!c.node_health().await.unwrap().reachable);
    }

    #[tokio::test]
    async fn test_injected_mismatch_is_consumed() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        let root = cluster.write("A", "db", "x", None, json!({"v": 1})).unwrap();
        cluster.fail_deletes("A", "db", "x", &root, 2);
        let c = client(&cluster, "A");
        for _ in 0..2 {
            assert_eq!(
                c.delete_revision("db", "x", &root).await.unwrap(),
                DeleteOutcome::VersionMismatch
            );
        }
        assert_eq!(
            c.delete_revision("db", "x", &root).await.unwrap(),
            DeleteOutcome::Deleted
        );
    }

    #[tokio::test]
    async fn test_list_ids_skips_design_documents() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        cluster.write("A", "db", "_design/audit", None, json!({})).unwrap();
        cluster.write("A", "db", "order_1", None, json!({})).unwrap();
        let ids = client(&cluster, "A").list_ids("db").await.unwrap();
        assert_eq!(ids, vec!["order_1".to_string()]);
    }

    #[tokio::test]
    async fn test_links_replicate_and_create_target() {
        let cluster = MemoryCluster::with_nodes(&["A", "B"]);
        cluster.write("A", "db", "x", None, json!({"v": 1})).unwrap();
        let nodes = cluster.nodes();
        let spec = ReplicationLinkSpec::continuous(
            "a-b",
            &nodes[0],
            &nodes[1],
            "db",
            &Credentials::default(),
        )
        .unwrap();
        let a = client(&cluster, "A");
        a.create_replication_link(&spec).await.unwrap();
        assert!(a.create_replication_link(&spec).await.is_err());

        assert!(cluster.replicate() >= 1);
        let b = client(&cluster, "B");
        assert_eq!(b.list_ids("db").await.unwrap(), vec!["x".to_string()]);
        assert!(a.delete_replication_link("a-b").await.unwrap());
        assert!(!a.delete_replication_link("a-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_database_reports_creation() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        let c = client(&cluster, "A");
        assert!(c.ensure_database("db").await.unwrap());
        assert!(!c.ensure_database("db").await.unwrap());
    }

    #[test]
    fn test_connect_unknown_node_fails() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        assert!(cluster.connect(&Node::new("Z", "mem://Z")).is_err());
    }

    #[tokio::test]
    async fn test_fetch_faults_target_one_document() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        let rev = cluster.write("A", "db", "x", None, json!({"v": 1})).unwrap();
        cluster.write("A", "db", "y", None, json!({"v": 2})).unwrap();
        cluster.fail_fetches("A", "db", "x");
        cluster.hide_revision("A", "db", "y", &Revision::from("9-gone"));
        let c = client(&cluster, "A");

        let err = c.fetch_with_conflicts("db", "x").await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(c.fetch_revision("db", "x", &rev).await.unwrap()["v"], 1);
        assert!(c.fetch_with_conflicts("db", "y").await.is_ok());

        cluster.hide_on_fetch("A", "db", "y");
        assert!(matches!(
            c.fetch_with_conflicts("db", "y").await,
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(c.list_ids("db").await.unwrap(), vec!["x", "y"]);
    }
}
