//! Full-mesh replication topology: setup, database provisioning and audit.

use docmesh_store::{Connector, Credentials, Node, ReplicationLinkSpec, StoreClient};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::validate_cluster;
use crate::error::{ReplError, Result};
use crate::link::{full_mesh, LinkKey};

/// A link that was not attempted because one of its endpoints was down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedLink {
    /// The link.
    pub key: LinkKey,
    /// Unreachable endpoint.
    pub node: String,
}

/// A link whose declaration failed on a reachable node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedLink {
    /// The link.
    pub key: LinkKey,
    /// Error reported by the store.
    pub error: String,
}

/// Outcome of [`ReplicationTopologyManager::establish_full_mesh`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeshReport {
    /// N·(N−1)·D.
    pub expected: usize,
    /// Links declared by this run.
    pub established: Vec<LinkKey>,
    /// Links skipped because an endpoint was unreachable.
    pub skipped: Vec<SkippedLink>,
    /// Links that failed on reachable nodes.
    pub failed: Vec<FailedLink>,
    /// Nodes that failed their health probe.
    pub unreachable: Vec<String>,
}

impl MeshReport {
    /// True when every expected link was declared.
    pub fn is_complete(&self) -> bool {
        self.established.len() == self.expected
    }
}

/// Outcome of [`ReplicationTopologyManager::audit_mesh`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeshAudit {
    /// N·(N−1)·D.
    pub expected: usize,
    /// Expected links found on their source node.
    pub present: Vec<LinkKey>,
    /// Expected links absent from their reachable source node.
    pub missing: Vec<LinkKey>,
    /// Expected links whose source node could not be listed.
    pub unverified: Vec<LinkKey>,
    /// Link ids found on a node that are not part of the expected mesh, as `(node, id)`.
    pub foreign: Vec<(String, String)>,
    /// Link documents found per node.
    pub links_per_node: BTreeMap<String, usize>,
    /// Nodes whose links could not be listed.
    pub unreachable: Vec<String>,
}

impl MeshAudit {
    /// True when every expected link is present.
    pub fn is_complete(&self) -> bool {
        self.present.len() == self.expected
    }
}

/// Readiness of nodes after [`ReplicationTopologyManager::wait_for_nodes`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeReadiness {
    /// Nodes that answered, with the probe attempt that succeeded.
    pub ready: Vec<(String, u32)>,
    /// Nodes that never answered.
    pub unavailable: Vec<String>,
}

/// Outcome of [`ReplicationTopologyManager::ensure_databases`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseSetupReport {
    /// `(node, db)` pairs created by this run.
    pub created: Vec<(String, String)>,
    /// `(node, db)` pairs that already existed.
    pub existing: Vec<(String, String)>,
    /// `(node, db, error)` for failures.
    pub failed: Vec<(String, String, String)>,
}

/// Declares and audits the continuous replication links of the cluster.
pub struct ReplicationTopologyManager {
    connector: Arc<dyn Connector>,
    credentials: Credentials,
}

impl ReplicationTopologyManager {
    /// Manager using `connector` to reach nodes and `credentials` inside link URLs.
    pub fn new(connector: Arc<dyn Connector>, credentials: Credentials) -> Self {
        Self {
            connector,
            credentials,
        }
    }

    /// Connect and health-probe every node concurrently. Nodes that cannot
    /// be connected to or do not answer map to `None`.
    async fn probe(&self, nodes: &[Node]) -> HashMap<String, Option<Arc<dyn StoreClient>>> {
        let probes = nodes.iter().map(|node| async move {
            let client = match self.connector.connect(node) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(node = %node.id, error = %e, "cannot connect");
                    return (node.id.clone(), None);
                }
            };
            match client.node_health().await {
                Ok(status) if status.reachable => (node.id.clone(), Some(client)),
                Ok(_) => {
                    tracing::warn!(node = %node.id, "node unreachable");
                    (node.id.clone(), None)
                }
                Err(e) => {
                    tracing::warn!(node = %node.id, error = %e, "health probe failed");
                    (node.id.clone(), None)
                }
            }
        });
        join_all(probes).await.into_iter().collect()
    }

    /// Declare one continuous link for every ordered pair of distinct nodes
    /// and every database. Existing definitions are deleted and recreated.
    ///
    /// A malformed node or database set fails before anything is touched.
    /// Links involving unreachable nodes are skipped and reported.
    pub async fn establish_full_mesh(
        &self,
        nodes: &[Node],
        databases: &[String],
    ) -> Result<MeshReport> {
        validate_cluster(nodes, databases)?;
        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut plan: BTreeMap<String, Vec<(LinkKey, ReplicationLinkSpec)>> = BTreeMap::new();
        let keys = full_mesh(nodes, databases);
        let expected = keys.len();
        for key in keys {
            let (Some(source), Some(target)) =
                (by_id.get(key.source.as_str()), by_id.get(key.target.as_str()))
            else {
                continue;
            };
            let spec = ReplicationLinkSpec::continuous(
                key.id(),
                source,
                target,
                &key.db,
                &self.credentials,
            )
            .map_err(|e| ReplError::config(format!("link {}: {}", key, e)))?;
            plan.entry(key.source.clone()).or_default().push((key, spec));
        }

        let clients = self.probe(nodes).await;
        let unreachable: BTreeSet<String> = clients
            .iter()
            .filter(|(_, c)| c.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        let mut report = MeshReport {
            expected,
            unreachable: unreachable.iter().cloned().collect(),
            ..Default::default()
        };

        let mut work = Vec::new();
        for (source, links) in plan {
            let client = clients.get(&source).cloned().flatten();
            for (key, spec) in &links {
                let down = [&key.source, &key.target]
                    .into_iter()
                    .find(|n| unreachable.contains(*n));
                if let Some(node) = down {
                    tracing::warn!(link_id = %spec.id, node = %node, "skipping link, endpoint unreachable");
                    report.skipped.push(SkippedLink {
                        key: key.clone(),
                        node: node.clone(),
                    });
                }
            }
            if let Some(client) = client {
                let links: Vec<_> = links
                    .into_iter()
                    .filter(|(k, _)| !unreachable.contains(&k.target))
                    .collect();
                work.push(declare_links(client, links));
            }
        }

        for results in join_all(work).await {
            for (key, result) in results {
                match result {
                    Ok(()) => report.established.push(key),
                    Err(error) => report.failed.push(FailedLink { key, error }),
                }
            }
        }
        report.established.sort();

        tracing::info!(
            expected = report.expected,
            established = report.established.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "full mesh setup finished"
        );
        Ok(report)
    }

    /// Compare the links present on every node with the expected full mesh.
    pub async fn audit_mesh(&self, nodes: &[Node], databases: &[String]) -> Result<MeshAudit> {
        validate_cluster(nodes, databases)?;
        let keys = full_mesh(nodes, databases);
        let expected_ids: BTreeSet<String> = keys.iter().map(LinkKey::id).collect();

        let listings = nodes.iter().map(|node| async move {
            let listed = match self.connector.connect(node) {
                Ok(client) => client.list_replication_links().await.map_err(ReplError::from),
                Err(e) => Err(e.into()),
            };
            (node.id.clone(), listed)
        });

        let mut audit = MeshAudit {
            expected: keys.len(),
            ..Default::default()
        };
        let mut found: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (node, listed) in join_all(listings).await {
            match listed {
                Ok(ids) => {
                    audit.links_per_node.insert(node.clone(), ids.len());
                    for id in &ids {
                        if !expected_ids.contains(id) {
                            audit.foreign.push((node.clone(), id.clone()));
                        }
                    }
                    found.insert(node, ids.into_iter().collect());
                }
                Err(e) => {
                    tracing::warn!(node = %node, error = %e, "cannot list replication links");
                    audit.unreachable.push(node);
                }
            }
        }

        for key in keys {
            match found.get(&key.source) {
                Some(ids) if ids.contains(&key.id()) => audit.present.push(key),
                Some(_) => audit.missing.push(key),
                None => audit.unverified.push(key),
            }
        }

        tracing::info!(
            expected = audit.expected,
            present = audit.present.len(),
            missing = audit.missing.len(),
            foreign = audit.foreign.len(),
            "mesh audit finished"
        );
        Ok(audit)
    }

    /// Probe every node until it answers, up to `retries` attempts spaced
    /// `delay` apart. Nodes that never answer are reported, not fatal.
    pub async fn wait_for_nodes(
        &self,
        nodes: &[Node],
        retries: u32,
        delay: Duration,
    ) -> NodeReadiness {
        let waits = nodes.iter().map(|node| async move {
            let client = match self.connector.connect(node) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(node = %node.id, error = %e, "cannot connect");
                    return (node.id.clone(), None);
                }
            };
            for attempt in 1..=retries.max(1) {
                if let Ok(status) = client.node_health().await {
                    if status.reachable {
                        tracing::info!(node = %node.id, attempt, version = ?status.version, "node ready");
                        return (node.id.clone(), Some(attempt));
                    }
                }
                tracing::debug!(node = %node.id, attempt, "node not ready");
                if attempt < retries {
                    tokio::time::sleep(delay).await;
                }
            }
            tracing::warn!(node = %node.id, retries, "node did not become ready");
            (node.id.clone(), None)
        });

        let mut readiness = NodeReadiness::default();
        for (node, attempt) in join_all(waits).await {
            match attempt {
                Some(a) => readiness.ready.push((node, a)),
                None => readiness.unavailable.push(node),
            }
        }
        readiness
    }

    /// Create every database on every node where it is missing.
    pub async fn ensure_databases(
        &self,
        nodes: &[Node],
        databases: &[String],
    ) -> Result<DatabaseSetupReport> {
        validate_cluster(nodes, databases)?;
        let per_node = nodes.iter().map(|node| async move {
            let mut results = Vec::new();
            let client = match self.connector.connect(node) {
                Ok(c) => c,
                Err(e) => {
                    for db in databases {
                        results.push((db.clone(), Err(e.to_string())));
                    }
                    return (node.id.clone(), results);
                }
            };
            for db in databases {
                let result = client.ensure_database(db).await.map_err(|e| e.to_string());
                results.push((db.clone(), result));
            }
            (node.id.clone(), results)
        });

        let mut report = DatabaseSetupReport::default();
        for (node, results) in join_all(per_node).await {
            for (db, result) in results {
                match result {
                    Ok(true) => {
                        tracing::info!(node = %node, db = %db, "database created");
                        report.created.push((node.clone(), db));
                    }
                    Ok(false) => {
                        tracing::debug!(node = %node, db = %db, "database exists");
                        report.existing.push((node.clone(), db));
                    }
                    Err(error) => {
                        tracing::warn!(node = %node, db = %db, error = %error, "cannot create database");
                        report.failed.push((node.clone(), db, error));
                    }
                }
            }
        }
        Ok(report)
    }
}

/// Delete then recreate each link on its source node.
async fn declare_links(
    client: Arc<dyn StoreClient>,
    links: Vec<(LinkKey, ReplicationLinkSpec)>,
) -> Vec<(LinkKey, std::result::Result<(), String>)> {
    let mut results = Vec::with_capacity(links.len());
    for (key, spec) in links {
        let result = async {
            if client.delete_replication_link(&spec.id).await? {
                tracing::debug!(link_id = %spec.id, "replaced existing link");
            }
            client.create_replication_link(&spec).await
        }
        .await;
        match result {
            Ok(()) => {
                tracing::debug!(link_id = %spec.id, source = %key.source, target = %key.target, db = %key.db, "link declared");
                results.push((key, Ok(())));
            }
            Err(e) => {
                tracing::warn!(link_id = %spec.id, error = %e, "link declaration failed");
                results.push((key, Err(e.to_string())));
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmesh_store::MemoryCluster;

    fn dbs() -> Vec<String> {
        vec!["orders".to_string(), "sellers".to_string()]
    }

    fn manager(cluster: &MemoryCluster) -> ReplicationTopologyManager {
        ReplicationTopologyManager::new(Arc::new(cluster.clone()), Credentials::new("admin", "pw"))
    }

    #[tokio::test]
    async fn test_full_mesh_declares_every_link() {
        let cluster = MemoryCluster::with_nodes(&["A", "B", "C"]);
        let report = manager(&cluster)
            .establish_full_mesh(&cluster.nodes(), &dbs())
            .await
            .unwrap();
        assert_eq!(report.expected, 3 * 2 * 2);
        assert!(report.is_complete());
        assert_eq!(cluster.link_count(), 12);
    }

    #[tokio::test]
    async fn test_rerun_replaces_instead_of_duplicating() {
        let cluster = MemoryCluster::with_nodes(&["A", "B", "C"]);
        let m = manager(&cluster);
        m.establish_full_mesh(&cluster.nodes(), &dbs()).await.unwrap();
        let again = m.establish_full_mesh(&cluster.nodes(), &dbs()).await.unwrap();
        assert!(again.is_complete());
        assert!(again.failed.is_empty());
        assert_eq!(cluster.link_count(), 12);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_skipped() {
        let cluster = MemoryCluster::with_nodes(&["A", "B", "C"]);
        cluster.set_reachable("C", false);
        let report = manager(&cluster)
            .establish_full_mesh(&cluster.nodes(), &dbs())
            .await
            .unwrap();
        // Only A<->B survive: 2 directions x 2 databases.
        assert_eq!(report.established.len(), 4);
        assert_eq!(report.skipped.len(), 8);
        assert!(report.skipped.iter().all(|s| s.node == "C"));
        assert_eq!(report.unreachable, vec!["C".to_string()]);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_malformed_input_is_configuration_error() {
        let cluster = MemoryCluster::with_nodes(&["A", "B"]);
        let m = manager(&cluster);
        let err = m.establish_full_mesh(&cluster.nodes(), &[]).await.unwrap_err();
        assert!(matches!(err, ReplError::Configuration { .. }));

        let mut nodes = cluster.nodes();
        nodes.push(nodes[0].clone());
        let err = m.establish_full_mesh(&nodes, &dbs()).await.unwrap_err();
        assert!(matches!(err, ReplError::Configuration { .. }));
        assert_eq!(cluster.link_count(), 0);
    }

    #[tokio::test]
    async fn test_audit_reports_missing_and_foreign() {
        let cluster = MemoryCluster::with_nodes(&["A", "B"]);
        let m = manager(&cluster);
        let nodes = cluster.nodes();
        m.establish_full_mesh(&nodes, &["orders".to_string()]).await.unwrap();

        let audit = m.audit_mesh(&nodes, &dbs()).await.unwrap();
        assert_eq!(audit.expected, 4);
        assert_eq!(audit.present.len(), 2);
        assert_eq!(audit.missing.len(), 2);
        assert!(audit.missing.iter().all(|k| k.db == "sellers"));
        assert!(audit.foreign.is_empty());

        let audit = m.audit_mesh(&nodes, &["sellers".to_string()]).await.unwrap();
        assert_eq!(audit.foreign.len(), 2);
        assert_eq!(audit.links_per_node.get("A"), Some(&1));
    }

    #[tokio::test]
    async fn test_audit_marks_unlistable_nodes() {
        let cluster = MemoryCluster::with_nodes(&["A", "B"]);
        let m = manager(&cluster);
        let nodes = cluster.nodes();
        m.establish_full_mesh(&nodes, &dbs()).await.unwrap();
        cluster.set_reachable("B", false);
        let audit = m.audit_mesh(&nodes, &dbs()).await.unwrap();
        assert_eq!(audit.present.len(), 2);
        assert_eq!(audit.unverified.len(), 2);
        assert_eq!(audit.unreachable, vec!["B".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_nodes_reports_unavailable() {
        let cluster = MemoryCluster::with_nodes(&["A", "B"]);
        cluster.set_reachable("B", false);
        let readiness = manager(&cluster)
            .wait_for_nodes(&cluster.nodes(), 3, Duration::from_secs(2))
            .await;
        assert_eq!(readiness.ready, vec![("A".to_string(), 1)]);
        assert_eq!(readiness.unavailable, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_databases_is_idempotent() {
        let cluster = MemoryCluster::with_nodes(&["A", "B"]);
        cluster.create_database("A", "orders").unwrap();
        let m = manager(&cluster);
        let report = m.ensure_databases(&cluster.nodes(), &dbs()).await.unwrap();
        assert_eq!(report.created.len(), 3);
        assert_eq!(report.existing, vec![("A".to_string(), "orders".to_string())]);

        let report = m.ensure_databases(&cluster.nodes(), &dbs()).await.unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.existing.len(), 4);
    }
}
