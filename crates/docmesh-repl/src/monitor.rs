//! Cluster consistency monitoring.
//!
//! Each round polls every node for health, per-database document counts and
//! replication links, then derives a verdict per database from the counts of
//! the reachable nodes. Divergence is tracked across rounds so that a
//! database which stays divergent for long enough is reported as stuck rather
//! than merely converging.

use docmesh_store::{Connector, DatabaseInfo, Node, StoreError};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::validate_cluster;
use crate::error::Result;
use crate::link::LinkKey;

/// Convergence verdict for one database in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Every reachable node reports the same positive count.
    Coherent {
        /// The shared document count.
        count: u64,
    },
    /// Every reachable node reports zero documents.
    Empty,
    /// Counts differ; replication is expected to catch up.
    Converging {
        /// Lowest count observed.
        min: u64,
        /// Highest count observed.
        max: u64,
        /// Consecutive divergent rounds including this one.
        rounds: u32,
    },
    /// Counts have differed for at least the configured number of rounds.
    Stuck {
        /// Lowest count observed.
        min: u64,
        /// Highest count observed.
        max: u64,
        /// Consecutive divergent rounds including this one.
        rounds: u32,
    },
    /// No reachable node reported a count.
    Unknown,
}

impl Verdict {
    /// Short label for tables.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Coherent { .. } => "coherent",
            Verdict::Empty => "empty",
            Verdict::Converging { .. } => "converging",
            Verdict::Stuck { .. } => "stuck",
            Verdict::Unknown => "unknown",
        }
    }

    /// True for coherent and empty.
    pub fn is_converged(&self) -> bool {
        matches!(self, Verdict::Coherent { .. } | Verdict::Empty)
    }
}

/// Classify the counts reported by reachable nodes.
///
/// `divergent_rounds` counts consecutive divergent rounds including this one
/// and is only consulted when the counts differ.
pub fn classify(counts: &[u64], divergent_rounds: u32, stuck_after: u32) -> Verdict {
    let (Some(&min), Some(&max)) = (counts.iter().min(), counts.iter().max()) else {
        return Verdict::Unknown;
    };
    if min == max {
        return if max == 0 {
            Verdict::Empty
        } else {
            Verdict::Coherent { count: max }
        };
    }
    if divergent_rounds >= stuck_after.max(1) {
        Verdict::Stuck {
            min,
            max,
            rounds: divergent_rounds,
        }
    } else {
        Verdict::Converging {
            min,
            max,
            rounds: divergent_rounds,
        }
    }
}

/// What one node said about one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DatabaseState {
    /// The database exists.
    Present(DatabaseInfo),
    /// The node answered but has no such database.
    Missing,
    /// The query failed.
    Failed(String),
}

impl DatabaseState {
    /// Count used in the verdict; a missing database counts as empty.
    pub fn doc_count(&self) -> Option<u64> {
        match self {
            DatabaseState::Present(info) => Some(info.doc_count),
            DatabaseState::Missing => Some(0),
            DatabaseState::Failed(_) => None,
        }
    }
}

/// Observation of one database on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseObservation {
    /// Database state and sizes.
    pub state: DatabaseState,
    /// Mesh links for this database whose source is this node.
    pub outbound_links: usize,
}

/// Health and observations for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Node id.
    pub node: String,
    /// Region tag.
    pub region: String,
    /// Whether the node answered its health probe.
    pub reachable: bool,
    /// Store version.
    pub version: Option<String>,
    /// Why the node is unhealthy, when it is.
    pub error: Option<String>,
    /// Replication link documents on the node, when they could be listed.
    pub links_total: Option<usize>,
    /// Per-database observations; empty for unreachable nodes.
    pub databases: BTreeMap<String, DatabaseObservation>,
}

/// Verdict and inputs for one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseReport {
    /// Logical database.
    pub db: String,
    /// Document count per reachable node that answered.
    pub counts: BTreeMap<String, u64>,
    /// Derived verdict.
    pub verdict: Verdict,
    /// Reachable nodes lacking their `N-1` outbound links for this database.
    pub incomplete_links: Vec<String>,
}

/// Result of one monitoring round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Round number, starting at 1.
    pub round: u64,
    /// Outbound links each node should hold per database.
    pub expected_links_per_db: usize,
    /// Per-node health and observations.
    pub nodes: Vec<NodeReport>,
    /// Per-database verdicts.
    pub databases: Vec<DatabaseReport>,
}

impl ConsistencyReport {
    /// True when every database is coherent or empty.
    pub fn is_converged(&self) -> bool {
        self.databases.iter().all(|d| d.verdict.is_converged())
    }

    /// Databases currently reported stuck.
    pub fn stuck(&self) -> Vec<&str> {
        self.databases
            .iter()
            .filter(|d| matches!(d.verdict, Verdict::Stuck { .. }))
            .map(|d| d.db.as_str())
            .collect()
    }

    /// Nodes that failed their health probe.
    pub fn unreachable(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !n.reachable)
            .map(|n| n.node.as_str())
            .collect()
    }
}

/// Polls the cluster and classifies convergence per database.
pub struct ConsistencyMonitor {
    connector: Arc<dyn Connector>,
    nodes: Vec<Node>,
    databases: Vec<String>,
    stuck_after: u32,
    divergence: HashMap<String, u32>,
    rounds: u64,
}

impl ConsistencyMonitor {
    /// Monitor `databases` across `nodes`. A database is reported stuck
    /// after `stuck_after` consecutive divergent rounds.
    pub fn new(
        connector: Arc<dyn Connector>,
        nodes: Vec<Node>,
        databases: Vec<String>,
        stuck_after: u32,
    ) -> Result<Self> {
        validate_cluster(&nodes, &databases)?;
        Ok(Self {
            connector,
            nodes,
            databases,
            stuck_after: stuck_after.max(1),
            divergence: HashMap::new(),
            rounds: 0,
        })
    }

    /// Consecutive divergent rounds seen so far for `db`.
    pub fn divergent_rounds(&self, db: &str) -> u32 {
        self.divergence.get(db).copied().unwrap_or(0)
    }

    async fn observe(&self, node: &Node) -> NodeReport {
        let mut report = NodeReport {
            node: node.id.clone(),
            region: node.region.clone(),
            reachable: false,
            version: None,
            error: None,
            links_total: None,
            databases: BTreeMap::new(),
        };

        let client = match self.connector.connect(node) {
            Ok(c) => c,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        };
        match client.node_health().await {
            Ok(status) if status.reachable => {
                report.reachable = true;
                report.version = status.version;
            }
            Ok(_) => {
                report.error = Some("no response".to_string());
                return report;
            }
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        }

        let links = match client.list_replication_links().await {
            Ok(ids) => Some(ids),
            Err(e) => {
                warn!(node = %node.id, error = %e, "cannot list replication links");
                None
            }
        };
        report.links_total = links.as_ref().map(Vec::len);
        let mut outbound: HashMap<String, usize> = HashMap::new();
        for key in links.iter().flatten().filter_map(|id| LinkKey::parse(id)) {
            if key.source == node.id {
                *outbound.entry(key.db).or_default() += 1;
            }
        }

        for db in &self.databases {
            let state = match client.database_info(db).await {
                Ok(info) => DatabaseState::Present(info),
                Err(StoreError::NotFound { .. }) => DatabaseState::Missing,
                Err(e) => {
                    warn!(node = %node.id, db = %db, error = %e, "cannot read database info");
                    DatabaseState::Failed(e.to_string())
                }
            };
            report.databases.insert(
                db.clone(),
                DatabaseObservation {
                    state,
                    outbound_links: outbound.get(db).copied().unwrap_or(0),
                },
            );
        }
        report
    }

    /// Run one round: query every node concurrently, then derive verdicts.
    pub async fn check(&mut self) -> ConsistencyReport {
        self.rounds += 1;
        let nodes: Vec<NodeReport> = join_all(self.nodes.iter().map(|n| self.observe(n))).await;
        let expected_links = self.nodes.len().saturating_sub(1);

        for node in nodes.iter().filter(|n| !n.reachable) {
            warn!(
                node = %node.node,
                error = node.error.as_deref().unwrap_or("unreachable"),
                "node unhealthy, excluded from this round"
            );
        }

        let mut databases = Vec::with_capacity(self.databases.len());
        for db in &self.databases {
            let mut counts = BTreeMap::new();
            let mut incomplete_links = Vec::new();
            for node in nodes.iter().filter(|n| n.reachable) {
                let Some(obs) = node.databases.get(db) else {
                    continue;
                };
                if let Some(count) = obs.state.doc_count() {
                    counts.insert(node.node.clone(), count);
                }
                if node.links_total.is_some() && obs.outbound_links < expected_links {
                    incomplete_links.push(node.node.clone());
                }
            }

            let values: Vec<u64> = counts.values().copied().collect();
            let divergent = values.iter().min() != values.iter().max();
            let streak = self.divergence.entry(db.clone()).or_insert(0);
            if divergent {
                *streak += 1;
            } else if !values.is_empty() {
                *streak = 0;
            }
            let verdict = classify(&values, *streak, self.stuck_after);

            match verdict {
                Verdict::Stuck { min, max, rounds } => {
                    error!(db = %db, min, max, rounds, "replication appears stuck")
                }
                Verdict::Converging { min, max, rounds } => {
                    info!(db = %db, min, max, rounds, "database converging")
                }
                _ => debug!(db = %db, verdict = verdict.label(), "database classified"),
            }

            databases.push(DatabaseReport {
                db: db.clone(),
                counts,
                verdict,
                incomplete_links,
            });
        }

        let report = ConsistencyReport {
            round: self.rounds,
            expected_links_per_db: expected_links,
            nodes,
            databases,
        };
        info!(
            round = report.round,
            converged = report.is_converged(),
            unreachable = report.unreachable().len(),
            "consistency round complete"
        );
        report
    }

    /// Run rounds every `interval` until `token` is cancelled. A round in
    /// progress always completes. Returns the number of completed rounds.
    pub async fn run<F>(
        &mut self,
        token: CancellationToken,
        interval: Duration,
        mut on_report: F,
    ) -> usize
    where
        F: FnMut(&ConsistencyReport),
    {
        let mut completed = 0;
        while !token.is_cancelled() {
            let report = self.check().await;
            completed += 1;
            on_report(&report);

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!(rounds = completed, "monitoring stopped");
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ReplicationTopologyManager;
    use docmesh_store::{Credentials, MemoryCluster};
    use serde_json::json;

    fn monitor(cluster: &MemoryCluster, stuck_after: u32) -> ConsistencyMonitor {
        ConsistencyMonitor::new(
            Arc::new(cluster.clone()),
            cluster.nodes(),
            vec!["orders".to_string()],
            stuck_after,
        )
        .unwrap()
    }

    fn seed(cluster: &MemoryCluster, node: &str, docs: usize) {
        cluster.create_database(node, "orders").unwrap();
        for i in 0..docs {
            cluster
                .write(node, "orders", &format!("order_{}", i), None, json!({"i": i}))
                .unwrap();
        }
    }

    #[test]
    fn test_classify_counts() {
        assert_eq!(classify(&[10, 10, 10], 0, 3), Verdict::Coherent { count: 10 });
        assert_eq!(classify(&[0, 0, 0], 0, 3), Verdict::Empty);
        assert_eq!(
            classify(&[10, 10, 0], 1, 3),
            Verdict::Converging { min: 0, max: 10, rounds: 1 }
        );
        assert_eq!(
            classify(&[10, 10, 0], 3, 3),
            Verdict::Stuck { min: 0, max: 10, rounds: 3 }
        );
        assert_eq!(classify(&[], 5, 3), Verdict::Unknown);
    }

    #[test]
    fn test_verdict_labels() {
        assert_eq!(Verdict::Empty.label(), "empty");
        assert!(Verdict::Coherent { count: 1 }.is_converged());
        assert!(!Verdict::Unknown.is_converged());
    }

    #[tokio::test]
    async fn test_three_node_verdicts() {
        let cluster = MemoryCluster::with_nodes(&["A", "B", "C"]);
        for n in ["A", "B", "C"] {
            seed(&cluster, n, 10);
        }
        let report = monitor(&cluster, 3).check().await;
        assert_eq!(report.databases[0].verdict, Verdict::Coherent { count: 10 });
        assert!(report.is_converged());
    }

    #[tokio::test]
    async fn test_missing_database_counts_as_empty() {
        let cluster = MemoryCluster::with_nodes(&["A", "B", "C"]);
        seed(&cluster, "A", 10);
        seed(&cluster, "B", 10);
        let report = monitor(&cluster, 3).check().await;
        assert_eq!(
            report.databases[0].verdict,
            Verdict::Converging { min: 0, max: 10, rounds: 1 }
        );
        assert_eq!(report.nodes[2].databases["orders"].state, DatabaseState::Missing);
    }

    #[tokio::test]
    async fn test_unreachable_node_excluded_but_reported() {
        let cluster = MemoryCluster::with_nodes(&["A", "B", "C"]);
        seed(&cluster, "A", 10);
        seed(&cluster, "B", 10);
        cluster.set_reachable("C", false);
        let report = monitor(&cluster, 3).check().await;
        assert_eq!(report.databases[0].verdict, Verdict::Coherent { count: 10 });
        assert_eq!(report.unreachable(), vec!["C"]);
        assert!(!report.databases[0].counts.contains_key("C"));
    }

    #[tokio::test]
    async fn test_escalates_to_stuck_and_recovers() {
        let cluster = MemoryCluster::with_nodes(&["A", "B"]);
        seed(&cluster, "A", 3);
        seed(&cluster, "B", 1);
        let mut m = monitor(&cluster, 2);

        let first = m.check().await;
        assert!(matches!(first.databases[0].verdict, Verdict::Converging { rounds: 1, .. }));
        let second = m.check().await;
        assert!(matches!(second.databases[0].verdict, Verdict::Stuck { rounds: 2, .. }));
        assert_eq!(second.stuck(), vec!["orders"]);

        seed(&cluster, "B", 3);
        let third = m.check().await;
        assert_eq!(third.databases[0].verdict, Verdict::Coherent { count: 3 });
        assert_eq!(m.divergent_rounds("orders"), 0);
        assert_eq!(third.round, 3);
    }

    #[tokio::test]
    async fn test_link_completeness_per_node() {
        let cluster = MemoryCluster::with_nodes(&["A", "B", "C"]);
        let manager =
            ReplicationTopologyManager::new(Arc::new(cluster.clone()), Credentials::default());
        manager
            .establish_full_mesh(&cluster.nodes(), &["orders".to_string()])
            .await
            .unwrap();
        let report = monitor(&cluster, 3).check().await;
        assert_eq!(report.expected_links_per_db, 2);
        assert!(report.databases[0].incomplete_links.is_empty());
        assert!(report
            .nodes
            .iter()
            .all(|n| n.links_total == Some(2) && n.databases["orders"].outbound_links == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        seed(&cluster, "A", 1);
        let mut m = monitor(&cluster, 3);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            canceller.cancel();
        });

        let mut seen = Vec::new();
        let rounds = m
            .run(token, Duration::from_secs(10), |r| seen.push(r.round))
            .await;
        // Rounds at t=0, 10 and 20; cancelled during the third sleep.
        assert_eq!(rounds, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_run_with_cancelled_token_does_nothing() {
        let cluster = MemoryCluster::with_nodes(&["A"]);
        let mut m = monitor(&cluster, 3);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(m.run(token, Duration::from_secs(1), |_| {}).await, 0);
    }
}
