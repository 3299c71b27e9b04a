//! Cluster configuration: the node set, logical databases and tuning knobs.
//!
//! Built once at process start and passed by reference into every component.

use docmesh_store::{Credentials, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{ReplError, Result};

/// Monitoring loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Seconds between rounds in continuous mode.
    pub interval_secs: u64,
    /// Consecutive divergent rounds before a database is reported stuck.
    pub stuck_after_rounds: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            stuck_after_rounds: 3,
        }
    }
}

impl MonitorSettings {
    /// Interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Conflict scan settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Documents fetched concurrently during a scan.
    pub concurrency: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

/// Cluster setup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupSettings {
    /// Health probes per node before it is treated as unreachable.
    pub wait_retries: u32,
    /// Delay between health probes in milliseconds.
    pub wait_delay_ms: u64,
}

impl Default for SetupSettings {
    fn default() -> Self {
        Self {
            wait_retries: 30,
            wait_delay_ms: 2000,
        }
    }
}

/// The authoritative node and database set for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Every node of the cluster.
    pub nodes: Vec<Node>,
    /// Logical databases present on every node.
    pub databases: Vec<String>,
    /// Credentials shared by all nodes.
    #[serde(default)]
    pub credentials: Credentials,
    /// Monitoring settings.
    #[serde(default)]
    pub monitor: MonitorSettings,
    /// Scan settings.
    #[serde(default)]
    pub scan: ScanSettings,
    /// Setup settings.
    #[serde(default)]
    pub setup: SetupSettings,
}

fn node(id: &str, port: u16, internal_ip: &str, description: &str, region: &str) -> Node {
    Node {
        id: id.to_string(),
        url: format!("http://localhost:{}", port),
        internal_url: format!("http://{}:5984", internal_ip),
        description: description.to_string(),
        region: region.to_string(),
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: vec![
                node("NA1", 5987, "192.168.100.10", "North America 1", "north_america"),
                node("NA2", 5988, "192.168.100.11", "North America 2", "north_america"),
                node("EU1", 5989, "192.168.100.12", "Europe 1", "europe"),
                node("AP1", 5990, "192.168.100.13", "Asia Pacific 1", "asia_pacific"),
            ],
            databases: vec![
                "ecommerce_orders".to_string(),
                "ecommerce_products".to_string(),
                "ecommerce_sellers".to_string(),
                "ecommerce_leads".to_string(),
            ],
            credentials: Credentials {
                username: "admin".to_string(),
                password: None,
            },
            monitor: MonitorSettings::default(),
            scan: ScanSettings::default(),
            setup: SetupSettings::default(),
        }
    }
}

/// Database names must start with a lowercase letter and use only
/// lowercase letters, digits and `_$()+-/`.
pub fn is_valid_database_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_$()+-/".contains(c))
}

impl ClusterConfig {
    /// Load a `.toml` or `.json` configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ReplError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)
                .map_err(|e| ReplError::config(format!("{}: {}", path.display(), e))),
            "json" => serde_json::from_str(&contents)
                .map_err(|e| ReplError::config(format!("{}: {}", path.display(), e))),
            _ => Err(ReplError::config(format!(
                "unsupported config file extension: {}",
                ext
            ))),
        }
    }

    /// Reject node and database sets the core cannot work with.
    pub fn validate(&self) -> Result<()> {
        validate_cluster(&self.nodes, &self.databases)?;
        if self.scan.concurrency == 0 {
            return Err(ReplError::config("scan.concurrency must be >= 1"));
        }
        if self.monitor.stuck_after_rounds == 0 {
            return Err(ReplError::config("monitor.stuck_after_rounds must be >= 1"));
        }
        Ok(())
    }

    /// Look a node up by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Checks shared by every component that receives a node and database set.
pub fn validate_cluster(nodes: &[Node], databases: &[String]) -> Result<()> {
    if nodes.is_empty() {
        return Err(ReplError::config("no nodes configured"));
    }
    if databases.is_empty() {
        return Err(ReplError::config("no logical databases configured"));
    }

    let mut ids = HashSet::new();
    for node in nodes {
        if node.id.is_empty() {
            return Err(ReplError::config("node with empty id"));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(ReplError::config(format!("duplicate node id: {}", node.id)));
        }
        for (field, url) in [("url", &node.url), ("internal_url", &node.internal_url)] {
            if !url.contains("://") {
                return Err(ReplError::config(format!(
                    "node {} has invalid {}: {:?}",
                    node.id, field, url
                )));
            }
        }
    }

    let mut names = HashSet::new();
    for db in databases {
        if !is_valid_database_name(db) {
            return Err(ReplError::config(format!("invalid database name: {:?}", db)));
        }
        if !names.insert(db.as_str()) {
            return Err(ReplError::config(format!("duplicate database: {}", db)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClusterConfig::default();
        assert_eq!(config.nodes.len(), 4);
        assert_eq!(config.databases.len(), 4);
        assert!(config.validate().is_ok());
        assert_eq!(config.node("EU1").unwrap().region, "europe");
        assert!(config.credentials.password.is_none());
    }

    #[test]
    fn test_database_name_rules() {
        assert!(is_valid_database_name("ecommerce_orders"));
        assert!(is_valid_database_name("a1$()+-/"));
        assert!(!is_valid_database_name("Orders"));
        assert!(!is_valid_database_name("_replicator"));
        assert!(!is_valid_database_name("1db"));
        assert!(!is_valid_database_name(""));
        assert!(!is_valid_database_name("has space"));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut config = ClusterConfig::default();
        config.nodes.push(config.nodes[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate node id: NA1"));
    }

    #[test]
    fn test_empty_sets_rejected() {
        let mut config = ClusterConfig::default();
        config.databases.clear();
        assert!(matches!(
            config.validate(),
            Err(ReplError::Configuration { .. })
        ));

        let mut config = ClusterConfig::default();
        config.nodes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_url_rejected() {
        let mut config = ClusterConfig::default();
        config.nodes[1].internal_url = "192.168.0.1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_tuning_rejected() {
        let mut config = ClusterConfig::default();
        config.scan.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
databases = ["orders", "sellers"]

[credentials]
username = "ops"

[monitor]
stuck_after_rounds = 5

[[nodes]]
id = "A"
url = "http://localhost:5984"
internal_url = "http://10.0.0.1:5984"
region = "europe"

[[nodes]]
id = "B"
url = "http://localhost:5985"
internal_url = "http://10.0.0.2:5984"
            "#
        )
        .unwrap();

        let config = ClusterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.databases, vec!["orders", "sellers"]);
        assert_eq!(config.credentials.username, "ops");
        assert_eq!(config.monitor.stuck_after_rounds, 5);
        assert_eq!(config.monitor.interval_secs, 10);
        assert_eq!(config.scan.concurrency, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "nodes": [{{"id": "A", "url": "http://a:5984", "internal_url": "http://a:5984"}}],
                "databases": ["orders"]
            }}"#
        )
        .unwrap();

        let config = ClusterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.nodes[0].id, "A");
        assert_eq!(config.credentials, Credentials::default());
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let err = ClusterConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config file extension"));
    }

    #[test]
    fn test_from_file_malformed() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "nodes = 3").unwrap();
        assert!(matches!(
            ClusterConfig::from_file(file.path()),
            Err(ReplError::Configuration { .. })
        ));
    }
}
