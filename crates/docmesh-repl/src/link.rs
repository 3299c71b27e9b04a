//! Deterministic replication link identities.
//!
//! A link id encodes `(source, target, db)` as
//! `docmesh:<len(source)>:<source>:<len(target)>:<target>:<db>`. The length
//! prefixes make the encoding injective for arbitrary node ids and database
//! names, so two distinct triples never share an id and every id produced
//! here parses back to its triple.

use docmesh_store::Node;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every link id this crate produces.
pub const LINK_ID_PREFIX: &str = "docmesh:";

/// One directed replication link of the mesh.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Logical database.
    pub db: String,
}

impl LinkKey {
    /// Build a key.
    pub fn new(source: impl Into<String>, target: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            db: db.into(),
        }
    }

    /// The link id stored in the replication database.
    pub fn id(&self) -> String {
        format!(
            "{}{}:{}:{}:{}:{}",
            LINK_ID_PREFIX,
            self.source.len(),
            self.source,
            self.target.len(),
            self.target,
            self.db
        )
    }

    /// Inverse of [`LinkKey::id`]. Returns `None` for ids not produced by it.
    pub fn parse(id: &str) -> Option<Self> {
        let rest = id.strip_prefix(LINK_ID_PREFIX)?;
        let (source, rest) = take_prefixed(rest)?;
        let (target, db) = take_prefixed(rest)?;
        Some(Self::new(source, target, db))
    }
}

/// Split `<len>:<value>:<rest>` into `(value, rest)`.
fn take_prefixed(s: &str) -> Option<(&str, &str)> {
    let (len, rest) = s.split_once(':')?;
    if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let len: usize = len.parse().ok()?;
    let value = rest.get(..len)?;
    let rest = rest.get(len..)?.strip_prefix(':')?;
    Some((value, rest))
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.source, self.target, self.db)
    }
}

/// Every ordered pair of distinct nodes, for every database: N·(N−1)·D keys,
/// grouped by database and then by source node.
pub fn full_mesh(nodes: &[Node], databases: &[String]) -> Vec<LinkKey> {
    let mut keys = Vec::with_capacity(nodes.len() * nodes.len().saturating_sub(1) * databases.len());
    for db in databases {
        for source in nodes {
            for target in nodes.iter().filter(|t| t.id != source.id) {
                keys.push(LinkKey::new(&source.id, &target.id, db));
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_format() {
        let key = LinkKey::new("NA1", "EU1", "ecommerce_orders");
        assert_eq!(key.id(), "docmesh:3:NA1:3:EU1:ecommerce_orders");
        assert_eq!(LinkKey::parse(&key.id()), Some(key));
    }

    #[test]
    fn test_ids_do_not_collide_on_separator_games() {
        // Plain underscore joining would map both of these to "a_b_c_d".
        let a = LinkKey::new("a_b", "c", "d");
        let b = LinkKey::new("a", "b_c", "d");
        assert_ne!(a.id(), b.id());

        let c = LinkKey::new("a:1", "b", "c");
        let d = LinkKey::new("a", "1:b", "c");
        assert_ne!(c.id(), d.id());
        assert_eq!(LinkKey::parse(&c.id()), Some(c));
        assert_eq!(LinkKey::parse(&d.id()), Some(d));
    }

    #[test]
    fn test_parse_rejects_foreign_ids() {
        assert_eq!(LinkKey::parse("ledger_replication_na1_orders"), None);
        assert_eq!(LinkKey::parse("docmesh:"), None);
        assert_eq!(LinkKey::parse("docmesh:9:NA1:3:EU1:db"), None);
        assert_eq!(LinkKey::parse("docmesh:x:NA1:3:EU1:db"), None);
        assert_eq!(LinkKey::parse("docmesh:3:NA1-3:EU1:db"), None);
    }

    #[test]
    fn test_parse_multibyte_ids() {
        let key = LinkKey::new("Amérique", "EU1", "orders");
        assert_eq!(LinkKey::parse(&key.id()), Some(key));
        assert_eq!(LinkKey::parse("docmesh:1:é:1:a:db"), None);
    }

    #[test]
    fn test_full_mesh_size_and_uniqueness() {
        let nodes: Vec<Node> = ["A", "B", "C", "D"]
            .iter()
            .map(|id| Node::new(*id, format!("http://{}:5984", id)))
            .collect();
        let dbs = vec!["orders".to_string(), "sellers".to_string()];
        let keys = full_mesh(&nodes, &dbs);
        assert_eq!(keys.len(), 4 * 3 * 2);
        let ids: HashSet<String> = keys.iter().map(LinkKey::id).collect();
        assert_eq!(ids.len(), keys.len());
        assert!(keys.iter().all(|k| k.source != k.target));
    }

    #[test]
    fn test_full_mesh_single_node_is_empty() {
        let nodes = vec![Node::new("A", "http://a:5984")];
        assert!(full_mesh(&nodes, &["orders".to_string()]).is_empty());
    }
}
