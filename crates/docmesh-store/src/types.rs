//! Data model shared by every store client.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StoreError};

/// Prefix the store uses for internal (design) document ids.
pub const DESIGN_PREFIX: &str = "_design/";

/// Returns true for ids that name internal design documents.
pub fn is_design_id(id: &str) -> bool {
    id.starts_with(DESIGN_PREFIX)
}

/// One node of the replicated document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Short unique identity, e.g. "NA1".
    pub id: String,
    /// Address operators and this process use to reach the node.
    pub url: String,
    /// Address other nodes use for replication traffic.
    pub internal_url: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Geographic region tag.
    #[serde(default)]
    pub region: String,
}

impl Node {
    /// Create a node whose internal and external addresses coincide.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: id.into(),
            internal_url: url.clone(),
            url,
            description: String::new(),
            region: String::new(),
        }
    }

    /// Description if set, otherwise the id.
    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            &self.id
        } else {
            &self.description
        }
    }

    /// Credentialed URL of `db` on this node's internal address, as the
    /// replication engine on another node must see it.
    pub fn replication_url(&self, db: &str, credentials: &Credentials) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.internal_url).map_err(|e| {
            StoreError::InvalidAddress {
                addr: self.internal_url.clone(),
                msg: e.to_string(),
            }
        })?;
        let invalid = |msg: &str| StoreError::InvalidAddress {
            addr: self.internal_url.clone(),
            msg: msg.to_string(),
        };
        if !credentials.username.is_empty() {
            url.set_username(&credentials.username)
                .map_err(|_| invalid("cannot carry credentials"))?;
            url.set_password(credentials.password.as_deref())
                .map_err(|_| invalid("cannot carry credentials"))?;
        }
        url.path_segments_mut()
            .map_err(|_| invalid("cannot be a base URL"))?
            .pop_if_empty()
            .push(db);
        Ok(url.to_string())
    }
}

/// Credentials shared by every node of the cluster.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name for basic authentication.
    pub username: String,
    /// Password, usually supplied through the environment.
    #[serde(default)]
    pub password: Option<String>,
}

impl Credentials {
    /// Build credentials from a user name and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Opaque revision token assigned by the store.
///
/// Ordering is plain lexicographic order of the token, which is the
/// tie-break every resolver applies so that independent observers of the
/// same conflict set pick the same winner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub String);

impl Revision {
    /// Wrap a revision token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric generation prefix (`3` in `3-abc`), when present.
    pub fn generation(&self) -> Option<u64> {
        self.0.split_once('-').and_then(|(g, _)| g.parse().ok())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A document read with "include conflicts" semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Document id.
    pub id: String,
    /// Revision the store currently selects as winner.
    pub current: Revision,
    /// Payload of the current revision.
    pub payload: serde_json::Value,
    /// Sibling leaf revisions not selected as current.
    pub conflicts: Vec<Revision>,
}

impl DocumentSnapshot {
    /// True when the document has more than one live leaf.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Current revision followed by every conflicting revision.
    pub fn leaves(&self) -> impl Iterator<Item = &Revision> {
        std::iter::once(&self.current).chain(self.conflicts.iter())
    }
}

/// Outcome of a targeted leaf deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The leaf was removed.
    Deleted,
    /// The revision is no longer a leaf; another writer got there first.
    VersionMismatch,
}

/// Reachability and version of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Whether the node answered its health probe.
    pub reachable: bool,
    /// Store version reported by the node.
    pub version: Option<String>,
}

/// Size and count information for one database on one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Number of live documents.
    pub doc_count: u64,
    /// Number of deleted documents.
    #[serde(default)]
    pub doc_del_count: u64,
    /// Bytes on disk.
    #[serde(default)]
    pub disk_size: u64,
    /// Bytes of live data.
    #[serde(default)]
    pub data_size: u64,
}

/// Declaration of one continuous replication link, stored on its source node.
#[derive(Clone, PartialEq, Eq)]
pub struct ReplicationLinkSpec {
    /// Deterministic link id.
    pub id: String,
    /// Source node id.
    pub source_node: String,
    /// Target node id.
    pub target_node: String,
    /// Logical database replicated by this link.
    pub db: String,
    /// Credentialed source database URL.
    pub source_url: String,
    /// Credentialed target database URL.
    pub target_url: String,
    /// Keep the link running as writes occur.
    pub continuous: bool,
    /// Create the target database when it does not exist.
    pub create_target: bool,
}

impl ReplicationLinkSpec {
    /// Build a continuous, target-creating link from `source` to `target`.
    pub fn continuous(
        id: impl Into<String>,
        source: &Node,
        target: &Node,
        db: &str,
        credentials: &Credentials,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            source_node: source.id.clone(),
            target_node: target.id.clone(),
            db: db.to_string(),
            source_url: source.replication_url(db, credentials)?,
            target_url: target.replication_url(db, credentials)?,
            continuous: true,
            create_target: true,
        })
    }
}

impl fmt::Debug for ReplicationLinkSpec {
    // URLs carry credentials and stay out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationLinkSpec")
            .field("id", &self.id)
            .field("source_node", &self.source_node)
            .field("target_node", &self.target_node)
            .field("db", &self.db)
            .field("continuous", &self.continuous)
            .field("create_target", &self.create_target)
            .finish()
    }
}
