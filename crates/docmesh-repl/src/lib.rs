#![warn(missing_docs)]

//! docmesh replication core: conflict scanning and deterministic resolution,
//! full-mesh replication topology, and cluster consistency monitoring.

pub mod audit;
pub mod config;
pub mod error;
pub mod link;
pub mod monitor;
pub mod resolver;
pub mod scanner;
pub mod topology;

pub use audit::AuditRecord;
pub use config::{ClusterConfig, MonitorSettings, ScanSettings, SetupSettings};
pub use error::{ReplError, Result};
pub use link::{full_mesh, LinkKey};
pub use monitor::{classify, ConsistencyMonitor, ConsistencyReport, DatabaseState, Verdict};
pub use resolver::{
    select_winner, Candidate, ConflictResolver, Resolution, ResolutionKind, ResolveSummary,
};
pub use scanner::{ConflictScanner, ScanReport};
pub use topology::{MeshAudit, MeshReport, ReplicationTopologyManager};
