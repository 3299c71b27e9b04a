#![warn(missing_docs)]

//! docmesh store layer: the client contract the conflict and consistency core
//! consumes, a CouchDB HTTP adapter, and an in-memory multi-node store.

pub mod client;
pub mod error;
pub mod http;
pub mod memory;
pub mod types;

pub use client::{Connector, StoreClient};
pub use error::{Result, StoreError};
pub use http::{HttpConnector, HttpStoreClient};
pub use memory::{MemoryClient, MemoryCluster};
pub use types::{
    is_design_id, Credentials, DatabaseInfo, DeleteOutcome, DocumentSnapshot, Node, NodeStatus,
    ReplicationLinkSpec, Revision,
};
