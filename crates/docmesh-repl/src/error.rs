//! Error types for conflict resolution, topology and monitoring.

use docmesh_store::{Revision, StoreError};
use thiserror::Error;

/// Errors that can occur in the replication core.
#[derive(Debug, Error)]
pub enum ReplError {
    /// A node or database could not be reached.
    #[error("connection error on {node}: {msg}")]
    Connection {
        /// Node the operation targeted.
        node: String,
        /// Error message describing the failure.
        msg: String,
    },

    /// A document is missing the audit metadata resolution depends on.
    #[error("validation error for {db}/{doc_id} rev {rev}: {msg}")]
    Validation {
        /// Logical database.
        db: String,
        /// Document id.
        doc_id: String,
        /// Revision whose audit record is unusable.
        rev: Revision,
        /// What is wrong with it.
        msg: String,
    },

    /// Losing revisions survived deletion and one retry.
    #[error("conflict persists for {db}/{doc_id}: {} revision(s) could not be removed", revisions.len())]
    ConflictPersist {
        /// Logical database.
        db: String,
        /// Document id.
        doc_id: String,
        /// Revisions still present after the retry.
        revisions: Vec<Revision>,
    },

    /// The node or database set is malformed or incomplete.
    #[error("configuration error: {msg}")]
    Configuration {
        /// Error message describing the problem.
        msg: String,
    },

    /// Any other store failure.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl ReplError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ReplError::Configuration { msg: msg.into() }
    }
}

impl From<StoreError> for ReplError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection { node, msg } => ReplError::Connection { node, msg },
            other => ReplError::Store(other),
        }
    }
}

/// Result alias for the replication core.
pub type Result<T> = std::result::Result<T, ReplError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_keep_their_kind() {
        let err: ReplError = StoreError::Connection {
            node: "EU1".to_string(),
            msg: "refused".to_string(),
        }
        .into();
        assert!(matches!(err, ReplError::Connection { ref node, .. } if node == "EU1"));
    }

    #[test]
    fn test_other_store_errors_are_wrapped() {
        let err: ReplError = StoreError::NotFound {
            db: "orders".to_string(),
            id: "x".to_string(),
        }
        .into();
        assert!(matches!(err, ReplError::Store(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_persist_message_counts_revisions() {
        let err = ReplError::ConflictPersist {
            db: "orders".to_string(),
            doc_id: "x".to_string(),
            revisions: vec![Revision::from("2-a"), Revision::from("2-b")],
        };
        assert_eq!(
            err.to_string(),
            "conflict persists for orders/x: 2 revision(s) could not be removed"
        );
    }
}
