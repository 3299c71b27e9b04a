//! Error types for the store client layer.

use thiserror::Error;

/// Errors returned by a [`StoreClient`](crate::client::StoreClient).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The node could not be reached, or answered with a server-side failure.
    #[error("connection to {node} failed: {msg}")]
    Connection {
        /// Node identifier or address.
        node: String,
        /// Error message describing the failure.
        msg: String,
    },

    /// The database or document does not exist on the node.
    #[error("not found: {db}/{id}")]
    NotFound {
        /// Logical database name.
        db: String,
        /// Document id, empty when the database itself is missing.
        id: String,
    },

    /// The node answered with a status the client does not expect.
    #[error("unexpected HTTP status {status} from {node} for {path}")]
    UnexpectedStatus {
        /// Node identifier or address.
        node: String,
        /// Request path.
        path: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("decode error from {node}: {msg}")]
    Decode {
        /// Node identifier or address.
        node: String,
        /// Error message describing the decode failure.
        msg: String,
    },

    /// The node address could not be turned into a request URL.
    #[error("invalid address {addr}: {msg}")]
    InvalidAddress {
        /// The offending address.
        addr: String,
        /// Error message.
        msg: String,
    },
}

impl StoreError {
    /// True when the error means the node itself is unavailable.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection { .. })
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
