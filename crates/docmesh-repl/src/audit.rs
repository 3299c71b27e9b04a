//! Audit records embedded in every document payload.

use chrono::{DateTime, Utc};
use docmesh_store::Revision;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ReplError, Result};

/// Payload key holding the audit record.
pub const AUDIT_KEY: &str = "audit_trail";

/// Who wrote a revision, when, where, and a hash of what was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Creator of the revision.
    #[serde(default)]
    pub created_by: String,
    /// Creation timestamp; the resolution ordering key.
    pub created_at: DateTime<Utc>,
    /// Node the write originated on.
    #[serde(default)]
    pub source_node: String,
    /// Integrity hash of the payload.
    #[serde(default)]
    pub validation_hash: String,
}

impl AuditRecord {
    /// Extract the audit record of revision `rev` of `db/doc_id` from its payload.
    pub fn from_payload(db: &str, doc_id: &str, rev: &Revision, payload: &Value) -> Result<Self> {
        let invalid = |msg: String| ReplError::Validation {
            db: db.to_string(),
            doc_id: doc_id.to_string(),
            rev: rev.clone(),
            msg,
        };

        let trail = payload
            .get(AUDIT_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| invalid(format!("missing {} object", AUDIT_KEY)))?;
        let raw = trail
            .get("created_at")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing created_at".to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| invalid(format!("unparsable created_at {:?}: {}", raw, e)))?
            .with_timezone(&Utc);

        let field = |name: &str| {
            trail
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            created_by: field("created_by"),
            created_at,
            source_node: field("source_node"),
            validation_hash: field("validation_hash"),
        })
    }
}
