//! Conflict detection across one logical database.

use docmesh_store::{StoreClient, StoreError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;

/// A document whose revision tree has more than one live leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictedDocument {
    /// Document id.
    pub id: String,
    /// Number of sibling leaves besides the current revision.
    pub conflicts: usize,
}

/// A document that could not be inspected during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDocument {
    /// Document id.
    pub id: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of scanning one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Logical database scanned.
    pub db: String,
    /// Documents listed by the node.
    pub scanned: usize,
    /// Conflicted documents, in listing order.
    pub conflicted: Vec<ConflictedDocument>,
    /// Documents whose fetch failed.
    pub skipped: Vec<SkippedDocument>,
}

impl ScanReport {
    /// Ids of the conflicted documents.
    pub fn conflicted_ids(&self) -> Vec<String> {
        self.conflicted.iter().map(|d| d.id.clone()).collect()
    }

    /// True when no conflicted document was found.
    pub fn is_clean(&self) -> bool {
        self.conflicted.is_empty()
    }
}

/// Enumerates a database on one node and reports conflicted documents.
pub struct ConflictScanner {
    client: Arc<dyn StoreClient>,
    concurrency: usize,
}

impl ConflictScanner {
    /// Scanner over `client` fetching up to `concurrency` documents at once.
    pub fn new(client: Arc<dyn StoreClient>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Scan every non-design document of `db`.
    ///
    /// Failing to list the database is an error. Failing to fetch a single
    /// document is logged and that document is skipped.
    pub async fn scan(&self, db: &str) -> Result<ScanReport> {
        let ids = self.client.list_ids(db).await?;
        let node = self.client.node_id();
        tracing::debug!(node, db, documents = ids.len(), "scanning for conflicts");

        let client = &self.client;
        let fetched: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let result = client.fetch_with_conflicts(db, &id).await;
                (id, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = ScanReport {
            db: db.to_string(),
            scanned: fetched.len(),
            ..Default::default()
        };
        for (id, result) in fetched {
            match result {
                Ok(snapshot) if snapshot.has_conflicts() => {
                    tracing::debug!(
                        node,
                        db,
                        doc_id = %id,
                        conflicts = snapshot.conflicts.len(),
                        "conflict detected"
                    );
                    report.conflicted.push(ConflictedDocument {
                        id,
                        conflicts: snapshot.conflicts.len(),
                    });
                }
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => {
                    // Deleted between listing and fetching.
                    tracing::debug!(node, db, doc_id = %id, "document vanished during scan");
                    report.skipped.push(SkippedDocument {
                        id,
                        reason: "not found".to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(node, db, doc_id = %id, error = %e, "skipping document");
                    report.skipped.push(SkippedDocument {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            node,
            db,
            scanned = report.scanned,
            conflicted = report.conflicted.len(),
            skipped = report.skipped.len(),
            "scan complete"
        );
        Ok(report)
    }
}
