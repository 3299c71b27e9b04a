//! Deterministic conflict resolution.
//!
//! The winner among the current revision and every conflicting revision is
//! the one with the latest audit timestamp. Equal timestamps fall back to the
//! greatest revision token, so every observer of the same conflict set picks
//! the same winner. Every other leaf is removed by a targeted delete.

use chrono::{DateTime, Utc};
use docmesh_store::{DeleteOutcome, DocumentSnapshot, Revision, StoreClient, StoreError};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::audit::AuditRecord;
use crate::error::{ReplError, Result};
use crate::scanner::ScanReport;

/// A leaf revision taking part in resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Revision token.
    pub rev: Revision,
    /// Audit timestamp of the revision.
    pub created_at: DateTime<Utc>,
}

impl Candidate {
    /// Build a candidate.
    pub fn new(rev: Revision, created_at: DateTime<Utc>) -> Self {
        Self { rev, created_at }
    }
}

/// Pick the winner: latest timestamp, then greatest revision token.
///
/// The result does not depend on the order of `candidates`.
pub fn select_winner(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().max_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.rev.cmp(&b.rev))
    })
}

/// What a call to [`ConflictResolver::resolve`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionKind {
    /// The document had a single leaf; nothing was changed.
    NoConflict,
    /// Losing leaves were removed.
    Resolved,
}

/// Outcome of resolving one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Logical database.
    pub db: String,
    /// Document id.
    pub doc_id: String,
    /// What happened.
    pub kind: ResolutionKind,
    /// Revision the store selected as current before resolution.
    pub previous_current: Revision,
    /// Surviving revision.
    pub winner: Revision,
    /// Audit timestamp of the winner, when resolution compared timestamps.
    pub winner_created_at: Option<DateTime<Utc>>,
    /// Leaves this call deleted.
    pub removed: Vec<Revision>,
    /// Losing leaves that another writer removed or extended first.
    pub superseded: Vec<Revision>,
    /// Leaves that appeared during resolution and were left for a later pass.
    pub new_leaves: Vec<Revision>,
}

impl Resolution {
    fn no_conflict(db: &str, doc_id: &str, current: Revision) -> Self {
        Self {
            db: db.to_string(),
            doc_id: doc_id.to_string(),
            kind: ResolutionKind::NoConflict,
            previous_current: current.clone(),
            winner: current,
            winner_created_at: None,
            removed: Vec::new(),
            superseded: Vec::new(),
            new_leaves: Vec::new(),
        }
    }

    /// True when the winner was a former conflict rather than the current revision.
    pub fn promoted_conflict(&self) -> bool {
        self.winner != self.previous_current
    }
}

/// Per-document failure during a resolve-all sweep.
#[derive(Debug)]
pub struct ResolveFailure {
    /// Document id.
    pub doc_id: String,
    /// What went wrong.
    pub error: ReplError,
}

/// Tally of a resolve-all sweep.
#[derive(Debug, Default)]
pub struct ResolveSummary {
    /// Logical database.
    pub db: String,
    /// Documents attempted.
    pub attempted: usize,
    /// Successful resolutions, including no-ops.
    pub resolutions: Vec<Resolution>,
    /// Documents left unresolved.
    pub failures: Vec<ResolveFailure>,
}

impl ResolveSummary {
    /// Documents whose losing leaves were removed.
    pub fn resolved(&self) -> usize {
        self.resolutions
            .iter()
            .filter(|r| r.kind == ResolutionKind::Resolved)
            .count()
    }

    /// Documents that were already conflict-free when visited.
    pub fn unchanged(&self) -> usize {
        self.resolutions
            .iter()
            .filter(|r| r.kind == ResolutionKind::NoConflict)
            .count()
    }
}

/// Resolves conflicted documents on one node.
pub struct ConflictResolver {
    client: Arc<dyn StoreClient>,
}

impl ConflictResolver {
    /// Resolver operating through `client`.
    pub fn new(client: Arc<dyn StoreClient>) -> Self {
        Self { client }
    }

    /// Node this resolver talks to.
    pub fn node_id(&self) -> &str {
        self.client.node_id()
    }

    /// Resolve one document. A conflict-free document is a no-op.
    pub async fn resolve(&self, db: &str, doc_id: &str) -> Result<Resolution> {
        let snapshot = self.client.fetch_with_conflicts(db, doc_id).await?;
        if !snapshot.has_conflicts() {
            tracing::debug!(db, doc_id, rev = %snapshot.current, "no conflicts");
            return Ok(Resolution::no_conflict(db, doc_id, snapshot.current));
        }

        let (candidates, vanished) = self.candidates(db, &snapshot).await?;
        let winner = match select_winner(&candidates) {
            Some(w) => w.clone(),
            None => return Ok(Resolution::no_conflict(db, doc_id, snapshot.current)),
        };
        tracing::debug!(
            db,
            doc_id,
            winner = %winner.rev,
            created_at = %winner.created_at,
            candidates = candidates.len(),
            "winner selected"
        );

        let losers: Vec<Revision> = candidates
            .iter()
            .filter(|c| c.rev != winner.rev)
            .map(|c| c.rev.clone())
            .collect();

        let known: BTreeSet<Revision> = candidates
            .iter()
            .map(|c| c.rev.clone())
            .chain(vanished.iter().cloned())
            .collect();
        let mut removed = Vec::new();
        let mut superseded = vanished;
        let mut mismatched = Vec::new();
        for rev in losers {
            match self.delete_leaf(db, doc_id, &rev).await? {
                Some(DeleteOutcome::Deleted) => removed.push(rev),
                Some(DeleteOutcome::VersionMismatch) => {
                    tracing::warn!(db, doc_id, rev = %rev, "delete lost a race, will retry once");
                    mismatched.push(rev);
                }
                None => superseded.push(rev),
            }
        }

        let mut new_leaves = Vec::new();
        if !mismatched.is_empty() {
            let refreshed = self.client.fetch_with_conflicts(db, doc_id).await?;
            let live: BTreeSet<&Revision> = refreshed.leaves().collect();
            new_leaves = live
                .iter()
                .filter(|r| !known.contains(*r))
                .map(|r| (*r).clone())
                .collect();

            let mut persisting = Vec::new();
            for rev in mismatched {
                if !live.contains(&rev) {
                    superseded.push(rev);
                    continue;
                }
                match self.delete_leaf(db, doc_id, &rev).await? {
                    Some(DeleteOutcome::Deleted) => removed.push(rev),
                    Some(DeleteOutcome::VersionMismatch) => persisting.push(rev),
                    None => superseded.push(rev),
                }
            }

            if !persisting.is_empty() {
                tracing::error!(
                    db,
                    doc_id,
                    revisions = ?persisting,
                    "conflict persists after retry"
                );
                return Err(ReplError::ConflictPersist {
                    db: db.to_string(),
                    doc_id: doc_id.to_string(),
                    revisions: persisting,
                });
            }
        }

        if !new_leaves.is_empty() {
            tracing::warn!(
                db,
                doc_id,
                leaves = ?new_leaves,
                "new revisions appeared during resolution, leaving them for a later pass"
            );
        }
        tracing::info!(
            db,
            doc_id,
            winner = %winner.rev,
            previous = %snapshot.current,
            removed = removed.len(),
            "conflict resolved"
        );

        Ok(Resolution {
            db: db.to_string(),
            doc_id: doc_id.to_string(),
            kind: ResolutionKind::Resolved,
            previous_current: snapshot.current,
            winner: winner.rev,
            winner_created_at: Some(winner.created_at),
            removed,
            superseded,
            new_leaves,
        })
    }

    /// Resolve every conflicted document of a scan, one at a time.
    ///
    /// A failure on one document is recorded and the sweep continues.
    pub async fn resolve_all(&self, scan: &ScanReport) -> ResolveSummary {
        let mut summary = ResolveSummary {
            db: scan.db.clone(),
            ..Default::default()
        };
        for doc in &scan.conflicted {
            summary.attempted += 1;
            match self.resolve(&scan.db, &doc.id).await {
                Ok(resolution) => summary.resolutions.push(resolution),
                Err(error) => {
                    tracing::warn!(db = %scan.db, doc_id = %doc.id, error = %error, "resolution failed");
                    summary.failures.push(ResolveFailure {
                        doc_id: doc.id.clone(),
                        error,
                    });
                }
            }
        }
        tracing::info!(
            node = self.node_id(),
            db = %summary.db,
            attempted = summary.attempted,
            resolved = summary.resolved(),
            failed = summary.failures.len(),
            "resolve sweep complete"
        );
        summary
    }

    /// Conflicting revisions still present on the document.
    pub async fn remaining_conflicts(&self, db: &str, doc_id: &str) -> Result<Vec<Revision>> {
        Ok(self.client.fetch_with_conflicts(db, doc_id).await?.conflicts)
    }

    /// Audit timestamps of the current revision and of every conflict, plus
    /// the conflicts that were gone by the time they were read.
    async fn candidates(
        &self,
        db: &str,
        snapshot: &DocumentSnapshot,
    ) -> Result<(Vec<Candidate>, Vec<Revision>)> {
        let doc_id = snapshot.id.as_str();
        let current = AuditRecord::from_payload(db, doc_id, &snapshot.current, &snapshot.payload)?;

        let fetches = snapshot.conflicts.iter().map(|rev| async move {
            let payload = match self.client.fetch_revision(db, doc_id, rev).await {
                Ok(payload) => payload,
                Err(StoreError::NotFound { .. }) => return Ok(Err(rev.clone())),
                Err(e) => return Err(ReplError::from(e)),
            };
            let record = AuditRecord::from_payload(db, doc_id, rev, &payload)?;
            Ok::<_, ReplError>(Ok(Candidate::new(rev.clone(), record.created_at)))
        });

        let mut candidates = vec![Candidate::new(snapshot.current.clone(), current.created_at)];
        let mut vanished = Vec::new();
        for fetched in try_join_all(fetches).await? {
            match fetched {
                Ok(candidate) => candidates.push(candidate),
                Err(rev) => {
                    tracing::debug!(db, doc_id, rev = %rev, "conflict revision vanished before it was read");
                    vanished.push(rev);
                }
            }
        }
        Ok((candidates, vanished))
    }

    /// Delete one leaf. `None` means the revision no longer exists.
    async fn delete_leaf(
        &self,
        db: &str,
        doc_id: &str,
        rev: &Revision,
    ) -> Result<Option<DeleteOutcome>> {
        match self.client.delete_revision(db, doc_id, rev).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
