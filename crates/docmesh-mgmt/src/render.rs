//! Plain-text tables for operator output.

use docmesh_repl::monitor::{DatabaseState, NodeReport};
use docmesh_repl::resolver::ResolutionKind;
use docmesh_repl::topology::{DatabaseSetupReport, NodeReadiness};
use docmesh_repl::{
    ConsistencyReport, MeshAudit, MeshReport, Resolution, ResolveSummary, ScanReport, Verdict,
};
use docmesh_store::DocumentSnapshot;

/// Bytes as megabytes with two decimals.
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// One-line description of a verdict.
pub fn verdict_detail(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Coherent { count } => format!("coherent ({} docs)", count),
        Verdict::Empty => "empty".to_string(),
        Verdict::Converging { min, max, rounds } => {
            format!("converging ({}..{} docs, {} round(s))", min, max, rounds)
        }
        Verdict::Stuck { min, max, rounds } => {
            format!("STUCK ({}..{} docs for {} rounds)", min, max, rounds)
        }
        Verdict::Unknown => "unknown (no node answered)".to_string(),
    }
}

/// Conflicted documents found by a scan, followed by any skipped documents.
pub fn conflict_list(scan: &ScanReport) -> Vec<String> {
    let mut lines = Vec::new();
    if scan.conflicted.is_empty() {
        lines.push(format!(
            "No conflicts in {} ({} documents scanned, {} skipped)",
            scan.db,
            scan.scanned,
            scan.skipped.len()
        ));
    } else {
        lines.push(format!(
            "Conflicts in {} ({} of {} documents, {} skipped):",
            scan.db,
            scan.conflicted.len(),
            scan.scanned,
            scan.skipped.len()
        ));
        lines.push(format!("{:<40} {:>10}", "DOCUMENT", "CONFLICTS"));
        lines.push("-".repeat(51));
        for doc in &scan.conflicted {
            lines.push(format!("{:<40} {:>10}", doc.id, doc.conflicts));
        }
    }
    lines.extend(skipped_lines(scan));
    lines
}

/// Print [`conflict_list`].
pub fn print_conflict_list(scan: &ScanReport) {
    for line in conflict_list(scan) {
        println!("{}", line);
    }
}

/// Conflict set of one document, without changing it.
pub fn print_document_conflicts(db: &str, snapshot: &DocumentSnapshot) {
    if !snapshot.has_conflicts() {
        println!("{}/{}: no conflicts (rev {})", db, snapshot.id, snapshot.current);
        return;
    }
    println!(
        "{}/{}: current rev {}, {} conflicting revision(s)",
        db,
        snapshot.id,
        snapshot.current,
        snapshot.conflicts.len()
    );
    for rev in &snapshot.conflicts {
        println!("  {}", rev);
    }
}

fn skipped_lines(scan: &ScanReport) -> impl Iterator<Item = String> + '_ {
    scan.skipped
        .iter()
        .map(|s| format!("  skipped {}: {}", s.id, s.reason))
}

fn print_skipped(scan: &ScanReport) {
    for line in skipped_lines(scan) {
        println!("{}", line);
    }
}

/// Outcome of resolving a single document.
pub fn print_resolution(resolution: &Resolution) {
    match resolution.kind {
        ResolutionKind::NoConflict => {
            println!("{}/{}: no conflicts (rev {})", resolution.db, resolution.doc_id, resolution.winner);
        }
        ResolutionKind::Resolved => {
            let stamp = resolution
                .winner_created_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            println!(
                "{}/{}: kept rev {} (created {}), removed {} revision(s)",
                resolution.db,
                resolution.doc_id,
                resolution.winner,
                stamp,
                resolution.removed.len()
            );
            if resolution.promoted_conflict() {
                println!("  former current rev {} replaced", resolution.previous_current);
            }
            for rev in &resolution.superseded {
                println!("  rev {} was superseded by another writer", rev);
            }
            for rev in &resolution.new_leaves {
                println!("  new rev {} appeared during resolution, rerun to resolve", rev);
            }
        }
    }
}

/// Tally of a database-wide resolve sweep.
pub fn print_resolve_summary(scan: &ScanReport, summary: &ResolveSummary) {
    println!(
        "Resolved {} of {} conflicted documents in {} ({} already clean, {} failed)",
        summary.resolved(),
        summary.attempted,
        summary.db,
        summary.unchanged(),
        summary.failures.len()
    );
    for failure in &summary.failures {
        println!("  FAILED {}: {}", failure.doc_id, failure.error);
    }
    print_skipped(scan);
}

fn node_status(node: &NodeReport) -> String {
    if node.reachable {
        format!("up ({})", node.version.as_deref().unwrap_or("?"))
    } else {
        format!("DOWN: {}", node.error.as_deref().unwrap_or("unreachable"))
    }
}

/// Per-node status followed by per-database counts and verdicts.
pub fn print_consistency(report: &ConsistencyReport, verbose: bool) {
    println!("Round {}", report.round);
    println!("{:<8} {:<16} {:>6}  {}", "NODE", "REGION", "LINKS", "STATUS");
    println!("{}", "-".repeat(60));
    for node in &report.nodes {
        let links = node
            .links_total
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{:<8} {:<16} {:>6}  {}", node.node, node.region, links, node_status(node));
    }

    for db in &report.databases {
        println!();
        println!("{}: {}", db.db, verdict_detail(&db.verdict));
        for node in report.nodes.iter().filter(|n| n.reachable) {
            let Some(obs) = node.databases.get(&db.db) else {
                continue;
            };
            let count = match &obs.state {
                DatabaseState::Present(info) => info.doc_count.to_string(),
                DatabaseState::Missing => "missing".to_string(),
                DatabaseState::Failed(e) => format!("error: {}", e),
            };
            let mut line = format!(
                "  {:<8} {:>10} docs  {}/{} links",
                node.node, count, obs.outbound_links, report.expected_links_per_db
            );
            if verbose {
                if let DatabaseState::Present(info) = &obs.state {
                    line.push_str(&format!(
                        "  deleted {}  disk {}  data {}",
                        info.doc_del_count,
                        format_mb(info.disk_size),
                        format_mb(info.data_size)
                    ));
                }
            }
            println!("{}", line);
        }
        if !db.incomplete_links.is_empty() {
            println!("  incomplete replication on: {}", db.incomplete_links.join(", "));
        }
    }
    println!();
}

/// Which nodes answered the startup probe.
pub fn print_readiness(readiness: &NodeReadiness) {
    for (node, attempt) in &readiness.ready {
        println!("node {} ready (attempt {})", node, attempt);
    }
    for node in &readiness.unavailable {
        println!("node {} UNAVAILABLE, links involving it will be skipped", node);
    }
}

/// Databases created during setup.
pub fn print_database_setup(report: &DatabaseSetupReport) {
    println!(
        "Databases: {} created, {} existing, {} failed",
        report.created.len(),
        report.existing.len(),
        report.failed.len()
    );
    for (node, db, error) in &report.failed {
        println!("  {}/{}: {}", node, db, error);
    }
}

/// Links declared by `setup`.
pub fn print_mesh_report(report: &MeshReport, verbose: bool) {
    println!(
        "Replication mesh: {}/{} links established, {} skipped, {} failed",
        report.established.len(),
        report.expected,
        report.skipped.len(),
        report.failed.len()
    );
    if verbose {
        for key in &report.established {
            println!("  ok       {}", key);
        }
    }
    for skipped in &report.skipped {
        println!("  skipped  {} ({} unreachable)", skipped.key, skipped.node);
    }
    for failed in &report.failed {
        println!("  failed   {}: {}", failed.key, failed.error);
    }
}

/// Links found by `verify`.
pub fn print_mesh_audit(audit: &MeshAudit, verbose: bool) {
    println!(
        "Replication mesh: {}/{} links present, {} missing, {} unverified, {} foreign",
        audit.present.len(),
        audit.expected,
        audit.missing.len(),
        audit.unverified.len(),
        audit.foreign.len()
    );
    for (node, count) in &audit.links_per_node {
        println!("  {:<8} {} link document(s)", node, count);
    }
    if verbose {
        for key in &audit.present {
            println!("  present  {}", key);
        }
    }
    for key in &audit.missing {
        println!("  missing  {}", key);
    }
    for (node, id) in &audit.foreign {
        println!("  foreign  {} on {}", id, node);
    }
    for node in &audit.unreachable {
        println!("  node {} could not be audited", node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmesh_repl::scanner::{ConflictedDocument, SkippedDocument};

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(0), "0.00 MB");
        assert_eq!(format_mb(1024 * 1024), "1.00 MB");
        assert_eq!(format_mb(3 * 1024 * 1024 / 2), "1.50 MB");
    }

    #[test]
    fn test_clean_scan_still_lists_skipped_documents() {
        let scan = ScanReport {
            db: "orders".to_string(),
            scanned: 3,
            conflicted: Vec::new(),
            skipped: vec![SkippedDocument {
                id: "o-2".to_string(),
                reason: "connection to NA1 failed: timeout".to_string(),
            }],
        };
        let lines = conflict_list(&scan);
        assert_eq!(lines[0], "No conflicts in orders (3 documents scanned, 1 skipped)");
        assert_eq!(lines[1], "  skipped o-2: connection to NA1 failed: timeout");
    }

    #[test]
    fn test_conflict_list_table() {
        let scan = ScanReport {
            db: "orders".to_string(),
            scanned: 2,
            conflicted: vec![ConflictedDocument { id: "o-1".to_string(), conflicts: 2 }],
            skipped: Vec::new(),
        };
        let lines = conflict_list(&scan);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Conflicts in orders (1 of 2 documents, 0 skipped)"));
        assert!(lines[3].starts_with("o-1"));
    }

    #[test]
    fn test_verdict_detail() {
        assert_eq!(verdict_detail(&Verdict::Coherent { count: 10 }), "coherent (10 docs)");
        assert_eq!(
            verdict_detail(&Verdict::Stuck { min: 0, max: 10, rounds: 4 }),
            "STUCK (0..10 docs for 4 rounds)"
        );
        assert!(verdict_detail(&Verdict::Converging { min: 1, max: 2, rounds: 1 })
            .starts_with("converging"));
    }
}
