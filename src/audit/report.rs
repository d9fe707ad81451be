// src/audit/report.rs

use serde::Serialize;
use std::collections::HashMap;

use crate::models::{DuplicateGroup, EntityStatus};
use crate::visual::ArchiveCard;

/// One entity's failure during a sweep. Collected, never fatal to the batch.
#[derive(Debug, Clone, Serialize)]
pub struct EntityError {
    pub entity_id: String,
    pub message: String,
}

/// A fix the audit engine wants to make, with a before/after diff. Safe
/// (information-preserving) fixes apply automatically under `--apply`;
/// destructive ones only report.
#[derive(Debug, Clone, Serialize)]
pub struct ProposedFix {
    pub entity_id: String,
    pub description: String,
    pub before: String,
    pub after: String,
    pub safe: bool,
}

/// Display-ready archive card generated for one Tier-3 entity during a
/// sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveCardEntry {
    pub entity_id: String,
    pub card: ArchiveCard,
}

#[derive(Debug, Default, Serialize)]
pub struct AuditReport {
    pub run_id: String,
    pub scanned: usize,
    /// Unchanged signature since last audit: untouched this run.
    pub skipped_unchanged: usize,
    pub validated: usize,
    pub unverified: usize,
    pub needs_rework: Vec<String>,
    pub purged: Vec<String>,
    pub rejected: Vec<String>,
    /// Transient source failures; these entities are retried next sweep.
    pub lookup_failures: usize,
    /// Entities whose imagery scored Tier 3 and now carry an archive card.
    pub archive_cards: usize,
    pub cards: Vec<ArchiveCardEntry>,
    pub duplicates_found: Vec<DuplicateGroup>,
    pub fixes: Vec<ProposedFix>,
    pub fixes_applied: usize,
    pub errors: Vec<EntityError>,
    /// Store writes performed (0 in dry-run; 0 again on an idempotent rerun).
    pub writes: usize,
    /// Lost optimistic-version races. Retryable, not errors: the next sweep
    /// sees the fresh row.
    pub write_conflicts: usize,
    pub cancelled: bool,
    pub status_counts: HashMap<String, usize>,
}

impl AuditReport {
    /// Flagged-for-review outcomes are normal; only hard per-entity errors
    /// make a run unclean.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn record_status_counts(&mut self, counts: &HashMap<EntityStatus, usize>) {
        self.status_counts = counts
            .iter()
            .map(|(status, n)| (status.as_str().to_string(), *n))
            .collect();
    }

    /// Duplicate groups bucketed by confidence decile, for the status
    /// command's histogram.
    pub fn confidence_buckets(&self) -> Vec<(String, usize)> {
        let mut buckets = vec![0usize; 10];
        for group in &self.duplicates_found {
            let idx = ((group.confidence * 10.0) as usize).min(9);
            buckets[idx] += 1;
        }
        buckets
            .into_iter()
            .enumerate()
            .map(|(i, n)| (format!("{:.1}-{:.1}", i as f64 / 10.0, (i + 1) as f64 / 10.0), n))
            .collect()
    }

    pub fn print_summary(&self) {
        println!("Audit run {}", self.run_id);
        println!("  scanned:            {}", self.scanned);
        println!("  skipped (unchanged): {}", self.skipped_unchanged);
        println!("  validated:          {}", self.validated);
        println!("  unverified:         {}", self.unverified);
        println!("  needs rework:       {}", self.needs_rework.len());
        println!("  purged:             {}", self.purged.len());
        println!("  rejected:           {}", self.rejected.len());
        println!("  lookup failures:    {}", self.lookup_failures);
        println!("  archive cards:      {}", self.archive_cards);
        println!("  duplicate groups:   {}", self.duplicates_found.len());
        println!("  fixes proposed:     {} (applied {})", self.fixes.len(), self.fixes_applied);
        println!("  writes:             {}", self.writes);
        println!("  write conflicts:    {}", self.write_conflicts);
        println!("  errors:             {}", self.errors.len());
        if self.cancelled {
            println!("  (sweep cancelled before completion)");
        }
        if !self.duplicates_found.is_empty() {
            println!("  duplicate confidence histogram:");
            for (range, n) in self.confidence_buckets() {
                if n > 0 {
                    println!("    {range}: {n}");
                }
            }
        }
        for fix in &self.fixes {
            println!(
                "  fix [{}] {}: {:?} -> {:?}{}",
                fix.entity_id,
                fix.description,
                fix.before,
                fix.after,
                if fix.safe { "" } else { " (requires --apply)" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_buckets_cover_range() {
        let mut report = AuditReport::default();
        for conf in [0.05, 0.55, 0.95, 0.97, 1.0] {
            report.duplicates_found.push(DuplicateGroup {
                entity_ids: vec!["a".to_string(), "b".to_string()],
                confidence: conf,
                suggested_canonical_name: "a".to_string(),
            });
        }
        let buckets = report.confidence_buckets();
        assert_eq!(buckets.len(), 10);
        assert_eq!(buckets[0].1, 1);
        assert_eq!(buckets[5].1, 1);
        // 0.95, 0.97 and the 1.0 edge case all land in the top bucket.
        assert_eq!(buckets[9].1, 3);
    }

    #[test]
    fn clean_run_ignores_review_flags() {
        let mut report = AuditReport::default();
        report.needs_rework.push("e1".to_string());
        assert!(report.is_clean());
        report.errors.push(EntityError {
            entity_id: "e2".to_string(),
            message: "store write failed".to_string(),
        });
        assert!(!report.is_clean());
    }
}
