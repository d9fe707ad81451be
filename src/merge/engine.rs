// src/merge/engine.rs
//
// Executes a duplicate group: picks the canonical survivor, folds the
// absorbed records into it, re-points foreign references, and writes one
// immutable merge log entry. Dry-run builds the exact same plan through the
// exact same code path and stops short of the store write, so a preview can
// never drift from what apply would do.

use anyhow::{anyhow, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::db::{CatalogStore, MergeConflict, MergePlan};
use crate::models::{DuplicateGroup, Entity, MergeLogEntry};

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub dry_run: bool,
    /// Sum absorbed records' usage counters into the survivor instead of
    /// discarding them.
    pub preserve_analytics: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            preserve_analytics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub survivor_id: String,
    pub survivor_name: String,
    pub absorbed_ids: Vec<String>,
    pub aliases_added: Vec<String>,
    pub analytics_total: i64,
    pub repointed_refs: Vec<String>,
    pub group_confidence: f64,
    pub applied: bool,
}

/// Index of the canonical survivor within a group: an external identifier
/// beats none, then data completeness, then usage frequency, then id for a
/// deterministic tiebreak.
pub fn select_survivor(members: &[&Entity]) -> usize {
    let mut best = 0usize;
    for (i, candidate) in members.iter().enumerate().skip(1) {
        let current = members[best];
        let ranking = (
            candidate.external_id.is_some(),
            candidate.completeness(),
            candidate.view_count,
            std::cmp::Reverse(candidate.id.as_str()),
        );
        let incumbent = (
            current.external_id.is_some(),
            current.completeness(),
            current.view_count,
            std::cmp::Reverse(current.id.as_str()),
        );
        if ranking > incumbent {
            best = i;
        }
    }
    best
}

/// Build the in-memory plan for a group. Shared verbatim between dry-run
/// and apply.
pub fn build_plan(members: &[&Entity], confidence: f64, opts: &MergeOptions) -> MergePlan {
    let survivor_idx = select_survivor(members);
    let survivor = members[survivor_idx];

    let mut aliases_to_add: Vec<String> = Vec::new();
    let mut absorbed_ids = Vec::new();
    for (i, member) in members.iter().enumerate() {
        if i == survivor_idx {
            continue;
        }
        absorbed_ids.push(member.id.clone());
        for name in member.all_names() {
            if name != survivor.name
                && !survivor.aliases.iter().any(|a| a == name)
                && !aliases_to_add.iter().any(|a| a == name)
            {
                aliases_to_add.push(name.to_string());
            }
        }
    }

    let analytics_total = if opts.preserve_analytics {
        members.iter().map(|m| m.view_count).sum()
    } else {
        survivor.view_count
    };

    let mut member_ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
    member_ids.sort();

    MergePlan {
        survivor_id: survivor.id.clone(),
        survivor_name: survivor.name.clone(),
        absorbed_ids,
        aliases_to_add,
        analytics_total,
        group_confidence: confidence,
        lock_key: MergePlan::cluster_lock_key(&member_ids),
    }
}

/// Merge one duplicate group. With `dry_run` the returned result has the
/// identical shape and survivor decision but `applied == false` and the
/// catalog is untouched.
pub async fn merge_group(
    store: Arc<dyn CatalogStore>,
    group: &DuplicateGroup,
    opts: &MergeOptions,
    config: &PipelineConfig,
) -> Result<MergeResult> {
    if group.entity_ids.len() < 2 {
        return Err(anyhow!("merge group needs at least 2 members"));
    }

    let mut members = Vec::with_capacity(group.entity_ids.len());
    for id in &group.entity_ids {
        match store.get(id).await? {
            Some(entity) => members.push(entity),
            None => {
                return Err(anyhow!(MergeConflict(format!(
                    "group member {id} no longer exists"
                ))))
            }
        }
    }
    let member_refs: Vec<&Entity> = members.iter().collect();
    let plan = build_plan(&member_refs, group.confidence, opts);

    if opts.dry_run {
        // Preview the re-pointing without writing.
        let mut repointed = std::collections::HashSet::new();
        for absorbed in &plan.absorbed_ids {
            repointed.extend(store.referencing_ids(absorbed).await?);
        }
        let mut repointed: Vec<String> = repointed.into_iter().collect();
        repointed.sort();

        info!(
            "[dry-run] would merge {:?} into {} ({} aliases, {} refs, views -> {})",
            plan.absorbed_ids,
            plan.survivor_id,
            plan.aliases_to_add.len(),
            repointed.len(),
            plan.analytics_total
        );
        return Ok(MergeResult {
            survivor_id: plan.survivor_id,
            survivor_name: plan.survivor_name,
            absorbed_ids: plan.absorbed_ids,
            aliases_added: plan.aliases_to_add,
            analytics_total: plan.analytics_total,
            repointed_refs: repointed,
            group_confidence: plan.group_confidence,
            applied: false,
        });
    }

    let absorbed_aliases = plan.aliases_to_add.clone();
    let log_entry = MergeLogEntry {
        id: Uuid::new_v4().to_string(),
        survivor_id: plan.survivor_id.clone(),
        survivor_name: plan.survivor_name.clone(),
        absorbed_ids: plan.absorbed_ids.clone(),
        absorbed_aliases,
        // Filled from the transaction's actual result below.
        repointed_refs: Vec::new(),
        group_confidence: plan.group_confidence,
        merged_at: Utc::now(),
    };

    let repointed = store
        .apply_merge(&plan, &log_entry, config.sweep.merge_lock_timeout)
        .await?;

    info!(
        "Merged {:?} into {} ({} references re-pointed)",
        plan.absorbed_ids,
        plan.survivor_id,
        repointed.len()
    );
    Ok(MergeResult {
        survivor_id: plan.survivor_id,
        survivor_name: plan.survivor_name,
        absorbed_ids: plan.absorbed_ids,
        aliases_added: plan.aliases_to_add,
        analytics_total: plan.analytics_total,
        repointed_refs: repointed,
        group_confidence: plan.group_confidence,
        applied: true,
    })
}

/// Sweep outcome for a batch of candidate groups.
#[derive(Debug, Default, Serialize)]
pub struct MergeSweepReport {
    pub merged: Vec<MergeResult>,
    /// Below the auto-merge floor: surfaced for one-by-one confirmation.
    pub ambiguous: Vec<DuplicateGroup>,
    /// Lock contention or mid-merge invalidation; retried next sweep.
    pub conflicts: Vec<String>,
    pub hard_errors: Vec<String>,
}

/// Merge every group at or above `min_confidence`; merges affecting a given
/// cluster are serialized by the store's exclusive section, and the sweep
/// itself runs groups one at a time for the same reason.
pub async fn run_merge_sweep(
    store: Arc<dyn CatalogStore>,
    groups: Vec<DuplicateGroup>,
    min_confidence: f64,
    opts: &MergeOptions,
    config: &PipelineConfig,
) -> MergeSweepReport {
    let mut report = MergeSweepReport::default();
    let pb = ProgressBar::new(groups.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    for group in groups {
        if group.confidence < min_confidence {
            report.ambiguous.push(group);
            pb.inc(1);
            continue;
        }
        match merge_group(store.clone(), &group, opts, config).await {
            Ok(result) => report.merged.push(result),
            Err(err) if err.downcast_ref::<MergeConflict>().is_some() => {
                warn!("Merge conflict for {:?}: {err}", group.entity_ids);
                report.conflicts.push(err.to_string());
            }
            Err(err) => {
                warn!("Merge failed for {:?}: {err}", group.entity_ids);
                report.hard_errors.push(err.to_string());
            }
        }
        pb.inc(1);
        pb.set_message(format!(
            "{} merged, {} ambiguous, {} conflicts",
            report.merged.len(),
            report.ambiguous.len(),
            report.conflicts.len()
        ));
    }
    pb.finish_and_clear();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryCatalog;
    use crate::models::EntityKind;

    fn person(id: &str, name: &str, views: i64) -> Entity {
        let mut e = Entity::new(id, EntityKind::Person, name);
        e.view_count = views;
        e
    }

    fn group(ids: &[&str], confidence: f64) -> DuplicateGroup {
        DuplicateGroup {
            entity_ids: ids.iter().map(|s| s.to_string()).collect(),
            confidence,
            suggested_canonical_name: String::new(),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn survivor_prefers_external_id_over_popularity() {
        let mut a = person("p1", "Radhika", 50_000);
        let mut b = person("p2", "Raadhika", 3);
        a.external_id = None;
        b.external_id = Some("nm123".to_string());
        assert_eq!(select_survivor(&[&a, &b]), 1);
    }

    #[test]
    fn survivor_falls_back_to_completeness_then_views() {
        let mut a = person("p1", "Radhika", 10);
        let b = person("p2", "Raadhika", 500);
        a.year = Some(1963);
        a.occupations.push("actor".to_string());
        // a is more complete despite fewer views.
        assert_eq!(select_survivor(&[&a, &b]), 0);

        let c = person("p3", "Radhika", 10);
        let d = person("p4", "Raadhika", 500);
        assert_eq!(select_survivor(&[&c, &d]), 1);
    }

    #[test]
    fn survivor_selection_is_deterministic_on_ties() {
        let a = person("p1", "Radhika", 0);
        let b = person("p2", "Raadhika", 0);
        // Identical ranking: lowest id wins, in either input order.
        assert_eq!(select_survivor(&[&a, &b]), 0);
        assert_eq!(select_survivor(&[&b, &a]), 1);
    }

    #[tokio::test]
    async fn merge_preserves_analytics_mass() {
        let store = Arc::new(MemoryCatalog::new());
        let mut survivor = person("p1", "Radhika", 100);
        survivor.external_id = Some("nm1".to_string());
        store.insert(survivor);
        store.insert(person("p2", "Raadhika", 40));
        store.insert(person("p3", "Radhikaa", 5));

        let opts = MergeOptions {
            dry_run: false,
            preserve_analytics: true,
        };
        let result = merge_group(
            store.clone(),
            &group(&["p1", "p2", "p3"], 0.95),
            &opts,
            &config(),
        )
        .await
        .unwrap();

        assert!(result.applied);
        assert_eq!(result.analytics_total, 145);
        let merged = store.get("p1").await.unwrap().unwrap();
        assert_eq!(merged.view_count, 145);
        assert!(merged.aliases.contains(&"Raadhika".to_string()));
        assert!(merged.aliases.contains(&"Radhikaa".to_string()));
    }

    #[tokio::test]
    async fn dry_run_matches_apply_decision() {
        let make_store = || {
            let store = Arc::new(MemoryCatalog::new());
            let mut a = person("p1", "Radhika", 100);
            a.external_id = Some("nm1".to_string());
            store.insert(a);
            store.insert(person("p2", "Raadhika", 40));
            store.add_reference("m1", "p2");
            store
        };

        let dry_store = make_store();
        let dry = merge_group(
            dry_store.clone(),
            &group(&["p1", "p2"], 0.95),
            &MergeOptions {
                dry_run: true,
                preserve_analytics: true,
            },
            &config(),
        )
        .await
        .unwrap();

        let apply_store = make_store();
        let applied = merge_group(
            apply_store.clone(),
            &group(&["p1", "p2"], 0.95),
            &MergeOptions {
                dry_run: false,
                preserve_analytics: true,
            },
            &config(),
        )
        .await
        .unwrap();

        // Identical decision and shape; only `applied` differs.
        assert_eq!(dry.survivor_id, applied.survivor_id);
        assert_eq!(dry.absorbed_ids, applied.absorbed_ids);
        assert_eq!(dry.aliases_added, applied.aliases_added);
        assert_eq!(dry.analytics_total, applied.analytics_total);
        assert_eq!(dry.repointed_refs, applied.repointed_refs);
        assert!(!dry.applied);
        assert!(applied.applied);

        // Dry run wrote nothing.
        assert!(dry_store.get("p2").await.unwrap().is_some());
        assert!(dry_store.merge_log_for_survivor("p1").await.unwrap().is_empty());
        // Apply did.
        assert!(apply_store.get("p2").await.unwrap().is_none());
        assert_eq!(
            apply_store.merge_log_for_survivor("p1").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn discard_analytics_keeps_survivor_counter() {
        let store = Arc::new(MemoryCatalog::new());
        let mut a = person("p1", "Radhika", 100);
        a.external_id = Some("nm1".to_string());
        store.insert(a);
        store.insert(person("p2", "Raadhika", 40));

        let result = merge_group(
            store.clone(),
            &group(&["p1", "p2"], 0.95),
            &MergeOptions {
                dry_run: false,
                preserve_analytics: false,
            },
            &config(),
        )
        .await
        .unwrap();
        assert_eq!(result.analytics_total, 100);
    }

    #[tokio::test]
    async fn sweep_routes_low_confidence_to_ambiguous() {
        let store = Arc::new(MemoryCatalog::new());
        store.insert(person("p1", "B V Prasad", 10));
        store.insert(person("p2", "L V Prasad", 10));
        store.insert(person("p3", "Radhika", 10));
        store.insert(person("p4", "Raadhika", 10));

        let groups = vec![group(&["p1", "p2"], 0.55), group(&["p3", "p4"], 0.95)];
        let report = run_merge_sweep(
            store.clone(),
            groups,
            0.9,
            &MergeOptions {
                dry_run: false,
                preserve_analytics: true,
            },
            &config(),
        )
        .await;

        assert_eq!(report.merged.len(), 1);
        assert_eq!(report.ambiguous.len(), 1);
        assert!(report.conflicts.is_empty());
        // The ambiguous pair is untouched.
        assert!(store.get("p1").await.unwrap().is_some());
        assert!(store.get("p2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_reports_lock_contention_as_conflict() {
        let store = Arc::new(MemoryCatalog::new());
        store.insert(person("p1", "Radhika", 10));
        store.insert(person("p2", "Raadhika", 10));
        let key = MergePlan::cluster_lock_key(&["p1".to_string(), "p2".to_string()]);
        store.hold_lock(key);

        let mut config = config();
        config.sweep.merge_lock_timeout = std::time::Duration::from_millis(30);

        let report = run_merge_sweep(
            store.clone(),
            vec![group(&["p1", "p2"], 0.95)],
            0.9,
            &MergeOptions {
                dry_run: false,
                preserve_analytics: true,
            },
            &config,
        )
        .await;

        assert!(report.merged.is_empty());
        assert_eq!(report.conflicts.len(), 1);
        assert!(store.get("p2").await.unwrap().is_some());
    }
}
