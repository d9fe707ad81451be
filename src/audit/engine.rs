// src/audit/engine.rs
//
// Batch sweep over the existing catalog: re-validates every entity through
// the identity gate, walks the status lattice, re-scores imagery, proposes
// or applies safe fixes, and emits duplicate groups for the merge engine.
// The engine itself never merges and a single entity's failure never aborts
// the batch.

use anyhow::Result;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::audit::report::{ArchiveCardEntry, AuditReport, EntityError, ProposedFix};
use crate::config::PipelineConfig;
use crate::db::CatalogStore;
use crate::identity::gate::{validate_candidate, Candidate};
use crate::identity::source::AuthoritativeSource;
use crate::merge::candidates::find_merge_candidates;
use crate::models::{Entity, EntityKind, EntityStatus, ValidationOutcome};
use crate::normalize::{canonicalize, names_match};
use crate::visual::scorer::demote_if_unreachable;
use crate::visual::{score_visual, ArchiveCard, SourceRegistry, VisualTier};

#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Cap on entities scanned this run.
    pub limit: Option<usize>,
    /// Write transitions, safe fixes and signatures back to the store.
    /// Off = dry run: full report, zero writes.
    pub apply: bool,
    /// Re-audit entities whose signature is unchanged.
    pub force: bool,
    /// Run duplicate discovery after the scan.
    pub find_duplicates: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            limit: None,
            apply: false,
            force: false,
            find_duplicates: true,
        }
    }
}

/// Signature over the audit-relevant fields. Excludes the signature itself
/// and the version counter, so a stamped entity hashes identically on the
/// next sweep and gets skipped.
pub fn compute_signature(entity: &Entity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(entity.kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(entity.external_id.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(entity.year.unwrap_or(0).to_be_bytes());
    hasher.update(entity.status.as_str().as_bytes());
    hasher.update(entity.audit_strikes.to_be_bytes());
    for alias in &entity.aliases {
        hasher.update(alias.as_bytes());
        hasher.update([1u8]);
    }
    for (field, value) in entity.roles.iter_present() {
        hasher.update(field.as_bytes());
        hasher.update([2u8]);
        hasher.update(value.as_bytes());
    }
    for member in &entity.supporting_cast {
        hasher.update(member.name.as_bytes());
        hasher.update([3u8]);
        hasher.update(member.role.as_bytes());
    }
    if let Some(image) = &entity.image {
        hasher.update(image.url.as_deref().unwrap_or("").as_bytes());
        hasher.update([4u8]);
        hasher.update(image.source.as_deref().unwrap_or("").as_bytes());
        hasher.update(image.tier.unwrap_or(0).to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

enum AuditClass {
    SkippedUnchanged(EntityStatus),
    Terminal(EntityStatus),
    Validated,
    Unverified,
    NeedsRework,
    Rejected,
    Purged,
    LookupFailed,
}

struct EntityOutcome {
    entity_id: String,
    class: AuditClass,
    fixes: Vec<ProposedFix>,
    archive_card: Option<ArchiveCard>,
    wrote: bool,
    /// Lost the optimistic write race; retried next sweep, not an error.
    conflict: bool,
    error: Option<String>,
}

/// Safe, information-preserving fixes only. Anything that would destroy
/// information stays a proposal regardless of flags.
fn propose_fixes(entity: &mut Entity, config: &PipelineConfig, apply: bool) -> (Vec<ProposedFix>, bool) {
    let mut fixes = Vec::new();
    let mut changed = false;

    // A supporting-cast member duplicating a primary-cast field carries no
    // extra information; the primary field is authoritative.
    let primary: Vec<String> = entity
        .roles
        .iter_present()
        .map(|(_, v)| v.to_string())
        .collect();
    let duplicated: Vec<usize> = entity
        .supporting_cast
        .iter()
        .enumerate()
        .filter(|(_, member)| {
            primary
                .iter()
                .any(|field| names_match(&member.name, field, &config.matcher))
        })
        .map(|(i, _)| i)
        .collect();
    for &idx in duplicated.iter().rev() {
        let member = &entity.supporting_cast[idx];
        fixes.push(ProposedFix {
            entity_id: entity.id.clone(),
            description: "supporting-cast member duplicates primary cast".to_string(),
            before: member.name.clone(),
            after: String::new(),
            safe: true,
        });
        if apply {
            entity.supporting_cast.remove(idx);
            changed = true;
        }
    }

    // Professional duos stored as one half: complete to the joint form when
    // the year falls in the duo's active range. Exact canonical comparison
    // only; the token matcher would also accept the already-complete form.
    if entity.kind == EntityKind::Movie {
        if let (Some(year), Some(composer)) = (entity.year, entity.roles.composer.clone()) {
            let canon = canonicalize(&composer);
            for rule in &config.duo_rules {
                if (rule.from_year..=rule.to_year).contains(&year)
                    && canon == canonicalize(&rule.partial)
                {
                    fixes.push(ProposedFix {
                        entity_id: entity.id.clone(),
                        description: "completed professional duo name".to_string(),
                        before: composer.clone(),
                        after: rule.full.clone(),
                        safe: true,
                    });
                    if apply {
                        entity.roles.composer = Some(rule.full.clone());
                        changed = true;
                    }
                    break;
                }
            }
        }
    }

    (fixes, changed)
}

async fn audit_one(
    mut entity: Entity,
    store: Arc<dyn CatalogStore>,
    source: Arc<dyn AuthoritativeSource>,
    registry: Arc<SourceRegistry>,
    config: Arc<PipelineConfig>,
    opts: AuditOptions,
    http: reqwest::Client,
) -> EntityOutcome {
    let entity_id = entity.id.clone();

    if entity.status.is_terminal() {
        return EntityOutcome {
            entity_id,
            class: AuditClass::Terminal(entity.status),
            fixes: Vec::new(),
            archive_card: None,
            wrote: false,
            conflict: false,
            error: None,
        };
    }

    if !opts.force {
        if let Some(stamped) = &entity.audit_signature {
            if *stamped == compute_signature(&entity) {
                return EntityOutcome {
                    entity_id,
                    class: AuditClass::SkippedUnchanged(entity.status),
                    fixes: Vec::new(),
                    archive_card: None,
                    wrote: false,
                    conflict: false,
                    error: None,
                };
            }
        }
    }

    let candidate = Candidate {
        kind: entity.kind,
        name: entity.name.clone(),
        year: entity.year,
        require_year: entity.kind == EntityKind::Movie,
    };
    let validation = match validate_candidate(&candidate, source.as_ref(), &config).await {
        Ok(v) => v,
        Err(e) => {
            return EntityOutcome {
                entity_id,
                class: AuditClass::LookupFailed,
                fixes: Vec::new(),
                archive_card: None,
                wrote: false,
                conflict: false,
                error: Some(e.to_string()),
            }
        }
    };

    let class = match validation.outcome {
        ValidationOutcome::LookupFailed => {
            // Transient; leave the record alone so the next sweep retries.
            return EntityOutcome {
                entity_id,
                class: AuditClass::LookupFailed,
                fixes: Vec::new(),
                archive_card: None,
                wrote: false,
                conflict: false,
                error: None,
            };
        }
        ValidationOutcome::Verified => {
            entity.status = EntityStatus::Verified;
            entity.audit_strikes = 0;
            if validation.external_id.is_some() {
                entity.external_id = validation.external_id.clone();
            }
            entity.slug = validation.slug.clone();
            AuditClass::Validated
        }
        ValidationOutcome::Rejected => match entity.status {
            EntityStatus::Unverified => {
                entity.status = EntityStatus::Rejected;
                AuditClass::Rejected
            }
            EntityStatus::Verified => {
                // One failed audit may be an upstream hiccup; demote, don't
                // purge.
                entity.status = EntityStatus::NeedsRework;
                entity.audit_strikes += 1;
                AuditClass::NeedsRework
            }
            EntityStatus::NeedsRework => {
                entity.audit_strikes += 1;
                if entity.audit_strikes >= config.sweep.purge_strikes {
                    entity.status = EntityStatus::Purged;
                    AuditClass::Purged
                } else {
                    AuditClass::NeedsRework
                }
            }
            _ => AuditClass::Rejected,
        },
        ValidationOutcome::Unverified => match entity.status {
            EntityStatus::Verified => {
                entity.status = EntityStatus::NeedsRework;
                entity.audit_strikes += 1;
                AuditClass::NeedsRework
            }
            EntityStatus::NeedsRework => {
                entity.audit_strikes += 1;
                if entity.audit_strikes >= config.sweep.purge_strikes {
                    entity.status = EntityStatus::Purged;
                    AuditClass::Purged
                } else {
                    AuditClass::NeedsRework
                }
            }
            _ => AuditClass::Unverified,
        },
    };

    let (fixes, _) = propose_fixes(&mut entity, &config, opts.apply);

    // Visual confidence is recomputed on every audit and written back onto
    // the image metadata. The reachability probe is the only network I/O in
    // scoring and stays off unless configured.
    let mut scored = score_visual(entity.image.as_ref(), &registry, &config.visual);
    if config.visual.check_reachability && scored.tier != VisualTier::Tier3 {
        if let Some(url) = entity.image.as_ref().and_then(|i| i.url.clone()) {
            scored = demote_if_unreachable(scored, &url, &http).await;
        }
    }
    if let Some(image) = entity.image.as_mut() {
        image.tier = Some(scored.tier.as_u8());
        image.confidence = Some(scored.confidence);
    }
    let archive_card = ArchiveCard::generate(&entity, &scored);

    let mut wrote = false;
    let mut conflict = false;
    let mut error = None;
    if opts.apply {
        entity.audit_signature = Some(compute_signature(&entity));
        match store.update(&entity).await {
            Ok(true) => wrote = true,
            Ok(false) => {
                // Lost the optimistic race to a concurrent writer; the next
                // sweep sees the fresh row.
                conflict = true;
            }
            Err(e) => error = Some(e.to_string()),
        }
    }

    debug!(
        "Audited {} -> {} (wrote={})",
        entity_id,
        entity.status.as_str(),
        wrote
    );
    EntityOutcome {
        entity_id,
        class,
        fixes,
        archive_card,
        wrote,
        conflict,
        error,
    }
}

fn fold_outcome(report: &mut AuditReport, outcome: EntityOutcome) {
    report.scanned += 1;
    match outcome.class {
        AuditClass::SkippedUnchanged(status) => {
            report.skipped_unchanged += 1;
            // Classify by stored status so a rerun over an unchanged catalog
            // reports the same shape as the run that stamped it.
            match status {
                EntityStatus::Verified => report.validated += 1,
                EntityStatus::Unverified => report.unverified += 1,
                EntityStatus::NeedsRework => report.needs_rework.push(outcome.entity_id.clone()),
                _ => {}
            }
        }
        AuditClass::Terminal(status) => match status {
            EntityStatus::Rejected => report.rejected.push(outcome.entity_id.clone()),
            EntityStatus::Purged => report.purged.push(outcome.entity_id.clone()),
            _ => {}
        },
        AuditClass::Validated => report.validated += 1,
        AuditClass::Unverified => report.unverified += 1,
        AuditClass::NeedsRework => report.needs_rework.push(outcome.entity_id.clone()),
        AuditClass::Rejected => report.rejected.push(outcome.entity_id.clone()),
        AuditClass::Purged => report.purged.push(outcome.entity_id.clone()),
        AuditClass::LookupFailed => report.lookup_failures += 1,
    }
    if let Some(card) = outcome.archive_card {
        report.archive_cards += 1;
        report.cards.push(ArchiveCardEntry {
            entity_id: outcome.entity_id.clone(),
            card,
        });
    }
    report.fixes_applied += outcome
        .fixes
        .iter()
        .filter(|f| f.safe && outcome.wrote)
        .count();
    report.fixes.extend(outcome.fixes);
    if outcome.wrote {
        report.writes += 1;
    }
    if outcome.conflict {
        report.write_conflicts += 1;
    }
    if let Some(message) = outcome.error {
        report.errors.push(EntityError {
            entity_id: outcome.entity_id,
            message,
        });
    }
}

fn memory_usage_mb() -> u64 {
    use sysinfo::System;
    let mut sys = System::new_all();
    sys.refresh_memory();
    sys.used_memory() / (1024 * 1024)
}

/// Sweep the catalog. Entities within a chunk are audited concurrently;
/// cancellation is honored at chunk boundaries so in-flight writes always
/// complete.
pub async fn run_audit(
    store: Arc<dyn CatalogStore>,
    source: Arc<dyn AuthoritativeSource>,
    registry: Arc<SourceRegistry>,
    config: Arc<PipelineConfig>,
    opts: AuditOptions,
    mut cancel: watch::Receiver<bool>,
) -> Result<AuditReport> {
    let mut report = AuditReport {
        run_id: Uuid::new_v4().to_string(),
        ..Default::default()
    };
    info!(
        "Audit sweep {} starting (apply={}, limit={:?})",
        report.run_id, opts.apply, opts.limit
    );

    let http = reqwest::Client::new();
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let mut offset = 0usize;
    'sweep: loop {
        if *cancel.borrow_and_update() {
            report.cancelled = true;
            warn!("Audit sweep cancelled at batch boundary");
            break;
        }

        let mut batch = store.fetch_batch(offset, config.sweep.batch_size).await?;
        if batch.is_empty() {
            break;
        }
        offset += batch.len();
        if let Some(limit) = opts.limit {
            let remaining = limit.saturating_sub(report.scanned);
            if remaining == 0 {
                break;
            }
            batch.truncate(remaining);
        }

        for chunk in batch.chunks(config.sweep.max_concurrent_batches.max(1)) {
            let tasks: Vec<_> = chunk
                .iter()
                .cloned()
                .map(|entity| {
                    tokio::spawn(audit_one(
                        entity,
                        store.clone(),
                        source.clone(),
                        registry.clone(),
                        config.clone(),
                        opts.clone(),
                        http.clone(),
                    ))
                })
                .collect();
            for joined in join_all(tasks).await {
                match joined {
                    Ok(outcome) => fold_outcome(&mut report, outcome),
                    Err(e) => report.errors.push(EntityError {
                        entity_id: "<task>".to_string(),
                        message: format!("audit task panicked: {e}"),
                    }),
                }
            }
        }

        pb.set_message(format!(
            "audited {} entities ({} writes, {} MB)",
            report.scanned,
            report.writes,
            memory_usage_mb()
        ));

        if let Some(limit) = opts.limit {
            if report.scanned >= limit {
                break 'sweep;
            }
        }
    }
    pb.finish_and_clear();

    if opts.find_duplicates && !report.cancelled {
        report.duplicates_found =
            find_merge_candidates(store.clone(), &config, opts.limit).await?;
    }

    report.record_status_counts(&store.count_by_status().await?);
    info!(
        "Audit sweep {} complete: {} scanned, {} writes, {} errors, {} duplicate groups",
        report.run_id,
        report.scanned,
        report.writes,
        report.errors.len(),
        report.duplicates_found.len()
    );
    Ok(report)
}
