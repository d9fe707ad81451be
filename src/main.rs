// src/main.rs
//
// Operator entry point for the catalog integrity pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use catalog_lib::audit::{run_audit, AuditOptions, AuditReport};
use catalog_lib::config::PipelineConfig;
use catalog_lib::db::{connect, get_pool_status, CatalogStore, PgCatalog};
use catalog_lib::identity::gate::{validate_candidate, Candidate};
use catalog_lib::identity::source::RemoteSourceClient;
use catalog_lib::merge::{find_merge_candidates, run_merge_sweep, MergeOptions};
use catalog_lib::models::EntityKind;
use catalog_lib::visual::SourceRegistry;

#[derive(Parser)]
#[command(
    name = "catalog_audit",
    about = "Entity resolution and content integrity pipeline for the movie/person catalog"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep the catalog: re-validate entities, walk statuses, score
    /// imagery, propose fixes, report duplicate groups.
    Audit {
        /// Write transitions, safe fixes and signatures back to the store.
        #[arg(long)]
        apply: bool,
        /// Re-audit entities whose signature is unchanged.
        #[arg(long)]
        force: bool,
        /// Cap on entities scanned.
        #[arg(long)]
        limit: Option<usize>,
        /// Entities audited concurrently per chunk (default: CPU count).
        #[arg(long)]
        workers: Option<usize>,
        /// Skip duplicate discovery after the scan.
        #[arg(long)]
        no_duplicates: bool,
        /// Emit the full report as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
    /// Discover duplicate groups and merge those above the confidence floor.
    /// Dry-run by default; nothing is written without --apply.
    Merge {
        #[arg(long)]
        apply: bool,
        /// Minimum group confidence to merge; lower groups are surfaced for
        /// manual review.
        #[arg(long)]
        min_confidence: Option<f64>,
        /// Cap on entities considered during discovery.
        #[arg(long)]
        limit: Option<usize>,
        /// Drop absorbed view counters instead of folding them into the
        /// survivor.
        #[arg(long)]
        discard_analytics: bool,
    },
    /// Run a single candidate through the identity gate and print the
    /// verdict. Read-only.
    Validate {
        /// "movie" or "person".
        #[arg(long)]
        kind: String,
        #[arg(long)]
        name: String,
        /// Release year (movies) or birth year (people).
        #[arg(long)]
        year: Option<i32>,
    },
    /// Print entity counts per status.
    Status,
    /// Print the merge history folded into a surviving entity.
    MergeLog { survivor_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let config = Arc::new(PipelineConfig::from_env());

    match cli.command {
        Command::Audit {
            apply,
            force,
            limit,
            workers,
            no_duplicates,
            json,
        } => cmd_audit(config, apply, force, limit, workers, no_duplicates, json).await,
        Command::Merge {
            apply,
            min_confidence,
            limit,
            discard_analytics,
        } => cmd_merge(config, apply, min_confidence, limit, discard_analytics).await,
        Command::Validate { kind, name, year } => cmd_validate(config, &kind, &name, year).await,
        Command::Status => cmd_status(config).await,
        Command::MergeLog { survivor_id } => cmd_merge_log(&survivor_id).await,
    }
}

async fn open_store() -> Result<Arc<dyn CatalogStore>> {
    let pool = connect().await.context("Failed to connect to database")?;
    let (size, available) = get_pool_status(&pool);
    info!("Pool ready: {}/{} connections available", available, size);
    Ok(Arc::new(PgCatalog::new(pool)))
}

/// Flip the cancellation flag on ctrl-c; the sweep drains at the next batch
/// boundary instead of dying mid-write.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current batch");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn cmd_audit(
    config: Arc<PipelineConfig>,
    apply: bool,
    force: bool,
    limit: Option<usize>,
    workers: Option<usize>,
    no_duplicates: bool,
    json: bool,
) -> Result<()> {
    let config = match workers {
        Some(w) => {
            let mut cfg = (*config).clone();
            cfg.sweep.max_concurrent_batches = w.max(1);
            Arc::new(cfg)
        }
        None => config,
    };
    let store = open_store().await?;
    let source = Arc::new(RemoteSourceClient::from_env()?);
    let registry = Arc::new(SourceRegistry::standard());

    let opts = AuditOptions {
        limit,
        apply,
        force,
        find_duplicates: !no_duplicates,
    };
    if !apply {
        info!("Dry run: no writes will be performed (pass --apply to persist)");
    }

    let report = run_audit(store, source, registry, config, opts, cancel_on_ctrl_c()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_summary();
    }

    if report.is_clean() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn cmd_merge(
    config: Arc<PipelineConfig>,
    apply: bool,
    min_confidence: Option<f64>,
    limit: Option<usize>,
    discard_analytics: bool,
) -> Result<()> {
    let store = open_store().await?;
    let floor = min_confidence.unwrap_or(config.sweep.auto_merge_floor);
    let opts = MergeOptions {
        dry_run: !apply,
        preserve_analytics: !discard_analytics,
    };

    let groups = find_merge_candidates(store.clone(), &config, limit).await?;
    info!("{} duplicate groups discovered", groups.len());

    let report = run_merge_sweep(store, groups, floor, &opts, &config).await;
    for result in &report.merged {
        println!(
            "{} {} <- {:?} (confidence {:.3}, +{} aliases, {} refs repointed, {} views)",
            if result.applied { "merged" } else { "would merge" },
            result.survivor_name,
            result.absorbed_ids,
            result.group_confidence,
            result.aliases_added.len(),
            result.repointed_refs.len(),
            result.analytics_total,
        );
    }
    for group in &report.ambiguous {
        println!(
            "manual review: {:?} (confidence {:.3}, suggested {:?})",
            group.entity_ids, group.confidence, group.suggested_canonical_name
        );
    }
    for conflict in &report.conflicts {
        println!("conflict (retried next sweep): {conflict}");
    }

    if report.hard_errors.is_empty() {
        Ok(())
    } else {
        for err in &report.hard_errors {
            eprintln!("error: {err}");
        }
        std::process::exit(1);
    }
}

async fn cmd_validate(
    config: Arc<PipelineConfig>,
    kind: &str,
    name: &str,
    year: Option<i32>,
) -> Result<()> {
    let kind = EntityKind::from_str_loose(kind)
        .with_context(|| format!("Unknown entity kind {kind:?} (expected movie or person)"))?;
    let candidate = match kind {
        EntityKind::Movie => Candidate::movie(name, year),
        EntityKind::Person => Candidate::person(name, year),
    };

    let source = RemoteSourceClient::from_env()?;
    let result = validate_candidate(&candidate, &source, &config).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_status(config: Arc<PipelineConfig>) -> Result<()> {
    let store = open_store().await?;
    let counts = store.count_by_status().await?;
    let mut rows: Vec<_> = counts.iter().collect();
    rows.sort_by_key(|(status, _)| status.as_str());
    let total: usize = counts.values().sum();
    for (status, n) in rows {
        println!("{:>13}: {}", status.as_str(), n);
    }
    println!("{:>13}: {}", "total", total);

    let mut report = AuditReport::default();
    report.duplicates_found = find_merge_candidates(store, &config, None).await?;
    println!("duplicate groups: {}", report.duplicates_found.len());
    for (range, n) in report.confidence_buckets() {
        if n > 0 {
            println!("  {range}: {n}");
        }
    }
    Ok(())
}

async fn cmd_merge_log(survivor_id: &str) -> Result<()> {
    let store = open_store().await?;
    let entries = store.merge_log_for_survivor(survivor_id).await?;
    if entries.is_empty() {
        println!("No merges recorded for {survivor_id}");
        return Ok(());
    }
    for entry in entries {
        println!(
            "[{}] {} absorbed {:?} (confidence {:.3}, aliases {:?}, {} refs repointed)",
            entry.merged_at,
            entry.survivor_name,
            entry.absorbed_ids,
            entry.group_confidence,
            entry.absorbed_aliases,
            entry.repointed_refs.len(),
        );
    }
    Ok(())
}
