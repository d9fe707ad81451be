// src/db/pg.rs
//
// Postgres-backed catalog store. Expected schema:
//
//   entity(id text primary key, kind text, external_id text, name text,
//          aliases jsonb, year int4, roles jsonb, occupations jsonb,
//          supporting_cast jsonb, image jsonb, status text,
//          view_count int8, audit_strikes int4, audit_signature text,
//          version int8, slug text)
//   credit(record_id text, entity_id text)           -- foreign references
//   merge_log(id text primary key, survivor_id text, survivor_name text,
//             absorbed_ids jsonb, absorbed_aliases jsonb,
//             repointed_refs jsonb, group_confidence float8,
//             merged_at timestamptz)
//
// Merges run inside a single transaction holding a pg advisory xact lock on
// the cluster key, so two sweeps can never both claim the same group and a
// failed step rolls back every prior step.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tokio_postgres::Row;

use crate::db::catalog::{CatalogStore, MergeConflict, MergePlan};
use crate::db::PgPool;
use crate::models::{
    CastMember, Entity, EntityKind, EntityStatus, ImageRef, MergeLogEntry, RoleFields,
};

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ENTITY_COLUMNS: &str = "id, kind, external_id, name, aliases, year, roles, occupations, \
     supporting_cast, image, status, view_count, audit_strikes, audit_signature, version, slug";

fn row_to_entity(row: &Row) -> Result<Entity> {
    let kind_str: String = row.get("kind");
    let status_str: String = row.get("status");

    let aliases: serde_json::Value = row.get("aliases");
    let roles: serde_json::Value = row.get("roles");
    let occupations: serde_json::Value = row.get("occupations");
    let supporting_cast: serde_json::Value = row.get("supporting_cast");
    let image: Option<serde_json::Value> = row.get("image");

    Ok(Entity {
        id: row.get("id"),
        kind: EntityKind::from_str_loose(&kind_str)
            .ok_or_else(|| anyhow!("unknown entity kind {:?}", kind_str))?,
        external_id: row.get("external_id"),
        name: row.get("name"),
        aliases: serde_json::from_value::<Vec<String>>(aliases).unwrap_or_default(),
        year: row.get("year"),
        roles: serde_json::from_value::<RoleFields>(roles).unwrap_or_default(),
        occupations: serde_json::from_value::<Vec<String>>(occupations).unwrap_or_default(),
        supporting_cast: serde_json::from_value::<Vec<CastMember>>(supporting_cast)
            .unwrap_or_default(),
        image: image.and_then(|v| serde_json::from_value::<ImageRef>(v).ok()),
        status: EntityStatus::from_str_loose(&status_str)
            .ok_or_else(|| anyhow!("unknown entity status {:?}", status_str))?,
        view_count: row.get("view_count"),
        audit_strikes: row.get("audit_strikes"),
        audit_signature: row.get("audit_signature"),
        version: row.get("version"),
        slug: row.get("slug"),
    })
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn count_by_status(&self) -> Result<HashMap<EntityStatus, usize>> {
        let client = self.pool.get().await.context("pool checkout failed")?;
        let rows = client
            .query("SELECT status, COUNT(*) AS n FROM entity GROUP BY status", &[])
            .await
            .context("status count query failed")?;
        let mut counts = HashMap::new();
        for row in rows {
            let status_str: String = row.get("status");
            let n: i64 = row.get("n");
            if let Some(status) = EntityStatus::from_str_loose(&status_str) {
                counts.insert(status, n as usize);
            }
        }
        Ok(counts)
    }

    async fn fetch_batch(&self, offset: usize, limit: usize) -> Result<Vec<Entity>> {
        let client = self.pool.get().await.context("pool checkout failed")?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM entity ORDER BY id OFFSET $1 LIMIT $2"
                ),
                &[&(offset as i64), &(limit as i64)],
            )
            .await
            .context("batch fetch failed")?;
        rows.iter().map(row_to_entity).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let client = self.pool.get().await.context("pool checkout failed")?;
        let row = client
            .query_opt(
                &format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE id = $1"),
                &[&id],
            )
            .await
            .context("entity fetch failed")?;
        row.as_ref().map(row_to_entity).transpose()
    }

    async fn update(&self, entity: &Entity) -> Result<bool> {
        let client = self.pool.get().await.context("pool checkout failed")?;
        let aliases = serde_json::to_value(&entity.aliases)?;
        let roles = serde_json::to_value(&entity.roles)?;
        let occupations = serde_json::to_value(&entity.occupations)?;
        let supporting_cast = serde_json::to_value(&entity.supporting_cast)?;
        let image = entity
            .image
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let updated = client
            .execute(
                "UPDATE entity SET external_id = $1, name = $2, aliases = $3, year = $4, \
                 roles = $5, occupations = $6, supporting_cast = $7, image = $8, status = $9, \
                 view_count = $10, audit_strikes = $11, audit_signature = $12, slug = $13, \
                 version = version + 1 \
                 WHERE id = $14 AND version = $15",
                &[
                    &entity.external_id,
                    &entity.name,
                    &aliases,
                    &entity.year,
                    &roles,
                    &occupations,
                    &supporting_cast,
                    &image,
                    &entity.status.as_str(),
                    &entity.view_count,
                    &entity.audit_strikes,
                    &entity.audit_signature,
                    &entity.slug,
                    &entity.id,
                    &entity.version,
                ],
            )
            .await
            .context("optimistic entity update failed")?;
        Ok(updated == 1)
    }

    async fn referencing_ids(&self, entity_id: &str) -> Result<HashSet<String>> {
        let client = self.pool.get().await.context("pool checkout failed")?;
        let rows = client
            .query(
                "SELECT DISTINCT record_id FROM credit WHERE entity_id = $1",
                &[&entity_id],
            )
            .await
            .context("reference query failed")?;
        Ok(rows.iter().map(|r| r.get::<_, String>("record_id")).collect())
    }

    async fn apply_merge(
        &self,
        plan: &MergePlan,
        log_entry: &MergeLogEntry,
        lock_timeout: Duration,
    ) -> Result<Vec<String>> {
        let mut client = self.pool.get().await.context("pool checkout failed")?;
        let tx = client.transaction().await.context("begin failed")?;

        // Bounded wait for the cluster's advisory lock; xact-scoped, so a
        // rollback or commit always releases it.
        let deadline = Instant::now() + lock_timeout;
        loop {
            let row = tx
                .query_one("SELECT pg_try_advisory_xact_lock($1) AS ok", &[&plan.lock_key])
                .await
                .context("advisory lock probe failed")?;
            if row.get::<_, bool>("ok") {
                break;
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(MergeConflict(format!(
                    "cluster lock {} not acquired within {:?}",
                    plan.lock_key, lock_timeout
                ))));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Group members must all still exist; a concurrent merge or purge
        // invalidates the whole plan.
        let mut member_ids = plan.absorbed_ids.clone();
        member_ids.push(plan.survivor_id.clone());
        let present: i64 = tx
            .query_one(
                "SELECT COUNT(*) AS n FROM entity WHERE id = ANY($1)",
                &[&member_ids],
            )
            .await
            .context("member presence check failed")?
            .get("n");
        if present as usize != member_ids.len() {
            return Err(anyhow!(MergeConflict(
                "group member vanished before merge".to_string()
            )));
        }

        let repointed_rows = tx
            .query(
                "UPDATE credit SET entity_id = $1 WHERE entity_id = ANY($2) \
                 RETURNING record_id",
                &[&plan.survivor_id, &plan.absorbed_ids],
            )
            .await
            .context("reference re-pointing failed")?;
        let mut repointed: Vec<String> = repointed_rows
            .iter()
            .map(|r| r.get::<_, String>("record_id"))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        repointed.sort();

        let aliases_to_add = serde_json::to_value(&plan.aliases_to_add)?;
        tx.execute(
            "UPDATE entity SET \
               aliases = (SELECT jsonb_agg(DISTINCT a) FROM jsonb_array_elements(aliases || $1::jsonb) a), \
               view_count = $2, version = version + 1 \
             WHERE id = $3",
            &[&aliases_to_add, &plan.analytics_total, &plan.survivor_id],
        )
        .await
        .context("survivor update failed")?;

        tx.execute(
            "DELETE FROM entity WHERE id = ANY($1)",
            &[&plan.absorbed_ids],
        )
        .await
        .context("absorbed delete failed")?;

        let absorbed_ids = serde_json::to_value(&log_entry.absorbed_ids)?;
        let absorbed_aliases = serde_json::to_value(&log_entry.absorbed_aliases)?;
        let repointed_json = serde_json::to_value(&repointed)?;
        tx.execute(
            "INSERT INTO merge_log (id, survivor_id, survivor_name, absorbed_ids, \
             absorbed_aliases, repointed_refs, group_confidence, merged_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &log_entry.id,
                &log_entry.survivor_id,
                &log_entry.survivor_name,
                &absorbed_ids,
                &absorbed_aliases,
                &repointed_json,
                &log_entry.group_confidence,
                &log_entry.merged_at,
            ],
        )
        .await
        .context("merge log insert failed")?;

        // A commit failure rolls everything back server-side; report it as
        // retryable rather than half-applied.
        tx.commit()
            .await
            .map_err(|e| anyhow!(MergeConflict(format!("merge commit failed: {e}"))))?;

        debug!(
            "Merged {} absorbed ids into {} ({} references re-pointed)",
            plan.absorbed_ids.len(),
            plan.survivor_id,
            repointed.len()
        );
        Ok(repointed)
    }

    async fn merge_log_for_survivor(&self, survivor_id: &str) -> Result<Vec<MergeLogEntry>> {
        let client = self.pool.get().await.context("pool checkout failed")?;
        let rows = client
            .query(
                "SELECT id, survivor_id, survivor_name, absorbed_ids, absorbed_aliases, \
                 repointed_refs, group_confidence, merged_at \
                 FROM merge_log WHERE survivor_id = $1 ORDER BY merged_at",
                &[&survivor_id],
            )
            .await
            .context("merge log query failed")?;

        rows.iter()
            .map(|row| {
                let absorbed_ids: serde_json::Value = row.get("absorbed_ids");
                let absorbed_aliases: serde_json::Value = row.get("absorbed_aliases");
                let repointed: serde_json::Value = row.get("repointed_refs");
                Ok(MergeLogEntry {
                    id: row.get("id"),
                    survivor_id: row.get("survivor_id"),
                    survivor_name: row.get("survivor_name"),
                    absorbed_ids: serde_json::from_value(absorbed_ids).unwrap_or_default(),
                    absorbed_aliases: serde_json::from_value(absorbed_aliases).unwrap_or_default(),
                    repointed_refs: serde_json::from_value(repointed).unwrap_or_default(),
                    group_confidence: row.get("group_confidence"),
                    merged_at: row.get::<_, DateTime<Utc>>("merged_at"),
                })
            })
            .collect()
    }
}
