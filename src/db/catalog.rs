// src/db/catalog.rs
//
// Storage seam for the catalog. The audit and merge engines only talk to
// this trait; Postgres backs production runs and `MemoryCatalog` backs tests
// and fully-offline dry runs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{Entity, EntityStatus, MergeLogEntry};

/// Everything the merge engine needs written atomically for one duplicate
/// group. Built identically for dry-run and apply so the preview cannot
/// drift from execution.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub survivor_id: String,
    pub survivor_name: String,
    pub absorbed_ids: Vec<String>,
    /// Absorbed spellings folded into the survivor's alias set.
    pub aliases_to_add: Vec<String>,
    /// Survivor's view counter after the merge. With `preserve_analytics`
    /// this is the sum over the whole group; otherwise the survivor's own.
    pub analytics_total: i64,
    pub group_confidence: f64,
    /// Exclusive-section key derived from the sorted member ids.
    pub lock_key: i64,
}

impl MergePlan {
    /// Stable advisory-lock key for a cluster of entity ids.
    pub fn cluster_lock_key(ids: &[String]) -> i64 {
        let mut sorted: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        sorted.sort_unstable();
        let mut hasher = Sha256::new();
        for id in sorted {
            hasher.update(id.as_bytes());
            hasher.update(b"\x00");
        }
        let digest = hasher.finalize();
        i64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
    }
}

/// Lock contention or partial failure during a merge. Retryable on the next
/// sweep; callers downcast to distinguish it from hard store errors.
#[derive(Debug)]
pub struct MergeConflict(pub String);

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "merge conflict: {}", self.0)
    }
}

impl std::error::Error for MergeConflict {}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn count_by_status(&self) -> Result<HashMap<EntityStatus, usize>>;

    /// Range read for audit sweeps, ordered by id for a stable iteration.
    async fn fetch_batch(&self, offset: usize, limit: usize) -> Result<Vec<Entity>>;

    async fn get(&self, id: &str) -> Result<Option<Entity>>;

    /// Optimistic write: succeeds only when the stored version still equals
    /// `entity.version`, and bumps the version. `false` means another writer
    /// got there first; re-read and retry.
    async fn update(&self, entity: &Entity) -> Result<bool>;

    /// Ids of records holding a foreign reference to this entity (movies
    /// crediting a person, or the reverse).
    async fn referencing_ids(&self, entity_id: &str) -> Result<HashSet<String>>;

    /// Atomically: acquire the cluster's exclusive section (bounded wait),
    /// re-point foreign references, fold aliases/analytics into the
    /// survivor, drop absorbed records, append the log entry. Any failure
    /// rolls the whole group back and surfaces as [`MergeConflict`] when
    /// retryable. Returns the ids of re-pointed referencing records.
    async fn apply_merge(
        &self,
        plan: &MergePlan,
        log_entry: &MergeLogEntry,
        lock_timeout: Duration,
    ) -> Result<Vec<String>>;

    async fn merge_log_for_survivor(&self, survivor_id: &str) -> Result<Vec<MergeLogEntry>>;
}

/// In-memory store for tests and offline dry runs.
#[derive(Default)]
pub struct MemoryCatalog {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entities: HashMap<String, Entity>,
    /// referencing record id -> referenced entity ids
    references: HashMap<String, HashSet<String>>,
    merge_log: Vec<MergeLogEntry>,
    held_locks: HashSet<i64>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: Entity) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entities.insert(entity.id.clone(), entity);
    }

    /// Record that `referencing_id` (e.g. a movie) references `entity_id`
    /// (e.g. a credited person).
    pub fn add_reference(&self, referencing_id: &str, entity_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .references
            .entry(referencing_id.to_string())
            .or_default()
            .insert(entity_id.to_string());
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test hook: hold a cluster lock so a concurrent merge must time out.
    pub fn hold_lock(&self, key: i64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.held_locks.insert(key);
    }

    pub fn release_lock(&self, key: i64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.held_locks.remove(&key);
    }

    pub fn references_of(&self, referencing_id: &str) -> HashSet<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .references
            .get(referencing_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn count_by_status(&self) -> Result<HashMap<EntityStatus, usize>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = HashMap::new();
        for entity in inner.entities.values() {
            *counts.entry(entity.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn fetch_batch(&self, offset: usize, limit: usize) -> Result<Vec<Entity>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<&String> = inner.entities.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.entities.get(id).cloned())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.entities.get(id).cloned())
    }

    async fn update(&self, entity: &Entity) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.entities.get_mut(&entity.id) {
            Some(stored) if stored.version == entity.version => {
                let mut updated = entity.clone();
                updated.version += 1;
                *stored = updated;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(anyhow!("unknown entity {}", entity.id)),
        }
    }

    async fn referencing_ids(&self, entity_id: &str) -> Result<HashSet<String>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .references
            .iter()
            .filter(|(_, referenced)| referenced.contains(entity_id))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn apply_merge(
        &self,
        plan: &MergePlan,
        log_entry: &MergeLogEntry,
        lock_timeout: Duration,
    ) -> Result<Vec<String>> {
        // Bounded wait for the cluster's exclusive section.
        let deadline = Instant::now() + lock_timeout;
        loop {
            {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if !inner.held_locks.contains(&plan.lock_key) {
                    inner.held_locks.insert(plan.lock_key);
                    break;
                }
            }
            if Instant::now() >= deadline {
                return Err(anyhow!(MergeConflict(format!(
                    "cluster lock {} not acquired within {:?}",
                    plan.lock_key, lock_timeout
                ))));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let result = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            apply_merge_in_memory(&mut inner, plan, log_entry)
        };

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.held_locks.remove(&plan.lock_key);
        result
    }

    async fn merge_log_for_survivor(&self, survivor_id: &str) -> Result<Vec<MergeLogEntry>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .merge_log
            .iter()
            .filter(|e| e.survivor_id == survivor_id)
            .cloned()
            .collect())
    }
}

/// The whole group either applies or nothing does: validate everything
/// against a snapshot first, then mutate.
fn apply_merge_in_memory(
    inner: &mut MemoryInner,
    plan: &MergePlan,
    log_entry: &MergeLogEntry,
) -> Result<Vec<String>> {
    if !inner.entities.contains_key(&plan.survivor_id) {
        return Err(anyhow!(MergeConflict(format!(
            "survivor {} vanished before merge",
            plan.survivor_id
        ))));
    }
    for absorbed in &plan.absorbed_ids {
        if !inner.entities.contains_key(absorbed) {
            return Err(anyhow!(MergeConflict(format!(
                "absorbed entity {} vanished before merge",
                absorbed
            ))));
        }
    }

    let mut repointed = Vec::new();
    for (referencing_id, referenced) in inner.references.iter_mut() {
        let mut touched = false;
        for absorbed in &plan.absorbed_ids {
            if referenced.remove(absorbed) {
                touched = true;
            }
        }
        if touched {
            referenced.insert(plan.survivor_id.clone());
            repointed.push(referencing_id.clone());
        }
    }
    repointed.sort();

    for absorbed in &plan.absorbed_ids {
        inner.entities.remove(absorbed);
    }

    let survivor = inner
        .entities
        .get_mut(&plan.survivor_id)
        .ok_or_else(|| anyhow!("survivor disappeared mid-merge"))?;
    for alias in &plan.aliases_to_add {
        if !survivor.aliases.iter().any(|a| a == alias) && *alias != survivor.name {
            survivor.aliases.push(alias.clone());
        }
    }
    survivor.view_count = plan.analytics_total;
    survivor.version += 1;

    // The engine leaves repointed_refs empty for the backend to fill from
    // what actually got re-pointed.
    let mut entry = log_entry.clone();
    entry.repointed_refs = repointed.clone();
    inner.merge_log.push(entry);
    Ok(repointed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use chrono::Utc;

    fn entity(id: &str, name: &str, views: i64) -> Entity {
        let mut e = Entity::new(id, EntityKind::Person, name);
        e.view_count = views;
        e
    }

    fn log_entry(survivor: &str, absorbed: Vec<String>) -> MergeLogEntry {
        MergeLogEntry {
            id: "log-1".to_string(),
            survivor_id: survivor.to_string(),
            survivor_name: String::new(),
            absorbed_ids: absorbed,
            absorbed_aliases: vec![],
            repointed_refs: vec![],
            group_confidence: 0.95,
            merged_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn optimistic_update_detects_stale_version() {
        let store = MemoryCatalog::new();
        store.insert(entity("p1", "Radhika", 0));

        let mut first = store.get("p1").await.unwrap().unwrap();
        let second = first.clone();

        first.name = "Raadhika".to_string();
        assert!(store.update(&first).await.unwrap());

        // `second` still carries the old version.
        assert!(!store.update(&second).await.unwrap());
    }

    #[tokio::test]
    async fn apply_merge_repoints_and_sums() {
        let store = MemoryCatalog::new();
        store.insert(entity("p1", "Radhika", 100));
        store.insert(entity("p2", "Raadhika", 40));
        store.add_reference("m1", "p2");
        store.add_reference("m2", "p1");

        let plan = MergePlan {
            survivor_id: "p1".to_string(),
            survivor_name: "Radhika".to_string(),
            absorbed_ids: vec!["p2".to_string()],
            aliases_to_add: vec!["Raadhika".to_string()],
            analytics_total: 140,
            group_confidence: 0.95,
            lock_key: MergePlan::cluster_lock_key(&["p1".to_string(), "p2".to_string()]),
        };

        let repointed = store
            .apply_merge(&plan, &log_entry("p1", vec!["p2".to_string()]), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(repointed, vec!["m1".to_string()]);

        let survivor = store.get("p1").await.unwrap().unwrap();
        assert_eq!(survivor.view_count, 140);
        assert!(survivor.aliases.contains(&"Raadhika".to_string()));
        assert!(store.get("p2").await.unwrap().is_none());
        assert!(store.references_of("m1").contains("p1"));

        let log = store.merge_log_for_survivor("p1").await.unwrap();
        assert_eq!(log.len(), 1);
        // The log entry records which referencing records were re-pointed.
        assert_eq!(log[0].repointed_refs, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn held_lock_times_out_as_conflict() {
        let store = MemoryCatalog::new();
        store.insert(entity("p1", "Radhika", 0));
        store.insert(entity("p2", "Raadhika", 0));

        let key = MergePlan::cluster_lock_key(&["p1".to_string(), "p2".to_string()]);
        store.hold_lock(key);

        let plan = MergePlan {
            survivor_id: "p1".to_string(),
            survivor_name: "Radhika".to_string(),
            absorbed_ids: vec!["p2".to_string()],
            aliases_to_add: vec![],
            analytics_total: 0,
            group_confidence: 0.95,
            lock_key: key,
        };

        let err = store
            .apply_merge(&plan, &log_entry("p1", vec!["p2".to_string()]), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<MergeConflict>().is_some());

        // Nothing happened.
        assert!(store.get("p2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn vanished_member_rolls_back_whole_group() {
        let store = MemoryCatalog::new();
        store.insert(entity("p1", "Radhika", 100));
        store.add_reference("m1", "ghost");

        let plan = MergePlan {
            survivor_id: "p1".to_string(),
            survivor_name: "Radhika".to_string(),
            absorbed_ids: vec!["ghost".to_string()],
            aliases_to_add: vec!["Ghost".to_string()],
            analytics_total: 500,
            group_confidence: 0.95,
            lock_key: 42,
        };

        let err = store
            .apply_merge(&plan, &log_entry("p1", vec!["ghost".to_string()]), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<MergeConflict>().is_some());

        // Survivor untouched, no log entry, reference not repointed.
        let survivor = store.get("p1").await.unwrap().unwrap();
        assert_eq!(survivor.view_count, 100);
        assert!(survivor.aliases.is_empty());
        assert!(store.merge_log_for_survivor("p1").await.unwrap().is_empty());
        assert!(store.references_of("m1").contains("ghost"));
    }

    #[test]
    fn cluster_lock_key_is_order_independent() {
        let a = MergePlan::cluster_lock_key(&["p1".to_string(), "p2".to_string()]);
        let b = MergePlan::cluster_lock_key(&["p2".to_string(), "p1".to_string()]);
        let c = MergePlan::cluster_lock_key(&["p1".to_string(), "p3".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
