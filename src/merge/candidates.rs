// src/merge/candidates.rs
//
// Duplicate-group discovery. The name matcher is applied pairwise across
// every recorded spelling (canonical name + aliases); near-identical
// canonical strings that the token matcher misses are caught by a fuzzy
// floor. Transitive closure over matching pairs comes from union-find.
//
// Group confidence blends canonical-string similarity with filmography
// overlap: "Radhika"/"Raadhika" sharing a filmography should clear the
// auto-merge floor, while "B. V. Prasad"/"L. V. Prasad" with disjoint
// filmographies must land in the manual-review queue however close the
// strings look.

use anyhow::Result;
use log::{debug, info};
use petgraph::unionfind::UnionFind;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strsim::jaro_winkler;

use crate::config::PipelineConfig;
use crate::db::CatalogStore;
use crate::models::{DuplicateGroup, Entity};
use crate::normalize::{canonicalize, names_match};

/// Do two records plausibly denote the same real-world entity?
fn entities_link(a: &Entity, b: &Entity, cfg: &PipelineConfig) -> bool {
    if a.kind != b.kind {
        return false;
    }
    // Movies from clearly different years are different movies even under
    // identical titles (remakes).
    if let (Some(ya), Some(yb)) = (a.year, b.year) {
        if (ya - yb).abs() > 1 {
            return false;
        }
    }
    for name_a in a.all_names() {
        for name_b in b.all_names() {
            if names_match(name_a, name_b, &cfg.matcher) {
                return true;
            }
            let sim = jaro_winkler(&canonicalize(name_a), &canonicalize(name_b));
            if sim >= cfg.sweep.candidate_similarity_floor {
                return true;
            }
        }
    }
    false
}

/// Mean pairwise jaro-winkler over the members' canonical primary names.
fn mean_name_similarity(members: &[&Entity]) -> f64 {
    let canon: Vec<String> = members.iter().map(|e| canonicalize(&e.name)).collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..canon.len() {
        for j in (i + 1)..canon.len() {
            total += jaro_winkler(&canon[i], &canon[j]);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

/// Mean pairwise jaccard overlap of foreign-reference sets. `None` when no
/// member has any references to compare.
fn mean_reference_overlap(
    members: &[&Entity],
    references: &HashMap<String, HashSet<String>>,
) -> Option<f64> {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            let a = references.get(&members[i].id);
            let b = references.get(&members[j].id);
            match (a, b) {
                (Some(a), Some(b)) if !a.is_empty() || !b.is_empty() => {
                    let intersection = a.intersection(b).count() as f64;
                    let union = a.union(b).count() as f64;
                    total += if union == 0.0 { 0.0 } else { intersection / union };
                    pairs += 1;
                }
                _ => {}
            }
        }
    }
    if pairs == 0 {
        None
    } else {
        Some(total / pairs as f64)
    }
}

/// Confidence that a group denotes one entity. Large heterogeneous groups
/// are penalized; small groups of near-identical spellings score high.
pub fn score_group(
    members: &[&Entity],
    references: &HashMap<String, HashSet<String>>,
    _cfg: &PipelineConfig,
) -> f64 {
    let name_sim = mean_name_similarity(members);
    let base = match mean_reference_overlap(members, references) {
        Some(overlap) => 0.6 * name_sim + 0.4 * overlap,
        // No filmography signal either way: trust names, but not fully.
        None => 0.85 * name_sim,
    };
    let size_penalty = 1.0 - 0.05 * (members.len().saturating_sub(2) as f64);
    (base * size_penalty.max(0.5)).clamp(0.0, 1.0)
}

/// Pure grouping over a slice of live entities. Returns member-index groups
/// of size >= 2.
pub fn group_duplicates(entities: &[Entity], cfg: &PipelineConfig) -> Vec<Vec<usize>> {
    let n = entities.len();
    let mut uf: UnionFind<usize> = UnionFind::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            if entities_link(&entities[i], &entities[j], cfg) {
                uf.union(i, j);
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        groups.entry(uf.find(i)).or_default().push(i);
    }
    let mut result: Vec<Vec<usize>> = groups.into_values().filter(|g| g.len() >= 2).collect();
    result.sort_by_key(|g| g[0]);
    result
}

/// Discover duplicate groups across the live catalog, with per-group
/// confidence and a suggested canonical name. Ephemeral output; nothing is
/// persisted here.
pub async fn find_merge_candidates(
    store: Arc<dyn CatalogStore>,
    cfg: &PipelineConfig,
    limit: Option<usize>,
) -> Result<Vec<DuplicateGroup>> {
    let mut entities = Vec::new();
    let mut offset = 0usize;
    loop {
        let batch = store.fetch_batch(offset, cfg.sweep.batch_size).await?;
        if batch.is_empty() {
            break;
        }
        offset += batch.len();
        entities.extend(batch.into_iter().filter(|e| !e.status.is_terminal()));
        if let Some(max) = limit {
            if entities.len() >= max {
                entities.truncate(max);
                break;
            }
        }
    }
    info!("Duplicate discovery over {} live entities", entities.len());

    let index_groups = group_duplicates(&entities, cfg);

    // Reference sets only for entities that actually landed in a group.
    let mut references: HashMap<String, HashSet<String>> = HashMap::new();
    for group in &index_groups {
        for &idx in group {
            let id = &entities[idx].id;
            if !references.contains_key(id) {
                references.insert(id.clone(), store.referencing_ids(id).await?);
            }
        }
    }

    let mut out = Vec::new();
    for group in index_groups {
        let members: Vec<&Entity> = group.iter().map(|&i| &entities[i]).collect();
        let confidence = score_group(&members, &references, cfg);
        let survivor = crate::merge::engine::select_survivor(&members);
        debug!(
            "Duplicate group {:?} confidence {:.3}",
            members.iter().map(|e| &e.name).collect::<Vec<_>>(),
            confidence
        );
        out.push(DuplicateGroup {
            entity_ids: members.iter().map(|e| e.id.clone()).collect(),
            confidence,
            suggested_canonical_name: members[survivor].name.clone(),
        });
    }
    out.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;

    fn person(id: &str, name: &str) -> Entity {
        Entity::new(id, EntityKind::Person, name)
    }

    fn cfg() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn near_identical_spellings_group() {
        let entities = vec![person("p1", "Radhika"), person("p2", "Raadhika")];
        let groups = group_duplicates(&entities, &cfg());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn aliases_participate_in_linking() {
        let a = person("p1", "N. T. Rama Rao");
        let mut b = person("p2", "Nandamuri Taraka Rama Rao");
        b.aliases.push("N.T. Rama Rao".to_string());
        let groups = group_duplicates(&[a, b], &cfg());
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn different_kinds_never_group() {
        let a = person("p1", "Mayabazar");
        let b = Entity::new("m1", EntityKind::Movie, "Mayabazar");
        let groups = group_duplicates(&[a, b], &cfg());
        assert!(groups.is_empty());
    }

    #[test]
    fn remakes_with_distant_years_never_group() {
        let mut a = Entity::new("m1", EntityKind::Movie, "Devadasu");
        a.year = Some(1953);
        let mut b = Entity::new("m2", EntityKind::Movie, "Devadasu");
        b.year = Some(2006);
        let groups = group_duplicates(&[a, b], &cfg());
        assert!(groups.is_empty());
    }

    #[test]
    fn transitive_grouping() {
        // a~b and b~c imply one group {a, b, c}.
        let a = person("p1", "Raadhika");
        let b = person("p2", "Radhika");
        let c = person("p3", "Radhikaa");
        let groups = group_duplicates(&[a, b, c], &cfg());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn shared_filmography_clears_auto_merge_floor() {
        // Scenario: "Radhika" and "Raadhika", identical filmography.
        let a = person("p1", "Radhika");
        let b = person("p2", "Raadhika");
        let mut refs = HashMap::new();
        let films: HashSet<String> = ["m1", "m2", "m3"].iter().map(|s| s.to_string()).collect();
        refs.insert("p1".to_string(), films.clone());
        refs.insert("p2".to_string(), films);

        let conf = score_group(&[&a, &b], &refs, &cfg());
        assert!(conf >= 0.9, "confidence {conf} below auto-merge floor");
    }

    #[test]
    fn disjoint_filmographies_route_to_manual_review() {
        // Scenario: "B. V. Prasad" vs "L. V. Prasad".
        let a = person("p1", "B. V. Prasad");
        let b = person("p2", "L. V. Prasad");
        let mut refs = HashMap::new();
        refs.insert(
            "p1".to_string(),
            ["m1", "m2"].iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        );
        refs.insert(
            "p2".to_string(),
            ["m8", "m9"].iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        );

        let conf = score_group(&[&a, &b], &refs, &cfg());
        assert!(conf < cfg().sweep.auto_merge_floor, "confidence {conf} should not auto-merge");
    }

    #[test]
    fn larger_groups_are_penalized() {
        let a = person("p1", "Radhika");
        let b = person("p2", "Raadhika");
        let c = person("p3", "Radhikaa");
        let d = person("p4", "Raadhikaa");
        let refs = HashMap::new();
        let small = score_group(&[&a, &b], &refs, &cfg());
        let large = score_group(&[&a, &b, &c, &d], &refs, &cfg());
        assert!(large < small);
    }

    #[tokio::test]
    async fn discovery_over_store_reports_groups_with_confidence() {
        use crate::db::MemoryCatalog;

        let store = Arc::new(MemoryCatalog::new());
        store.insert(person("p1", "Radhika"));
        store.insert(person("p2", "Raadhika"));
        store.insert(person("p3", "Nagarjuna"));
        for film in ["m1", "m2"] {
            store.add_reference(film, "p1");
            store.add_reference(film, "p2");
        }

        let groups = find_merge_candidates(store, &cfg(), None).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entity_ids.len(), 2);
        assert!(groups[0].confidence >= 0.9);
        assert!(["Radhika", "Raadhika"]
            .contains(&groups[0].suggested_canonical_name.as_str()));
    }

    #[tokio::test]
    async fn terminal_entities_are_excluded_from_discovery() {
        use crate::db::MemoryCatalog;
        use crate::models::EntityStatus;

        let store = Arc::new(MemoryCatalog::new());
        store.insert(person("p1", "Radhika"));
        let mut purged = person("p2", "Raadhika");
        purged.status = EntityStatus::Purged;
        store.insert(purged);

        let groups = find_merge_candidates(store, &cfg(), None).await.unwrap();
        assert!(groups.is_empty());
    }
}
