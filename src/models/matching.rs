// src/models/matching.rs
//
// Result and report shapes shared by the identity gate, the audit engine and
// the merge engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a candidate was rejected by the identity gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    WrongEntityType,
    EmptyName,
    PunctuationOnlyName,
    NameTooLong,
    MissingReleaseYear,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::WrongEntityType => "wrong_entity_type",
            RejectionReason::EmptyName => "empty_name",
            RejectionReason::PunctuationOnlyName => "punctuation_only_name",
            RejectionReason::NameTooLong => "name_too_long",
            RejectionReason::MissingReleaseYear => "missing_release_year",
        }
    }
}

/// Outcome lattice of a single gate validation.
///
/// `LookupFailed` is deliberately separate from `Rejected`: a flaky network
/// call must never brand a legitimate entity as invalid. Callers treat it as
/// retryable and leave the record untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Verified,
    Unverified,
    Rejected,
    LookupFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<RejectionReason>,
    pub canonical_name: String,
    pub slug: String,
    /// External identifier found at the authoritative source, if any.
    pub external_id: Option<String>,
    /// Name/title as the authoritative source spells it.
    pub source_name: Option<String>,
    pub confidence: f64,
}

/// A set of record occurrences believed to denote the same real-world
/// entity. Ephemeral: computed on demand, persisted only as a merge log
/// entry once a merge runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub entity_ids: Vec<String>,
    pub confidence: f64,
    pub suggested_canonical_name: String,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }
}

/// Immutable record of a completed merge. Created only by the merge engine,
/// never mutated; the operator-facing audit trail and undo path read these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeLogEntry {
    pub id: String,
    pub survivor_id: String,
    pub survivor_name: String,
    pub absorbed_ids: Vec<String>,
    pub absorbed_aliases: Vec<String>,
    /// Internal ids of records whose foreign references were re-pointed.
    pub repointed_refs: Vec<String>,
    pub group_confidence: f64,
    pub merged_at: DateTime<Utc>,
}
