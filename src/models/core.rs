// src/models/core.rs

use serde::{Deserialize, Serialize};

/// What kind of real-world thing a catalog record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Movie,
    Person,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Movie => "movie",
            EntityKind::Person => "person",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "movie" | "film" => Some(EntityKind::Movie),
            "person" | "celebrity" => Some(EntityKind::Person),
            _ => None,
        }
    }
}

/// Lifecycle status of a catalog record.
///
/// Transitions are driven only by the identity gate and the audit engine:
/// `Unverified -> Verified | Rejected`, `Verified -> NeedsRework`,
/// `NeedsRework -> Verified | Purged`. `Rejected` and `Purged` are terminal
/// and their identifiers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Unverified,
    Verified,
    NeedsRework,
    Rejected,
    Purged,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Unverified => "unverified",
            EntityStatus::Verified => "verified",
            EntityStatus::NeedsRework => "needs_rework",
            EntityStatus::Rejected => "rejected",
            EntityStatus::Purged => "purged",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "unverified" => Some(EntityStatus::Unverified),
            "verified" => Some(EntityStatus::Verified),
            "needs_rework" => Some(EntityStatus::NeedsRework),
            "rejected" => Some(EntityStatus::Rejected),
            "purged" => Some(EntityStatus::Purged),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntityStatus::Rejected | EntityStatus::Purged)
    }

    /// Whether the lattice permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: EntityStatus) -> bool {
        use EntityStatus::*;
        if *self == next {
            return true;
        }
        match (*self, next) {
            (Unverified, Verified) | (Unverified, Rejected) => true,
            (Verified, NeedsRework) => true,
            (NeedsRework, Verified) | (NeedsRework, Purged) => true,
            _ => false,
        }
    }
}

/// Primary-cast role fields on a movie record. Legacy rows store plain
/// free-text names here, sometimes comma-separated lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleFields {
    pub director: Option<String>,
    pub lead_male: Option<String>,
    pub lead_female: Option<String>,
    pub composer: Option<String>,
    pub producer: Option<String>,
    pub writer: Option<String>,
}

impl RoleFields {
    pub fn iter_present(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("director", &self.director),
            ("lead_male", &self.lead_male),
            ("lead_female", &self.lead_female),
            ("composer", &self.composer),
            ("producer", &self.producer),
            ("writer", &self.writer),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_deref().map(|s| (k, s)))
        .collect::<Vec<_>>()
        .into_iter()
    }

    pub fn count_present(&self) -> usize {
        self.iter_present().count()
    }
}

/// Supporting-cast entry as it arrives from legacy storage: sometimes a bare
/// comma-list string, sometimes an object with a role tag. Normalized to
/// [`CastMember`] immediately on read; business logic never sees this union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CastEntry {
    NameList(String),
    Structured { name: String, role: String },
}

/// Normalized internal representation of a supporting-cast member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastMember {
    pub name: String,
    /// Free-form role tag such as "hero2", "villain", "cameo".
    pub role: String,
}

impl CastEntry {
    /// Flatten the boundary union into normalized members. A bare comma-list
    /// becomes one member per element with an empty role tag.
    pub fn normalize(&self) -> Vec<CastMember> {
        match self {
            CastEntry::Structured { name, role } => vec![CastMember {
                name: name.trim().to_string(),
                role: role.trim().to_string(),
            }],
            CastEntry::NameList(list) => list
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| CastMember {
                    name: s.to_string(),
                    role: String::new(),
                })
                .collect(),
        }
    }
}

/// Image reference attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: Option<String>,
    /// Declared source key, matched against the source registry.
    pub source: Option<String>,
    /// Last computed visual tier (1-3), written back by the scorer.
    pub tier: Option<u8>,
    pub confidence: Option<f64>,
}

/// A catalog record for a movie or a person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    /// Identifier from the authoritative external source; None until verified.
    pub external_id: Option<String>,
    /// The single canonical display name/title.
    pub name: String,
    /// Every other spelling/form ever seen for this entity.
    pub aliases: Vec<String>,
    /// Release year for movies, birth year for people.
    pub year: Option<i32>,
    pub roles: RoleFields,
    /// Occupation tags for people ("actor", "director", ...).
    pub occupations: Vec<String>,
    pub supporting_cast: Vec<CastMember>,
    pub image: Option<ImageRef>,
    pub status: EntityStatus,
    /// Aggregated usage counter; summed into the survivor on merge.
    pub view_count: i64,
    /// Consecutive failed audits; reset on a passing audit.
    pub audit_strikes: i32,
    /// sha256 over the audit-relevant fields at last audit, for skip tracking.
    pub audit_signature: Option<String>,
    /// Optimistic concurrency token, bumped on every store write.
    pub version: i64,
    pub slug: String,
}

impl Entity {
    pub fn new(id: impl Into<String>, kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            external_id: None,
            name: name.into(),
            aliases: Vec::new(),
            year: None,
            roles: RoleFields::default(),
            occupations: Vec::new(),
            supporting_cast: Vec::new(),
            image: None,
            status: EntityStatus::Unverified,
            view_count: 0,
            audit_strikes: 0,
            audit_signature: None,
            version: 0,
            slug: String::new(),
        }
    }

    /// Rough completeness measure used for survivor selection on merge.
    pub fn completeness(&self) -> usize {
        let mut score = 0;
        if self.external_id.is_some() {
            score += 3;
        }
        if self.year.is_some() {
            score += 1;
        }
        score += self.roles.count_present();
        score += usize::from(!self.occupations.is_empty());
        score += usize::from(!self.supporting_cast.is_empty());
        if let Some(img) = &self.image {
            if img.url.is_some() {
                score += 1;
            }
        }
        score += self.aliases.len().min(3);
        score
    }

    /// All name forms this record is known by, canonical name first.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(|s| s.as_str()))
    }
}
