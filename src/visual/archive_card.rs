// src/visual/archive_card.rs
//
// When no trustworthy image exists the record gets an archive card: honest,
// display-ready fallback data. The generator produces text and labels only.
// It never synthesizes an image URL -- that invariant is what keeps the
// catalog's visual provenance transparent.

use serde::Serialize;

use crate::models::{Entity, EntityStatus};
use crate::visual::scorer::{VisualConfidence, VisualTier};

/// Why no trustworthy image exists for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    /// Imagery lookup has never run for this entity.
    NeverSearched,
    /// Lookup ran; the authoritative source holds no imagery.
    SearchedNoneFound,
    /// An image exists but cannot be displayed until rights clear.
    RightsPending,
    /// An image reference exists but its provenance cannot be verified.
    NoVerifiedSource,
}

impl ArchiveReason {
    pub fn display_text(&self) -> &'static str {
        match self {
            ArchiveReason::NeverSearched => "No image search performed yet",
            ArchiveReason::SearchedNoneFound => "No verified image found in archival sources",
            ArchiveReason::RightsPending => "Image pending rights clearance",
            ArchiveReason::NoVerifiedSource => "No verified source found for available imagery",
        }
    }
}

/// Transparent "no image available" record. Contains no image URL by
/// construction; the field does not exist on this type.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveCard {
    pub reason: ArchiveReason,
    pub reason_text: String,
    /// Verification-status label shown alongside the card.
    pub verification_label: String,
}

/// Source tag legacy ingest writes when a poster is held back for rights
/// review.
const RIGHTS_PENDING_TAG: &str = "rights_pending";

/// Inspect why an entity lacks a trustworthy image.
pub fn determine_archive_reason(entity: &Entity) -> ArchiveReason {
    if let Some(image) = &entity.image {
        if image
            .source
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case(RIGHTS_PENDING_TAG))
            .unwrap_or(false)
        {
            return ArchiveReason::RightsPending;
        }
        if image.url.as_deref().map(|u| !u.trim().is_empty()).unwrap_or(false) {
            return ArchiveReason::NoVerifiedSource;
        }
    }

    // No image reference at all: distinguish "never audited" from "audited
    // and came up empty" by whether an audit pass has stamped a signature.
    if entity.audit_signature.is_none() {
        ArchiveReason::NeverSearched
    } else {
        ArchiveReason::SearchedNoneFound
    }
}

impl ArchiveCard {
    /// Build the card for an entity whose current image scored Tier 3.
    /// Callers must only invoke this when [`VisualConfidence::needs_archive_card`]
    /// holds; a higher-tier image replaces the card outright.
    pub fn generate(entity: &Entity, scored: &VisualConfidence) -> Option<ArchiveCard> {
        if scored.tier != VisualTier::Tier3 {
            return None;
        }
        let reason = determine_archive_reason(entity);
        let verification_label = match entity.status {
            EntityStatus::Verified => "Verified entity, unverified imagery".to_string(),
            EntityStatus::Unverified => "Pending verification".to_string(),
            EntityStatus::NeedsRework => "Under review".to_string(),
            EntityStatus::Rejected | EntityStatus::Purged => "Removed from catalog".to_string(),
        };
        Some(ArchiveCard {
            reason,
            reason_text: reason.display_text().to_string(),
            verification_label,
        })
    }
}
