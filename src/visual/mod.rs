pub mod archive_card;
pub mod scorer;

pub use archive_card::{determine_archive_reason, ArchiveCard, ArchiveReason};
pub use scorer::{score_visual, SourceRegistry, VisualConfidence, VisualTier, VisualType};
