pub mod core;
pub mod matching;

pub use core::{CastEntry, CastMember, Entity, EntityKind, EntityStatus, ImageRef, RoleFields};
pub use matching::{
    DuplicateGroup, MergeLogEntry, RejectionReason, ValidationOutcome, ValidationResult,
};
