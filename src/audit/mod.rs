pub mod engine;
pub mod report;

pub use engine::{run_audit, AuditOptions};
pub use report::{ArchiveCardEntry, AuditReport, EntityError, ProposedFix};
