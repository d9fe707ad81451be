pub mod candidates;
pub mod engine;

pub use candidates::{find_merge_candidates, group_duplicates};
pub use engine::{merge_group, run_merge_sweep, select_survivor, MergeOptions, MergeResult, MergeSweepReport};
