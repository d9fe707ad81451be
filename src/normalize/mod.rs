pub mod canonical;
pub mod name_match;

pub use canonical::{canonicalize, canonicalize_bounded, slugify};
pub use name_match::names_match;
