pub mod gate;
pub mod source;

pub use gate::validate_candidate;
pub use source::{AuthoritativeSource, LookupError, RemoteSourceClient, SourceRecord};
