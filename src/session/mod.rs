mod dedup;
mod registry;
mod staging;

pub use dedup::PathDeduper;
pub use registry::{Attach, SessionRegistry};
pub use staging::StagingRefs;
