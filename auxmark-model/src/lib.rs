//! Shared data model for the auxmark document pipeline.
#![allow(missing_docs)]

pub mod action;
pub mod job;
pub mod origin;
pub mod summary;

// Intentionally curated re-exports for downstream consumers.
pub use action::Action;
pub use job::{Job, TaggedLine};
pub use origin::OriginKey;
pub use summary::RunSummary;
