//! Built-in detectors.
//!
//! Each detector is constructed from its `[detectors.*]` configuration
//! table and registered by name. Both built-ins share the retry-aware
//! HTTP fetch in [`fetch`].

pub mod embed_cache;
pub mod fetch;
pub mod image_localizer;

pub use embed_cache::EmbedCache;
pub use image_localizer::ImageLocalizer;
