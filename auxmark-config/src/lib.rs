//! Configuration for the auxmark pipeline.
//!
//! Settings live in a `.auxmark.toml` at the site root (or inside a
//! theme); every key has a default, so a partial file only overrides what
//! it names and an absent file means "run with defaults".

pub mod models;

pub use models::{
    AuxmarkConfig, DetectorsConfig, EmbedCacheConfig, GeneralConfig,
    ImageLocalizerConfig, WorkerConfig,
};
