//! # Auxmark Core
//!
//! Scan, schedule, and rewrite engine behind the `auxmark` tool: it walks
//! the markdown documents of a site checkout line by line, lets pluggable
//! detectors classify what they see, runs the resulting network work on a
//! bounded, origin-paced scheduler, and finally rewrites tagged lines in
//! place.
//!
//! ## Pipeline
//!
//! A run moves through three strictly ordered phases:
//!
//! 1. **Scan**: every document is read once and each line is offered to
//!    every registered detector. Verdicts accumulate preprocessing jobs
//!    and rewrite tags in the [`registry`], and may promote a document
//!    into its bundle form (`name.md` → `name/index.md`), which requeues
//!    it for exactly one fresh scan.
//! 2. **Preprocess**: all accumulated jobs run concurrently under the
//!    [`scheduler`], which keeps jobs that talk to the same origin
//!    mutually exclusive and spaced by a minimum interval.
//! 3. **Rewrite**: tagged lines are rewritten document by document via
//!    atomic temp-file replacement.
//!
//! Per-item failures (a download, a promotion, one document's rewrite)
//! are reported and the run continues; only setup problems abort.
//!
//! ## Key modules
//!
//! - [`contract`]: the [`Detector`](contract::Detector) capability trait
//! - [`registry`]: ordered detector slots and their accumulated work
//! - [`worklist`]: FIFO scanning queue that absorbs promotion churn
//! - [`scheduler`]: bounded worker pool with per-origin pacing
//! - [`rewrite`]: grouped, atomic line rewriting
//! - [`orchestrator`]: phase sequencing, interrupts, and the run summary
//! - [`detectors`]: the built-in image localizer and embed cache

pub mod contract;
pub mod detectors;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod promote;
pub mod registry;
pub mod rewrite;
pub mod scanner;
pub mod scheduler;
pub mod worklist;

pub use contract::Detector;
pub use error::{EngineError, Result};
pub use orchestrator::{Orchestrator, RunOptions};
pub use registry::DetectorRegistry;
