//! The capability contract every detector implements.

use std::path::Path;

use async_trait::async_trait;
use auxmark_model::{Action, Job};
use regex::Regex;
use serde_json::Value;

/// A pluggable line classifier with optional network preprocessing and
/// line rewriting.
///
/// The engine drives detectors through three strictly separated phases:
/// `probe` during scanning, `preprocess` on the scheduler, `postprocess`
/// during the rewrite pass. A detector that needs to carry state from
/// `preprocess` into `postprocess` (say, which downloads succeeded) keeps
/// its own store keyed by `(document, line_index)`; `preprocess` runs
/// concurrently across lines, so that store must tolerate concurrent
/// writers.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable identity used for registration, selection, and purge
    /// bookkeeping. Duplicate names are rejected at registration.
    fn name(&self) -> &'static str;

    /// Coarse filter consulted before `probe`; lines it rejects are never
    /// probed by this detector.
    fn prefilter(&self) -> &Regex;

    /// Classify one line of a document.
    ///
    /// Must be free of filesystem and network side effects: a probe in a
    /// dry run is indistinguishable from one in a real run. The returned
    /// metadata rides along on the job and the rewrite tag.
    fn probe(
        &self,
        document: &Path,
        line_index: usize,
        line: &str,
    ) -> (Action, Value);

    /// Perform the expensive side of a job (downloads, cache writes).
    ///
    /// Failure is the `false` return; implementations report their own
    /// details and never panic across the scheduler boundary.
    async fn preprocess(&self, _job: &Job) -> bool {
        true
    }

    /// Rewrite one tagged line, given the document's current text for
    /// that line. Returning the input unchanged is the identity rewrite.
    fn postprocess(
        &self,
        _document: &Path,
        _line_index: usize,
        line: &str,
        _metadata: &Value,
    ) -> String {
        line.to_string()
    }
}
