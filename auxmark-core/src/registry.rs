//! Ordered detector slots and the work they accumulate during scanning.

use std::{fmt, path::Path, sync::Arc};

use auxmark_model::{Job, TaggedLine};
use tracing::debug;

use crate::{
    contract::Detector,
    error::{EngineError, Result},
};

/// One registered detector plus its accumulated jobs and tagged lines.
pub struct DetectorEntry {
    pub detector: Arc<dyn Detector>,
    pub jobs: Vec<Job>,
    pub tagged: Vec<TaggedLine>,
}

impl DetectorEntry {
    fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            jobs: Vec::new(),
            tagged: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.detector.name()
    }
}

impl fmt::Debug for DetectorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorEntry")
            .field("detector", &self.name())
            .field("jobs", &self.jobs.len())
            .field("tagged", &self.tagged.len())
            .finish()
    }
}

/// The detectors participating in one run, in registration order.
///
/// Registration order matters twice: the scanner offers each line to
/// detectors in this order, and the rewrite engine composes postprocess
/// calls on a shared line in this order.
#[derive(Default)]
pub struct DetectorRegistry {
    entries: Vec<DetectorEntry>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector. A second detector with the same name is a
    /// setup error.
    pub fn register(&mut self, detector: Arc<dyn Detector>) -> Result<()> {
        let name = detector.name();
        if self.entries.iter().any(|entry| entry.name() == name) {
            return Err(EngineError::DuplicateDetector(name.to_string()));
        }
        self.entries.push(DetectorEntry::new(detector));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(DetectorEntry::name).collect()
    }

    pub fn entries(&self) -> &[DetectorEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [DetectorEntry] {
        &mut self.entries
    }

    /// Drop every job and tagged line recorded for `document`, across all
    /// detectors. Returns how many of each were removed.
    ///
    /// Used when a document's identity is replaced by promotion: work
    /// recorded under the old identity is stale and the re-scan rebuilds
    /// whatever still applies.
    pub fn purge_document(&mut self, document: &Path) -> (usize, usize) {
        let mut jobs_removed = 0;
        let mut tags_removed = 0;
        for entry in &mut self.entries {
            let before = entry.jobs.len();
            entry.jobs.retain(|job| job.document != document);
            jobs_removed += before - entry.jobs.len();

            let before = entry.tagged.len();
            entry.tagged.retain(|tag| tag.document != document);
            tags_removed += before - entry.tagged.len();
        }
        if jobs_removed + tags_removed > 0 {
            debug!(
                document = %document.display(),
                jobs = jobs_removed,
                tags = tags_removed,
                "purged stale work for replaced identity"
            );
        }
        (jobs_removed, tags_removed)
    }

    pub fn total_jobs(&self) -> usize {
        self.entries.iter().map(|entry| entry.jobs.len()).sum()
    }

    pub fn total_tagged(&self) -> usize {
        self.entries.iter().map(|entry| entry.tagged.len()).sum()
    }
}

impl fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("detectors", &self.names())
            .field("jobs", &self.total_jobs())
            .field("tagged", &self.total_tagged())
            .finish()
    }
}
