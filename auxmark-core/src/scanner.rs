//! Line scanning and action dispatch.
//!
//! The scanner owns phase one of a run: it drains the worklist in FIFO
//! order, reads each document once, offers every line to every detector,
//! and turns the verdicts into registry work. Document promotion is
//! handled here too, including the purge-and-requeue churn it causes.

use auxmark_model::{Action, Job, RunSummary, TaggedLine};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{EngineError, Result},
    promote,
    registry::DetectorRegistry,
    worklist::{WorkItem, Worklist},
};

/// Phase-one driver. Cheap to construct; all state lives in the worklist
/// and registry it operates on.
#[derive(Debug)]
pub struct Scanner {
    dry_run: bool,
}

impl Scanner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Scan documents until the worklist is empty or the token fires.
    ///
    /// All scanning completes before any preprocessing job runs, so a
    /// promotion triggered by the last document still gets its re-scan
    /// before phase two starts.
    pub async fn drain(
        &self,
        worklist: &mut Worklist,
        registry: &mut DetectorRegistry,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while let Some(item) = worklist.pop() {
            if cancel.is_cancelled() {
                return Err(EngineError::Interrupted);
            }
            self.scan_document(&item, worklist, registry, summary).await;
        }
        Ok(())
    }

    async fn scan_document(
        &self,
        item: &WorkItem,
        worklist: &mut Worklist,
        registry: &mut DetectorRegistry,
        summary: &mut RunSummary,
    ) {
        let text = match fs::read_to_string(&item.source).await {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    document = %item.source.display(),
                    error = %err,
                    "skipping unreadable document"
                );
                summary.record_error(format!(
                    "failed to read {}: {err}",
                    item.source.display()
                ));
                return;
            }
        };

        summary.documents_scanned += 1;
        debug!(document = %item.id.display(), "scanning");

        // First detector to request expansion; recorded for diagnostics
        // only, the promotion itself is identity-level.
        let mut expand_requested_by: Option<&'static str> = None;

        for (line_index, line) in text.lines().enumerate() {
            for entry in registry.entries_mut() {
                if !entry.detector.prefilter().is_match(line) {
                    continue;
                }
                let (action, metadata) =
                    entry.detector.probe(&item.id, line_index, line);
                match action {
                    Action::Ignore => {}
                    Action::Expand => {
                        if expand_requested_by.is_none() {
                            expand_requested_by = Some(entry.name());
                        }
                        debug!(
                            document = %item.id.display(),
                            line = line_index + 1,
                            detector = entry.name(),
                            "expansion requested"
                        );
                    }
                    action => {
                        if action.needs_job() {
                            entry.jobs.push(Job::new(
                                item.id.clone(),
                                line_index,
                                line.to_string(),
                                entry.name().to_string(),
                                metadata.clone(),
                            ));
                        }
                        if action.needs_tag() {
                            entry.tagged.push(TaggedLine::new(
                                item.id.clone(),
                                line_index,
                                line.to_string(),
                                metadata,
                            ));
                        }
                    }
                }
            }
        }

        if let Some(requested_by) = expand_requested_by {
            self.handle_expansion(
                item,
                requested_by,
                worklist,
                registry,
                summary,
            )
            .await;
        }
    }

    /// Promote `item` and absorb the churn: the old identity's work is
    /// purged across all detectors and retired from the worklist, and on
    /// success the new identity is queued for exactly one fresh scan.
    ///
    /// Promotion is never retried; on failure the document sits out the
    /// rest of the run.
    async fn handle_expansion(
        &self,
        item: &WorkItem,
        requested_by: &'static str,
        worklist: &mut Worklist,
        registry: &mut DetectorRegistry,
        summary: &mut RunSummary,
    ) {
        let outcome = if self.dry_run {
            promote::bundle_identity(&item.id).map(|target| {
                info!(
                    from = %item.id.display(),
                    to = %target.display(),
                    "[dry-run] would promote document to bundle"
                );
                // Virtual promotion: classify under the canonical
                // identity while still reading the old on-disk path.
                WorkItem::promoted(target, item.source.clone())
            })
        } else {
            promote::promote(&item.id)
                .await
                .map(WorkItem::new)
                .inspect(|promoted| {
                    info!(
                        from = %item.id.display(),
                        to = %promoted.id.display(),
                        detector = requested_by,
                        "promoted document to bundle"
                    );
                })
        };

        let (jobs, tags) = registry.purge_document(&item.id);
        worklist.retire(&item.id);
        if jobs + tags > 0 {
            debug!(
                document = %item.id.display(),
                jobs,
                tags,
                "dropped work recorded under the pre-promotion identity"
            );
        }

        match outcome {
            Ok(promoted) => {
                summary.documents_promoted += 1;
                worklist.push(promoted);
            }
            Err(err) => {
                warn!(
                    document = %item.id.display(),
                    detector = requested_by,
                    error = %err,
                    "promotion failed, document unscanned this run"
                );
                summary.record_error(format!(
                    "promotion failed for {} (requested by {requested_by}): {err}",
                    item.id.display()
                ));
            }
        }
    }
}
