//! Run sequencing: scan, preprocess, rewrite, summary.

use std::{path::PathBuf, sync::Arc, time::Duration};

use auxmark_model::RunSummary;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{EngineError, Result},
    registry::DetectorRegistry,
    rewrite::Rewriter,
    scanner::Scanner,
    scheduler::Scheduler,
    worklist::Worklist,
};

/// Knobs for one run, typically derived from configuration plus CLI
/// overrides.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Worker bound for the preprocessing phase.
    pub workers: usize,
    /// Minimum spacing between dispatches to one origin.
    pub min_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            workers: 4,
            min_interval: Duration::from_secs(1),
        }
    }
}

/// Drives the three pipeline phases over a document set and produces the
/// run summary.
///
/// The orchestrator owns the registry for the duration of the run; its
/// cancellation token is observed between documents and between job
/// submissions, so an interrupt stops new work promptly while letting
/// in-flight preprocessing finish.
#[derive(Debug)]
pub struct Orchestrator {
    registry: DetectorRegistry,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(registry: DetectorRegistry, options: RunOptions) -> Self {
        Self {
            registry,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token to cancel this run from outside (signal handlers, tests).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline to completion.
    ///
    /// Setup problems (no detectors, no documents) abort immediately;
    /// per-item failures are folded into the summary. An interrupt
    /// surfaces as [`EngineError::Interrupted`] once in-flight work has
    /// settled.
    pub async fn run(mut self, documents: Vec<PathBuf>) -> Result<RunSummary> {
        if self.registry.is_empty() {
            return Err(EngineError::NoDetectors);
        }
        if documents.is_empty() {
            return Err(EngineError::NoDocuments);
        }

        info!(
            target: "auxmark::run",
            documents = documents.len(),
            detectors = ?self.registry.names(),
            dry_run = self.options.dry_run,
            "starting run"
        );

        let mut summary = RunSummary::default();
        let mut worklist = Worklist::seed(documents);
        let scanner = Scanner::new(self.options.dry_run);
        scanner
            .drain(&mut worklist, &mut self.registry, &mut summary, &self.cancel)
            .await?;

        summary.lines_tagged = self.registry.total_tagged();
        debug!(
            target: "auxmark::run",
            jobs = self.registry.total_jobs(),
            tagged = summary.lines_tagged,
            "scan phase complete"
        );

        self.preprocess_phase(&mut summary).await?;

        let rewriter = Rewriter::new(self.options.dry_run);
        rewriter
            .rewrite_all(&self.registry, &mut summary, &self.cancel)
            .await?;

        info!(
            target: "auxmark::run",
            succeeded = summary.jobs_succeeded,
            failed = summary.jobs_failed,
            rewritten = summary.documents_rewritten,
            "run complete"
        );
        Ok(summary)
    }

    async fn preprocess_phase(&mut self, summary: &mut RunSummary) -> Result<()> {
        if self.options.dry_run {
            for entry in self.registry.entries_mut() {
                for job in std::mem::take(&mut entry.jobs) {
                    info!(
                        target: "auxmark::schedule",
                        detector = %job.detector,
                        document = %job.document.display(),
                        line = job.line_index + 1,
                        "[dry-run] would preprocess"
                    );
                    summary.jobs_submitted += 1;
                    summary.jobs_succeeded += 1;
                }
            }
            return Ok(());
        }

        let mut scheduler =
            Scheduler::new(self.options.workers, self.options.min_interval);
        let mut interrupted = false;
        'submission: for entry in self.registry.entries_mut() {
            let detector = Arc::clone(&entry.detector);
            for job in std::mem::take(&mut entry.jobs) {
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break 'submission;
                }
                summary.jobs_submitted += 1;
                scheduler.submit(job, Arc::clone(&detector));
            }
        }

        // In-flight jobs run to completion even when interrupted; only
        // new submissions stop.
        let report = scheduler.finish().await;
        summary.jobs_succeeded += report.succeeded;
        summary.jobs_failed += report.failed;
        for failure in report.failures {
            summary.record_error(failure);
        }

        if interrupted {
            return Err(EngineError::Interrupted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Detector;
    use async_trait::async_trait;
    use auxmark_model::{Action, Job};
    use regex::Regex;
    use serde_json::{Value, json};
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tempfile::TempDir;

    /// Fetch-and-rewrite stand-in: tags lines containing `remote`, counts
    /// preprocess calls, rewrites the marker only when preprocessing was
    /// told to succeed.
    struct EndToEndDetector {
        pattern: Regex,
        preprocess_calls: AtomicUsize,
        succeed: bool,
    }

    impl EndToEndDetector {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                pattern: Regex::new("remote").unwrap(),
                preprocess_calls: AtomicUsize::new(0),
                succeed,
            })
        }
    }

    #[async_trait]
    impl Detector for EndToEndDetector {
        fn name(&self) -> &'static str {
            "end_to_end"
        }

        fn prefilter(&self) -> &Regex {
            &self.pattern
        }

        fn probe(&self, _: &Path, _: usize, line: &str) -> (Action, Value) {
            (
                Action::TagPreprocessAndPostprocess,
                json!({"url": "https://example.com/x", "line": line}),
            )
        }

        async fn preprocess(&self, _job: &Job) -> bool {
            self.preprocess_calls.fetch_add(1, Ordering::SeqCst);
            self.succeed
        }

        fn postprocess(
            &self,
            _: &Path,
            _: usize,
            line: &str,
            _: &Value,
        ) -> String {
            // Mirrors the real detectors: only successfully preprocessed
            // work rewrites; this stand-in keys that off its own flag.
            if self.succeed {
                line.replace("remote", "local")
            } else {
                line.to_string()
            }
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            dry_run: false,
            workers: 4,
            min_interval: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn full_pipeline_scans_preprocesses_and_rewrites() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("note.md");
        tokio::fs::write(&doc, "remote thing\nplain\n").await.unwrap();

        let detector = EndToEndDetector::new(true);
        let mut registry = DetectorRegistry::new();
        registry.register(detector.clone()).unwrap();

        let summary = Orchestrator::new(registry, options())
            .run(vec![doc.clone()])
            .await
            .unwrap();

        assert_eq!(summary.documents_scanned, 1);
        assert_eq!(summary.lines_tagged, 1);
        assert_eq!(summary.jobs_submitted, 1);
        assert_eq!(summary.jobs_succeeded, 1);
        assert_eq!(summary.jobs_failed, 0);
        assert_eq!(summary.documents_rewritten, 1);
        assert_eq!(detector.preprocess_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            tokio::fs::read_to_string(&doc).await.unwrap(),
            "local thing\nplain\n"
        );
    }

    #[tokio::test]
    async fn failed_preprocess_still_reaches_postprocess() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("note.md");
        tokio::fs::write(&doc, "remote thing\n").await.unwrap();

        let detector = EndToEndDetector::new(false);
        let mut registry = DetectorRegistry::new();
        registry.register(detector.clone()).unwrap();

        let summary = Orchestrator::new(registry, options())
            .run(vec![doc.clone()])
            .await
            .unwrap();

        // The job failed, the tag survived, and postprocess ran but
        // changed nothing; the document must read as before.
        assert_eq!(summary.jobs_failed, 1);
        assert_eq!(summary.lines_tagged, 1);
        assert_eq!(summary.documents_unchanged, 1);
        assert_eq!(summary.documents_rewritten, 0);
        assert!(summary.has_errors());
        assert_eq!(
            tokio::fs::read_to_string(&doc).await.unwrap(),
            "remote thing\n"
        );
    }

    #[tokio::test]
    async fn dry_run_counts_jobs_as_successes_without_calling_preprocess() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("note.md");
        tokio::fs::write(&doc, "remote thing\n").await.unwrap();

        let detector = EndToEndDetector::new(true);
        let mut registry = DetectorRegistry::new();
        registry.register(detector.clone()).unwrap();

        let summary = Orchestrator::new(
            registry,
            RunOptions {
                dry_run: true,
                ..options()
            },
        )
        .run(vec![doc.clone()])
        .await
        .unwrap();

        assert_eq!(summary.jobs_submitted, 1);
        assert_eq!(summary.jobs_succeeded, 1);
        assert_eq!(detector.preprocess_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            tokio::fs::read_to_string(&doc).await.unwrap(),
            "remote thing\n"
        );
    }

    #[tokio::test]
    async fn empty_setup_aborts_before_any_work() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("note.md");
        tokio::fs::write(&doc, "remote\n").await.unwrap();

        let err = Orchestrator::new(DetectorRegistry::new(), options())
            .run(vec![doc])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoDetectors));

        let mut registry = DetectorRegistry::new();
        registry.register(EndToEndDetector::new(true)).unwrap();
        let err = Orchestrator::new(registry, options())
            .run(Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoDocuments));
    }

    #[tokio::test]
    async fn pre_cancelled_run_interrupts_without_scanning() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("note.md");
        tokio::fs::write(&doc, "remote\n").await.unwrap();

        let mut registry = DetectorRegistry::new();
        let detector = EndToEndDetector::new(true);
        registry.register(detector.clone()).unwrap();

        let orchestrator = Orchestrator::new(registry, options());
        orchestrator.cancellation_token().cancel();
        let err = orchestrator.run(vec![doc.clone()]).await.unwrap_err();

        assert!(matches!(err, EngineError::Interrupted));
        assert_eq!(detector.preprocess_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            tokio::fs::read_to_string(&doc).await.unwrap(),
            "remote\n"
        );
    }
}
