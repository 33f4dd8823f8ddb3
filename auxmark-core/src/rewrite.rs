//! Phase three: rewriting tagged lines document by document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use auxmark_model::{RunSummary, TaggedLine};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::registry::DetectorRegistry;

/// Applies accumulated rewrite tags. Each document is read fresh, its
/// tagged lines run through the owning detectors' `postprocess` in
/// registration order, and the result is published by atomic temp-file
/// replacement. A document whose rewritten content is byte-identical is
/// left untouched, which makes the pass idempotent.
#[derive(Debug)]
pub struct Rewriter {
    dry_run: bool,
}

/// Tags for one document, grouped per line. The inner vectors hold
/// `(registry index, tag)` pairs and are already in registration order
/// because the plan is built by walking the registry.
type LinePlan<'a> = BTreeMap<usize, Vec<(usize, &'a TaggedLine)>>;

impl Rewriter {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Rewrite every document with at least one tag. Per-document
    /// failures are recorded and the pass moves on; only an interrupt
    /// stops it.
    pub async fn rewrite_all(
        &self,
        registry: &DetectorRegistry,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut plan: BTreeMap<&Path, LinePlan<'_>> = BTreeMap::new();
        for (order, entry) in registry.entries().iter().enumerate() {
            for tag in &entry.tagged {
                plan.entry(tag.document.as_path())
                    .or_default()
                    .entry(tag.line_index)
                    .or_default()
                    .push((order, tag));
            }
        }

        for (document, lines) in &plan {
            if cancel.is_cancelled() {
                return Err(EngineError::Interrupted);
            }

            if self.dry_run {
                info!(
                    target: "auxmark::rewrite",
                    document = %document.display(),
                    tagged_lines = lines.len(),
                    "[dry-run] would rewrite document"
                );
                summary.documents_rewritten += 1;
                continue;
            }

            if let Err(err) =
                self.rewrite_document(registry, document, lines, summary).await
            {
                warn!(
                    target: "auxmark::rewrite",
                    document = %document.display(),
                    error = %err,
                    "rewrite failed, document left unmodified"
                );
                summary.record_error(format!(
                    "rewrite failed for {}: {err}",
                    document.display()
                ));
            }
        }
        Ok(())
    }

    async fn rewrite_document(
        &self,
        registry: &DetectorRegistry,
        document: &Path,
        lines: &LinePlan<'_>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let text = fs::read_to_string(document).await?;
        let mut segments: Vec<String> =
            text.split_inclusive('\n').map(str::to_string).collect();

        let mut changed = false;
        for (&line_index, tags) in lines {
            let Some(segment) = segments.get_mut(line_index) else {
                summary.record_error(format!(
                    "{}: line {} no longer exists, skipping its rewrite",
                    document.display(),
                    line_index + 1
                ));
                continue;
            };

            let (body, ending) = split_line_ending(segment);
            let mut current = body.to_string();
            for (order, tag) in tags {
                current = registry.entries()[*order].detector.postprocess(
                    document,
                    line_index,
                    &current,
                    &tag.metadata,
                );
            }

            if current != body {
                let rebuilt = format!("{current}{ending}");
                *segment = rebuilt;
                changed = true;
            }
        }

        if !changed {
            debug!(
                target: "auxmark::rewrite",
                document = %document.display(),
                "no changes after postprocess"
            );
            summary.documents_unchanged += 1;
            return Ok(());
        }

        write_atomic(document, &segments.concat()).await?;
        summary.documents_rewritten += 1;
        info!(
            target: "auxmark::rewrite",
            document = %document.display(),
            "rewrote document"
        );
        Ok(())
    }
}

/// Splits a physical line into its text and its line ending.
fn split_line_ending(segment: &str) -> (&str, &str) {
    if let Some(body) = segment.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = segment.strip_suffix('\n') {
        (body, "\n")
    } else {
        (segment, "")
    }
}

/// Writes through a sibling temp file followed by an atomic rename, so a
/// failure part-way never leaves a truncated document behind.
async fn write_atomic(document: &Path, contents: &str) -> std::io::Result<()> {
    let file_name = document
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document");
    let tmp = document.with_file_name(format!(".{file_name}.auxmark.tmp"));

    fs::write(&tmp, contents).await?;
    if let Err(err) = fs::rename(&tmp, document).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}
