use std::path::PathBuf;

use serde_json::Value;

/// A deferred preprocessing unit captured during scanning and executed by
/// the scheduler. `metadata` is whatever the owning detector's probe
/// produced; the engine treats it as opaque apart from origin derivation.
#[derive(Debug, Clone)]
pub struct Job {
    pub document: PathBuf,
    pub line_index: usize,
    pub line: String,
    /// Name of the detector that created the job.
    pub detector: String,
    pub metadata: Value,
}

impl Job {
    pub fn new(
        document: PathBuf,
        line_index: usize,
        line: String,
        detector: String,
        metadata: Value,
    ) -> Self {
        Job {
            document,
            line_index,
            line,
            detector,
            metadata,
        }
    }
}

/// A line marked for the rewrite phase, held in the tagging detector's
/// registry slot. `line` is the text as it read at scan time; the rewrite
/// engine re-reads the document and passes the current text to
/// `postprocess`.
#[derive(Debug, Clone)]
pub struct TaggedLine {
    pub document: PathBuf,
    pub line_index: usize,
    pub line: String,
    pub metadata: Value,
}

impl TaggedLine {
    pub fn new(
        document: PathBuf,
        line_index: usize,
        line: String,
        metadata: Value,
    ) -> Self {
        TaggedLine {
            document,
            line_index,
            line,
            metadata,
        }
    }
}
