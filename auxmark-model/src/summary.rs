use std::fmt;

/// Tally of one pipeline run, printed at the end and carried back to the
/// caller. Per-item failures land in `errors` without aborting the run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub documents_scanned: usize,
    pub documents_promoted: usize,
    pub lines_tagged: usize,
    pub jobs_submitted: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub documents_rewritten: usize,
    pub documents_unchanged: usize,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "documents scanned:   {}", self.documents_scanned)?;
        writeln!(f, "documents promoted:  {}", self.documents_promoted)?;
        writeln!(f, "lines tagged:        {}", self.lines_tagged)?;
        writeln!(
            f,
            "jobs:                {} submitted, {} succeeded, {} failed",
            self.jobs_submitted, self.jobs_succeeded, self.jobs_failed
        )?;
        write!(
            f,
            "documents rewritten: {} ({} unchanged)",
            self.documents_rewritten, self.documents_unchanged
        )?;
        if self.has_errors() {
            write!(f, "\nerrors:")?;
            for error in &self.errors {
                write!(f, "\n  - {error}")?;
            }
        }
        Ok(())
    }
}
