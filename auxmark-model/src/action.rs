/// Classification verdict a detector returns for a single line.
///
/// The scanner turns these into pipeline work: `Tag*` variants create
/// deferred preprocessing jobs and/or rewrite tags, `Expand` requests
/// promotion of the whole document into its bundle form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Line is of no interest to this detector.
    Ignore,
    /// Tag the line for rewrite only; no preprocessing needed.
    TagPostprocessOnly,
    /// Create a preprocessing job only; the line itself is never rewritten.
    TagPreprocessOnly,
    /// Create a preprocessing job and tag the line for rewrite.
    TagPreprocessAndPostprocess,
    /// Promote the document to `name/index.ext` before any work happens.
    Expand,
}

impl Action {
    /// Whether this verdict enqueues a preprocessing job.
    pub fn needs_job(self) -> bool {
        matches!(
            self,
            Action::TagPreprocessOnly | Action::TagPreprocessAndPostprocess
        )
    }

    /// Whether this verdict tags the line for the rewrite phase.
    pub fn needs_tag(self) -> bool {
        matches!(
            self,
            Action::TagPostprocessOnly | Action::TagPreprocessAndPostprocess
        )
    }
}
