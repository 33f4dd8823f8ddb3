//! Git-based discovery of the site root and its markdown documents.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Locates the enclosing git work tree. The pipeline operates on whole
/// site checkouts, so running outside a repository is a setup error.
pub async fn find_site_root(start: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start)
        .output()
        .await
        .map_err(|err| {
            EngineError::Discovery(format!("failed to run git: {err}"))
        })?;

    if !output.status.success() {
        return Err(EngineError::Discovery(
            "not inside a git repository".to_string(),
        ));
    }

    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        return Err(EngineError::Discovery(
            "git did not report a repository root".to_string(),
        ));
    }
    Ok(PathBuf::from(root))
}

/// Lists tracked markdown documents under `root`, in the order git
/// reports them. Tracked-but-deleted entries are filtered out.
pub async fn markdown_documents(root: &Path) -> Result<Vec<PathBuf>> {
    let output = Command::new("git")
        .args(["ls-files", "--", "*.md", "**/*.md"])
        .current_dir(root)
        .output()
        .await
        .map_err(|err| {
            EngineError::Discovery(format!("failed to run git: {err}"))
        })?;

    if !output.status.success() {
        return Err(EngineError::Discovery(format!(
            "git ls-files failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let mut documents = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if line.is_empty() {
            continue;
        }
        let path = root.join(line);
        if path.is_file() {
            documents.push(path);
        }
    }
    debug!(count = documents.len(), "discovered markdown documents");
    Ok(documents)
}
