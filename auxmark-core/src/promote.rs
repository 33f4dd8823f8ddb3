//! Promotion of a standalone document into its bundle form.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Computes the bundle identity for `document` without touching the
/// filesystem: `posts/chaos.md` becomes `posts/chaos/index.md`. The
/// extension is preserved.
///
/// A document that already is a bundle index cannot be promoted again;
/// that is reported as [`EngineError::AlreadyBundle`].
pub fn bundle_identity(document: &Path) -> Result<PathBuf> {
    let stem = document
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| {
            EngineError::Internal(format!(
                "document has no usable file name: {}",
                document.display()
            ))
        })?;

    if stem == "index" {
        return Err(EngineError::AlreadyBundle(
            document.display().to_string(),
        ));
    }

    let index_name = match document.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("index.{ext}"),
        None => "index".to_string(),
    };

    let parent = document.parent().unwrap_or_else(|| Path::new(""));
    Ok(parent.join(stem).join(index_name))
}

/// Moves `document` into its bundle form on disk and returns the new
/// path. The containing directory is created as needed.
pub async fn promote(document: &Path) -> Result<PathBuf> {
    let target = bundle_identity(document)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(document, &target).await?;
    debug!(
        from = %document.display(),
        to = %target.display(),
        "promoted document to bundle"
    );
    Ok(target)
}
