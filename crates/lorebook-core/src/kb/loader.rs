//! System knowledge-base directory loader.
//!
//! Scans the configured directory for `.txt` files and ingests each one as a
//! system knowledge base named after the file's basename. The scan is invoked
//! lazily and at most once per process; the engine gates that with its
//! loading/loaded flags — this module only does the filesystem work.

use super::builder::KbBuilder;
use super::{kb_name_for, KbOrigin, KnowledgeBase};
use crate::error::RagError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Discovers `.txt` files directly under `dir`, creating the directory when
/// absent.
///
/// Subdirectories and non-`.txt` entries are ignored; symlinks are followed.
/// Results are sorted so ingestion order is deterministic.
///
/// # Errors
///
/// Returns [`RagError::Io`] when the directory cannot be created or read.
pub async fn scan_kb_dir(dir: &Path) -> Result<Vec<PathBuf>, RagError> {
    tokio::fs::create_dir_all(dir).await?;

    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        // metadata() follows symlinks, so a link to a regular file qualifies.
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        let is_txt = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));
        if !is_txt {
            continue;
        }

        paths.push(path);
    }

    paths.sort();
    Ok(paths)
}

/// Loads every `.txt` file under `dir` as a system knowledge base.
///
/// Files whose derived name appears in `skip_names` (existing user KBs) are
/// skipped. A file that fails to ingest is logged and skipped; it never
/// aborts the load of the remaining files.
///
/// # Errors
///
/// Returns [`RagError::Io`] only for directory-level failures; per-file
/// failures are swallowed.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn load_system_kbs(
    builder: &KbBuilder,
    dir: &Path,
    skip_names: &BTreeSet<String>,
    cancel: &CancellationToken,
) -> Result<Vec<KnowledgeBase>, RagError> {
    let paths = scan_kb_dir(dir).await?;

    let mut kbs = Vec::new();
    for path in paths {
        let Some(name) = kb_name_for(&path) else {
            continue;
        };
        if skip_names.contains(&name) {
            debug!(name = %name, "user knowledge base shadows system file, skipping");
            continue;
        }

        match builder.build(&name, &path, KbOrigin::System, cancel).await {
            Ok(kb) => kbs.push(kb),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to load system knowledge base, skipping"
                );
            }
        }
    }

    debug!(count = kbs.len(), "system knowledge-base scan complete");
    Ok(kbs)
}
