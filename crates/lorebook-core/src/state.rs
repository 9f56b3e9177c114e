//! Durable engine state.
//!
//! The engine persists three fields (`enabled`, `mode`, `active_name`) to a
//! single JSON file and reloads them at startup. Persistence is best-effort:
//! a failed write is logged and never fails the mutating operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::RagError;

/// Retrieval mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Query only the active knowledge base
    Single,
    /// Fan out over every loaded knowledge base and merge
    Multi,
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Single => f.write_str("single"),
            RetrievalMode::Multi => f.write_str("multi"),
        }
    }
}

/// The persisted engine state.
///
/// `active_name` uses the empty string for "none" on the wire; use
/// [`PersistedState::active`] for the `Option` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Whether retrieval is enabled
    pub enabled: bool,
    /// Current retrieval mode
    pub mode: RetrievalMode,
    /// Active knowledge-base name; empty string means none
    #[serde(default)]
    pub active_name: String,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: RetrievalMode::Single,
            active_name: String::new(),
        }
    }
}

impl PersistedState {
    /// Returns the active knowledge-base name, treating empty as none.
    pub fn active(&self) -> Option<&str> {
        if self.active_name.is_empty() {
            None
        } else {
            Some(&self.active_name)
        }
    }
}

/// Loads and saves [`PersistedState`] at a fixed path.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Creates a store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the state file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted state, falling back to defaults.
    ///
    /// A missing file silently yields defaults; an unreadable or unparseable
    /// file yields defaults with a logged warning. Unknown fields in the file
    /// are ignored.
    pub async fn load(&self) -> PersistedState {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return PersistedState::default();
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read state file, using defaults"
                );
                return PersistedState::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to parse state file, using defaults"
                );
                PersistedState::default()
            }
        }
    }

    /// Atomically writes `state` to the store's path.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] when the directory cannot be created or the
    /// temp-write / rename fails.
    pub async fn save(&self, state: &PersistedState) -> Result<(), RagError> {
        let json = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
