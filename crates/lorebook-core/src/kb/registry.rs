//! Two-tier knowledge-base registry.

use super::KnowledgeBase;
use crate::error::RagError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Registry of loaded knowledge bases.
///
/// Two maps keyed by name — `user` and `system` — presented to callers as a
/// merged view in which user entries shadow system entries of the same name.
/// At most one entry of the merged view is active; `active_name` points to it.
///
/// The active pointer may temporarily dangle: it is restored from persisted
/// state before any knowledge base is loaded. [`KbRegistry::active`] resolves
/// through the merged view and returns `None` for a dangling pointer, which
/// SINGLE-mode queries surface as "no active knowledge base".
#[derive(Debug, Default)]
pub struct KbRegistry {
    user: BTreeMap<String, Arc<KnowledgeBase>>,
    system: BTreeMap<String, Arc<KnowledgeBase>>,
    active_name: Option<String>,
}

impl KbRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a user knowledge base.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::AlreadyExists`] when a user entry of the same name
    /// is present. System entries of the same name are shadowed, not
    /// replaced.
    pub fn insert_user(&mut self, kb: Arc<KnowledgeBase>) -> Result<(), RagError> {
        if self.user.contains_key(&kb.name) {
            return Err(RagError::AlreadyExists(kb.name.clone()));
        }
        self.user.insert(kb.name.clone(), kb);
        Ok(())
    }

    /// Inserts a system knowledge base, replacing any previous system entry
    /// of the same name.
    pub fn insert_system(&mut self, kb: Arc<KnowledgeBase>) {
        self.system.insert(kb.name.clone(), kb);
    }

    /// Removes a knowledge base by name, user tier first.
    ///
    /// Clears the active pointer when the removed entry was active.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] when the name is in neither map, and
    /// [`RagError::InvalidArgument`] when the name resolves to a system entry
    /// and `allow_system` is false.
    pub fn remove(
        &mut self,
        name: &str,
        allow_system: bool,
    ) -> Result<Arc<KnowledgeBase>, RagError> {
        let removed = if let Some(kb) = self.user.remove(name) {
            kb
        } else if self.system.contains_key(name) {
            if !allow_system {
                return Err(RagError::InvalidArgument(format!(
                    "removal of system knowledge base '{name}' is disabled"
                )));
            }
            self.system
                .remove(name)
                .ok_or_else(|| RagError::NotFound(name.to_string()))?
        } else {
            return Err(RagError::NotFound(name.to_string()));
        };

        // The removed entry may have been shadowing a system KB of the same
        // name; the pointer stays valid in that case.
        if self.active_name.as_deref() == Some(name) && self.get_merged(name).is_none() {
            self.active_name = None;
        }
        Ok(removed)
    }

    /// Resolves a name through the merged view (user shadows system).
    pub fn get_merged(&self, name: &str) -> Option<&Arc<KnowledgeBase>> {
        self.user.get(name).or_else(|| self.system.get(name))
    }

    /// Returns true when the merged view has no entries.
    pub fn merged_is_empty(&self) -> bool {
        self.user.is_empty() && self.system.is_empty()
    }

    /// Returns true when a user entry with this name exists.
    pub fn user_contains(&self, name: &str) -> bool {
        self.user.contains_key(name)
    }

    /// Returns the user-tier names.
    pub fn user_names(&self) -> BTreeSet<String> {
        self.user.keys().cloned().collect()
    }

    /// Merged-view entries in listing order: unshadowed system entries first
    /// (alphabetical), then user entries (alphabetical).
    pub fn merged_entries(&self) -> Vec<&Arc<KnowledgeBase>> {
        self.system
            .iter()
            .filter(|(name, _)| !self.user.contains_key(*name))
            .map(|(_, kb)| kb)
            .chain(self.user.values())
            .collect()
    }

    /// Snapshot of the merged view in listing order.
    pub fn snapshot_merged(&self) -> Vec<Arc<KnowledgeBase>> {
        self.merged_entries().into_iter().cloned().collect()
    }

    /// Lexicographically smallest name of the merged view.
    pub fn first_merged_name(&self) -> Option<String> {
        let user_first = self.user.keys().next();
        let system_first = self
            .system
            .keys()
            .find(|name| !self.user.contains_key(*name));
        match (user_first, system_first) {
            (Some(u), Some(s)) => Some(u.min(s).clone()),
            (Some(u), None) => Some(u.clone()),
            (None, Some(s)) => Some(s.clone()),
            (None, None) => None,
        }
    }

    /// The currently active knowledge base, resolved through the merged view.
    pub fn active(&self) -> Option<&Arc<KnowledgeBase>> {
        self.active_name
            .as_deref()
            .and_then(|name| self.get_merged(name))
    }

    /// The active name, whether or not it currently resolves.
    pub fn active_name(&self) -> Option<&str> {
        self.active_name.as_deref()
    }

    /// Marks `name` as the active knowledge base.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] when the merged view has no such entry.
    pub fn set_active(&mut self, name: &str) -> Result<Arc<KnowledgeBase>, RagError> {
        let kb = self
            .get_merged(name)
            .cloned()
            .ok_or_else(|| RagError::NotFound(name.to_string()))?;
        self.active_name = Some(name.to_string());
        Ok(kb)
    }

    /// Restores the active pointer from persisted state without validation.
    pub fn restore_active(&mut self, name: Option<String>) {
        self.active_name = name;
    }

    /// Total chunk count across the merged view.
    pub fn total_chunks(&self) -> usize {
        self.merged_entries()
            .iter()
            .map(|kb| kb.chunk_count())
            .sum()
    }
}
