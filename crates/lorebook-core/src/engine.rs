//! The retrieval engine facade.
//!
//! [`RagEngine`] is the public contract surface: knowledge-base lifecycle,
//! engine state (enabled flag, retrieval mode, active KB), and the query
//! entry point. One engine instance owns the event bus, the embedder adapter,
//! and the ingestion pipeline; construct it once in the composition root and
//! share it behind an `Arc`.
//!
//! # Locking discipline
//!
//! A single mutex covers the registry and the mutable engine state. External
//! collaborators (embedder, filesystem) are never called while it is held:
//! ingestion prepares outside the critical section and commits under it, and
//! state persistence writes a snapshot taken inside the critical section
//! after it is released. Lifecycle events are emitted inside the critical
//! section, which gives every listener the same global event order.

use crate::chunking::{CharacterSplitter, Splitter};
use crate::config::RagConfig;
use crate::embedding::{Embedder, EmbedderAdapter};
use crate::error::RagError;
use crate::events::{EventBus, RagEvent, Subscription};
use crate::kb::builder::KbBuilder;
use crate::kb::loader::load_system_kbs;
use crate::kb::registry::KbRegistry;
use crate::kb::{kb_name_for, KbOrigin, KnowledgeBase};
use crate::search::planner::RetrievalPlanner;
use crate::search::QueryResult;
use crate::state::{PersistedState, RetrievalMode, StateStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Options for a single query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overrides the engine's retrieval mode for this query
    pub mode: Option<RetrievalMode>,
    /// Cancellation token propagated into embedding and the MULTI fan-out
    pub cancel: Option<CancellationToken>,
}

/// One row of [`RagEngine::list_kbs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbSummary {
    /// Knowledge-base name
    pub name: String,
    /// Source document path
    pub path: PathBuf,
    /// Whether this entry is the active knowledge base
    pub active: bool,
    /// System or user origin
    pub origin: KbOrigin,
}

/// Result of [`RagEngine::add_kb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedKb {
    /// Name derived from the source file's basename
    pub name: String,
    /// Number of ingested chunks
    pub chunk_count: usize,
}

/// Snapshot returned by [`RagEngine::status`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    /// Whether retrieval is enabled
    pub enabled: bool,
    /// Current retrieval mode
    pub mode: RetrievalMode,
    /// Active knowledge-base name, if set
    pub active_name: Option<String>,
    /// Merged-view names in listing order
    pub loaded_names: Vec<String>,
    /// Total chunk count across the merged view
    pub total_chunks: usize,
    /// Configured chunk size
    pub chunk_size: usize,
    /// Configured chunk overlap
    pub chunk_overlap: usize,
}

/// Mutable state guarded by the engine mutex.
struct EngineInner {
    registry: KbRegistry,
    enabled: bool,
    mode: RetrievalMode,
    /// A system-KB load is in flight.
    system_loading: bool,
    /// The one-shot system-KB load has completed.
    system_loaded: bool,
}

/// The knowledge-base retrieval engine.
///
/// See the [module documentation](self) for the locking discipline. All
/// mutating operations are serialized on the engine mutex; queries take it
/// only long enough to snapshot the registry.
pub struct RagEngine {
    inner: Mutex<EngineInner>,
    events: Arc<EventBus>,
    embedder: Arc<EmbedderAdapter>,
    builder: KbBuilder,
    planner: RetrievalPlanner,
    state_store: StateStore,
    config: RagConfig,
    /// Wakes tasks waiting for the system-KB load to settle.
    load_notify: Notify,
}

impl RagEngine {
    /// Creates an engine with the default character splitter.
    ///
    /// Loads persisted state from `config.state_path` (falling back to
    /// defaults) and emits [`RagEvent::StateLoaded`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] for an inconsistent
    /// configuration.
    pub async fn new(config: RagConfig, provider: Arc<dyn Embedder>) -> Result<Self, RagError> {
        Self::with_splitter(config, provider, Arc::new(CharacterSplitter::new())).await
    }

    /// Creates an engine with a custom splitter implementation.
    pub async fn with_splitter(
        config: RagConfig,
        provider: Arc<dyn Embedder>,
        splitter: Arc<dyn Splitter>,
    ) -> Result<Self, RagError> {
        Self::with_bus(config, provider, splitter, Arc::new(EventBus::new())).await
    }

    /// Creates an engine publishing to a caller-provided event bus.
    ///
    /// Pre-subscribing on the bus lets the composition root observe
    /// [`RagEvent::StateLoaded`], which fires during construction.
    pub async fn with_bus(
        config: RagConfig,
        provider: Arc<dyn Embedder>,
        splitter: Arc<dyn Splitter>,
        events: Arc<EventBus>,
    ) -> Result<Self, RagError> {
        config.validate()?;

        let state_store = StateStore::new(&config.state_path);
        let state = state_store.load().await;
        info!(
            enabled = state.enabled,
            mode = %state.mode,
            active = state.active().unwrap_or("<none>"),
            "engine state loaded"
        );

        let embedder = Arc::new(EmbedderAdapter::new(provider, &config));
        let builder = KbBuilder::new(splitter, Arc::clone(&embedder), &config);
        let planner = RetrievalPlanner {
            max_docs: config.max_retrieved_docs,
            min_score: config.min_relevance_score,
        };

        let mut registry = KbRegistry::new();
        registry.restore_active(state.active().map(str::to_string));

        events.emit(&RagEvent::StateLoaded {
            enabled: state.enabled,
            mode: state.mode,
            active_name: state.active().map(str::to_string),
        });

        Ok(Self {
            inner: Mutex::new(EngineInner {
                registry,
                enabled: state.enabled,
                mode: state.mode,
                system_loading: false,
                system_loaded: false,
            }),
            events,
            embedder,
            builder,
            planner,
            state_store,
            config,
            load_notify: Notify::new(),
        })
    }

    /// Registers a lifecycle event listener.
    pub fn subscribe(
        &self,
        listener: impl Fn(&RagEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(listener)
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Lists the merged view: unshadowed system entries first (alphabetical),
    /// then user entries (alphabetical).
    pub async fn list_kbs(&self) -> Vec<KbSummary> {
        let inner = self.inner.lock().await;
        let active = inner.registry.active_name().map(str::to_string);
        inner
            .registry
            .merged_entries()
            .into_iter()
            .map(|kb| KbSummary {
                name: kb.name.clone(),
                path: kb.source_path.clone(),
                active: active.as_deref() == Some(kb.name.as_str()),
                origin: kb.origin,
            })
            .collect()
    }

    /// Ingests the file at `path` as a user knowledge base.
    ///
    /// Ingestion (file read, chunking, embedding) happens outside the engine
    /// mutex; the registry commit re-checks the name so the first of two
    /// concurrent adds wins. When the merged view was empty beforehand, the
    /// new knowledge base becomes active in the same critical section.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::AlreadyExists`] when a user KB of the derived name
    /// exists, [`RagError::Io`] when the file cannot be read, and propagates
    /// embedding failures.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn add_kb(&self, path: impl AsRef<Path>) -> Result<AddedKb, RagError> {
        let path = path.as_ref();
        let name = kb_name_for(path).ok_or_else(|| {
            RagError::InvalidArgument(format!("path has no file name: {}", path.display()))
        })?;

        // Fast precondition check; rechecked at commit time.
        {
            let inner = self.inner.lock().await;
            if inner.registry.user_contains(&name) {
                return Err(RagError::AlreadyExists(name));
            }
        }

        let kb = self
            .builder
            .build(&name, path, KbOrigin::User, &CancellationToken::new())
            .await?;
        let chunk_count = kb.chunk_count();
        let kb_path = kb.source_path.clone();

        let snapshot = {
            let mut inner = self.inner.lock().await;
            let was_empty = inner.registry.merged_is_empty();
            inner.registry.insert_user(Arc::new(kb))?;
            if was_empty {
                inner.registry.set_active(&name)?;
                debug!(name = %name, "activated first knowledge base");
            }
            self.events.emit(&RagEvent::KbAdded {
                name: name.clone(),
                path: kb_path,
                chunk_count,
                origin: KbOrigin::User,
            });
            self.snapshot_state(&inner)
        };
        self.persist(&snapshot).await;

        info!(name = %name, chunk_count, "knowledge base added");
        Ok(AddedKb { name, chunk_count })
    }

    /// Removes a knowledge base by name, user tier first.
    ///
    /// Clears the active pointer when the removed entry was active. Removing
    /// a system entry requires `allow_system_remove` (default true); the
    /// entry stays gone until a fresh process re-scans the directory.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] when the name is in neither tier.
    pub async fn remove_kb(&self, name: &str) -> Result<(), RagError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner
                .registry
                .remove(name, self.config.allow_system_remove)?;
            self.events.emit(&RagEvent::KbRemoved {
                name: name.to_string(),
            });
            self.snapshot_state(&inner)
        };
        self.persist(&snapshot).await;

        info!(name = %name, "knowledge base removed");
        Ok(())
    }

    /// Marks a knowledge base as active.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] when the merged view has no such entry.
    pub async fn switch_kb(&self, name: &str) -> Result<(), RagError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let kb = inner.registry.set_active(name)?;
            self.events.emit(&RagEvent::KbSwitched {
                name: kb.name.clone(),
                path: kb.source_path.clone(),
            });
            self.snapshot_state(&inner)
        };
        self.persist(&snapshot).await;

        info!(name = %name, "active knowledge base switched");
        Ok(())
    }

    /// Enables or disables retrieval.
    ///
    /// Flipping to enabled while the mode is MULTI triggers the lazy
    /// system-KB load and returns only after it completes.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] when the triggered system load cannot access
    /// the knowledge-base directory.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), RagError> {
        let (snapshot, trigger_load) = {
            let mut inner = self.inner.lock().await;
            let old = inner.enabled;
            inner.enabled = enabled;
            self.events.emit(&RagEvent::EnabledChanged { old, new: enabled });
            let trigger = enabled
                && !old
                && inner.mode == RetrievalMode::Multi
                && !inner.system_loaded;
            (self.snapshot_state(&inner), trigger)
        };
        self.persist(&snapshot).await;

        if trigger_load {
            self.ensure_system_kbs().await?;
        }
        Ok(())
    }

    /// Sets the retrieval mode.
    ///
    /// Entering MULTI while enabled triggers the lazy system-KB load and
    /// returns only after it completes.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] when the triggered system load cannot access
    /// the knowledge-base directory.
    pub async fn set_mode(&self, mode: RetrievalMode) -> Result<(), RagError> {
        let (snapshot, trigger_load) = {
            let mut inner = self.inner.lock().await;
            let old = inner.mode;
            inner.mode = mode;
            self.events.emit(&RagEvent::ModeChanged { old, new: mode });
            let trigger =
                inner.enabled && mode == RetrievalMode::Multi && !inner.system_loaded;
            (self.snapshot_state(&inner), trigger)
        };
        self.persist(&snapshot).await;

        if trigger_load {
            self.ensure_system_kbs().await?;
        }
        Ok(())
    }

    /// Returns a consistent snapshot of the engine state.
    pub async fn status(&self) -> EngineStatus {
        let inner = self.inner.lock().await;
        EngineStatus {
            enabled: inner.enabled,
            mode: inner.mode,
            active_name: inner.registry.active_name().map(str::to_string),
            loaded_names: inner
                .registry
                .merged_entries()
                .into_iter()
                .map(|kb| kb.name.clone())
                .collect(),
            total_chunks: inner.registry.total_chunks(),
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
        }
    }

    /// Runs a retrieval query with default options.
    pub async fn query(&self, text: &str) -> Result<QueryResult, RagError> {
        self.query_with(text, QueryOptions::default()).await
    }

    /// Runs a retrieval query.
    ///
    /// The registry snapshot is taken under the mutex at the start of the
    /// query; the embedding call and the search run against that snapshot
    /// with the mutex released.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidArgument`] for empty or whitespace-only text
    /// - [`RagError::Disabled`] while the engine is disabled (checked before
    ///   any embedder call)
    /// - [`RagError::NoActiveKb`] in SINGLE mode without a resolvable active
    ///   knowledge base
    /// - [`RagError::NoKbLoaded`] in MULTI mode with an empty merged view
    /// - [`RagError::NoRelevantContent`] when nothing reaches the threshold
    /// - [`RagError::Cancelled`] when the token fires
    #[instrument(skip_all, fields(text_len = text.len()))]
    pub async fn query_with(
        &self,
        text: &str,
        opts: QueryOptions,
    ) -> Result<QueryResult, RagError> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidArgument(
                "query text is empty".to_string(),
            ));
        }
        let cancel = opts.cancel.unwrap_or_default();

        enum Plan {
            Single(Arc<KnowledgeBase>),
            Multi(Vec<Arc<KnowledgeBase>>),
        }

        let plan = {
            let inner = self.inner.lock().await;
            if !inner.enabled {
                return Err(RagError::Disabled);
            }
            match opts.mode.unwrap_or(inner.mode) {
                RetrievalMode::Single => {
                    let kb = inner.registry.active().cloned().ok_or(RagError::NoActiveKb)?;
                    Plan::Single(kb)
                }
                RetrievalMode::Multi => {
                    let kbs = inner.registry.snapshot_merged();
                    if kbs.is_empty() {
                        return Err(RagError::NoKbLoaded);
                    }
                    Plan::Multi(kbs)
                }
            }
        };

        let query_vec = self.embedder.embed_one(text, &cancel).await?;

        match plan {
            Plan::Single(kb) => {
                let matches = self.planner.search_single(&kb, &query_vec)?;
                Ok(self
                    .planner
                    .assemble(matches, Some(kb.name.clone()), Vec::new()))
            }
            Plan::Multi(kbs) => {
                let names: Vec<String> = kbs.iter().map(|kb| kb.name.clone()).collect();
                let matches = self
                    .planner
                    .search_multi(&kbs, Arc::new(query_vec), &cancel)
                    .await?;
                Ok(self.planner.assemble(matches, None, names))
            }
        }
    }

    /// Runs the one-shot system-KB load, or waits for a load in flight.
    ///
    /// The loading flag admits a single loader; late arrivals park on the
    /// notifier and re-check. Once the loaded flag is set the scan never
    /// re-runs in this process.
    async fn ensure_system_kbs(&self) -> Result<(), RagError> {
        loop {
            let (skip_names, was_empty) = {
                let mut inner = self.inner.lock().await;
                if inner.system_loaded {
                    return Ok(());
                }
                if inner.system_loading {
                    // Register for the wake-up before releasing the lock so a
                    // completion between unlock and await cannot be missed.
                    let notified = self.load_notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    drop(inner);
                    notified.await;
                    continue;
                }
                inner.system_loading = true;
                (inner.registry.user_names(), inner.registry.merged_is_empty())
            };

            // Scan and ingest with the mutex released.
            let loaded = load_system_kbs(
                &self.builder,
                &self.config.kb_dir,
                &skip_names,
                &CancellationToken::new(),
            )
            .await;

            let outcome = {
                let mut inner = self.inner.lock().await;
                inner.system_loading = false;
                match loaded {
                    Ok(kbs) => {
                        let mut count = 0usize;
                        for kb in kbs {
                            // A user KB committed during the scan wins.
                            if inner.registry.user_contains(&kb.name) {
                                debug!(name = %kb.name, "user knowledge base took the name during load, skipping");
                                continue;
                            }
                            inner.registry.insert_system(Arc::new(kb));
                            count += 1;
                        }
                        inner.system_loaded = true;

                        if was_empty
                            && !inner.registry.merged_is_empty()
                            && inner.registry.active().is_none()
                        {
                            if let Some(first) = inner.registry.first_merged_name() {
                                let _ = inner.registry.set_active(&first);
                                debug!(name = %first, "auto-activated first system knowledge base");
                            }
                        }

                        self.events.emit(&RagEvent::SystemKbsLoaded { count });
                        info!(count, "system knowledge bases loaded");
                        Ok(self.snapshot_state(&inner))
                    }
                    Err(err) => Err(err),
                }
            };
            self.load_notify.notify_waiters();

            return match outcome {
                Ok(snapshot) => {
                    self.persist(&snapshot).await;
                    Ok(())
                }
                Err(err) => Err(err),
            };
        }
    }

    /// Captures the persistable state under the engine mutex.
    fn snapshot_state(&self, inner: &MutexGuard<'_, EngineInner>) -> PersistedState {
        PersistedState {
            enabled: inner.enabled,
            mode: inner.mode,
            active_name: inner
                .registry
                .active_name()
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Best-effort state persistence: failures are logged, never surfaced.
    async fn persist(&self, snapshot: &PersistedState) {
        if let Err(err) = self.state_store.save(snapshot).await {
            warn!(
                path = %self.state_store.path().display(),
                error = %err,
                "failed to persist engine state"
            );
        }
    }
}
