use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::conflict::{ConflictRecord, EventualResolver, ImmediateResolver, ResolveError, Resolution};
use crate::feed::{ChangeCallback, ChangeNotice, ErrorCallback};
use crate::jobs::JobDispatcher;
use crate::store::DocumentStore;
use crate::write::{IdLocks, WriteCoordinator};

use super::{ConflictEngine, EngineCore, ResolvedCallback};

/// Marker type for builder state: needs a store to be configured
pub struct NeedsStore;

/// Marker type for builder state: ready to build, holding the store
pub struct ReadyToBuild<S>(S);

/// Engine builder with typestate pattern for compile-time enforcement
///
/// The builder enforces that a store is configured before building.
/// Strategies default to the ones named in the config; explicit resolvers
/// take precedence.
pub struct EngineBuilder<S: DocumentStore, State = NeedsStore> {
    config: EngineConfig,
    put_resolver: Option<Arc<dyn ImmediateResolver<S>>>,
    post_resolver: Option<Arc<dyn ImmediateResolver<S>>>,
    eventual_resolver: Option<Arc<dyn EventualResolver<S>>>,
    on_change: Option<ChangeCallback>,
    on_error: Option<ErrorCallback>,
    on_resolved: Option<ResolvedCallback>,
    state: State,
}

// Common builder methods available in all states
impl<S: DocumentStore, State> EngineBuilder<S, State> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn put_resolver(mut self, resolver: Arc<dyn ImmediateResolver<S>>) -> Self {
        self.put_resolver = Some(resolver);
        self
    }

    pub fn post_resolver(mut self, resolver: Arc<dyn ImmediateResolver<S>>) -> Self {
        self.post_resolver = Some(resolver);
        self
    }

    pub fn eventual_resolver(mut self, resolver: Arc<dyn EventualResolver<S>>) -> Self {
        self.eventual_resolver = Some(resolver);
        self
    }

    /// Called for every change, deletion and replicated batch
    pub fn on_change(mut self, callback: impl Fn(ChangeNotice) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    /// Called for feed failures, replication errors and abandoned resolutions
    pub fn on_error(mut self, callback: impl Fn(ResolveError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Called after each successful eventual resolution
    pub fn on_resolved(
        mut self,
        callback: impl Fn(&ConflictRecord, &Resolution) + Send + Sync + 'static,
    ) -> Self {
        self.on_resolved = Some(Arc::new(callback));
        self
    }

    fn with_state<Next>(self, state: Next) -> EngineBuilder<S, Next> {
        EngineBuilder {
            config: self.config,
            put_resolver: self.put_resolver,
            post_resolver: self.post_resolver,
            eventual_resolver: self.eventual_resolver,
            on_change: self.on_change,
            on_error: self.on_error,
            on_resolved: self.on_resolved,
            state,
        }
    }
}

impl<S: DocumentStore> Default for EngineBuilder<S, NeedsStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DocumentStore> EngineBuilder<S, NeedsStore> {
    pub fn new() -> Self {
        EngineBuilder {
            config: EngineConfig::default(),
            put_resolver: None,
            post_resolver: None,
            eventual_resolver: None,
            on_change: None,
            on_error: None,
            on_resolved: None,
            state: NeedsStore,
        }
    }

    pub fn store(self, store: S) -> EngineBuilder<S, ReadyToBuild<S>> {
        self.with_state(ReadyToBuild(store))
    }
}

// Build only available in ReadyToBuild state
impl<S: DocumentStore> EngineBuilder<S, ReadyToBuild<S>> {
    pub fn build(self) -> ConflictEngine<S> {
        let ReadyToBuild(store) = self.state;
        let config = self.config;

        let mut writes = WriteCoordinator::new(store);
        let mut resolution_locks = None;
        if config.serialize_per_document {
            writes = writes.with_id_locks();
            resolution_locks = Some(IdLocks::new());
        }

        let put_strategy = self
            .put_resolver
            .unwrap_or_else(|| config.put_strategy.resolver());
        let post_strategy = self
            .post_resolver
            .unwrap_or_else(|| config.post_strategy.resolver());
        let eventual = self
            .eventual_resolver
            .unwrap_or_else(|| config.eventual_strategy.resolver());

        tracing::info!(
            db = %config.db_name,
            put = ?put_strategy,
            post = ?post_strategy,
            eventual = ?eventual,
            serialized = config.serialize_per_document,
            "conflict engine ready"
        );

        let (jobs, job_receiver) = JobDispatcher::new();
        ConflictEngine {
            core: Arc::new(EngineCore {
                config,
                writes,
                put_strategy,
                post_strategy,
                eventual,
                resolution_locks,
                on_change: self.on_change,
                on_error: self.on_error,
                on_resolved: self.on_resolved,
            }),
            jobs,
            job_receiver: Arc::new(Mutex::new(Some(job_receiver))),
        }
    }
}
