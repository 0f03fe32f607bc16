//! Scope: the root container owning accessors, presets, extensions and
//! event listeners, plus the lazy resolution engine and reactive
//! propagation.
//!
//! Resolution is lazy and recursive: `resolve` walks the dependency
//! declaration, consults the per-executor cell, drives the factory through
//! the extension pipeline and caches the result. Concurrent callers share
//! one pending future, so at most one factory invocation occurs per cell
//! lifecycle. A per-call resolution chain detects cycles before any cell
//! is awaited, so cyclic graphs fail fast instead of deadlocking.

use crate::accessor::{Accessor, Cell, CellState, ReleaseMode, ResolutionState, SharedResolve};
use crate::error::{CoreError, ErrorCode, Stage};
use crate::executor::{
    downcast_value, Controller, DynExecutor, ErasedExecutor, Executor, ExecutorId,
};
use crate::extension::{compose_resolve, Extension, FactoryThunk, Operation, ResolveInfo};
use crate::pod::{Pod, PodBuilder, PodInner};
use crate::tag::{MetaMap, Tagged};
use crate::types::{BoxFuture, ErasedValue};
use dashmap::DashMap;
use futures_util::FutureExt;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ── Presets ─────────────────────────────────────────────────────────────────

/// A precomputed value that short-circuits an executor's factory: the
/// accessor transitions directly to resolved, with no factory call and no
/// dependency traversal.
pub struct Preset {
    pub(crate) id: ExecutorId,
    pub(crate) name: String,
    pub(crate) value: ErasedValue,
}

impl fmt::Debug for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preset")
            .field("executor", &self.name)
            .finish()
    }
}

/// Create a preset override for `executor`.
pub fn preset<T: Send + Sync + 'static>(executor: &Executor<T>, value: T) -> Preset {
    Preset {
        id: executor.id(),
        name: executor.name(),
        value: Arc::new(value),
    }
}

// ── Events ──────────────────────────────────────────────────────────────────

/// Fired after an executor's factory result is cached.
#[derive(Debug, Clone)]
pub struct ResolveEvent {
    pub executor_id: ExecutorId,
    pub executor_name: String,
}

/// Fired after a successful update, once reactive propagation completes.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub executor_id: ExecutorId,
    pub executor_name: String,
    pub epoch: u64,
}

/// Fired after an accessor's value leaves the cache.
#[derive(Debug, Clone)]
pub struct ReleaseEvent {
    pub executor_id: ExecutorId,
    pub executor_name: String,
    pub mode: ReleaseMode,
}

type ResolveListener = Arc<dyn Fn(&ResolveEvent) + Send + Sync>;
type UpdateEventListener = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;
type ReleaseListener = Arc<dyn Fn(&ReleaseEvent) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&CoreError) + Send + Sync>;

#[derive(Default)]
struct EventListeners {
    resolve: Mutex<Vec<ResolveListener>>,
    update: Mutex<Vec<UpdateEventListener>>,
    release: Mutex<Vec<ReleaseListener>>,
    error: Mutex<Vec<ErrorListener>>,
}

// ── ScopeInner ──────────────────────────────────────────────────────────────

pub(crate) struct ScopeInner {
    pub(crate) id: Uuid,
    pub(crate) cells: DashMap<ExecutorId, Arc<Cell>>,
    pub(crate) presets: DashMap<ExecutorId, ErasedValue>,
    pub(crate) extensions: Vec<Arc<dyn Extension>>,
    meta: MetaMap,
    disposed: CancellationToken,
    /// Order in which cells reached resolved, for reverse-order disposal.
    completion_order: Mutex<Vec<ExecutorId>>,
    listeners: EventListeners,
}

impl ScopeInner {
    fn check_disposed(&self) -> Result<(), CoreError> {
        if self.disposed.is_cancelled() {
            Err(CoreError::scope_disposed(self.id))
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.is_cancelled()
    }

    pub(crate) fn cell_for(&self, exec: &Arc<dyn ErasedExecutor>) -> Arc<Cell> {
        self.cells
            .entry(exec.id())
            .or_insert_with(|| Cell::new(exec.clone()))
            .clone()
    }

    pub(crate) fn peek_resolved(&self, id: ExecutorId) -> Option<ErasedValue> {
        self.cells.get(&id).and_then(|cell| cell.peek_value())
    }

    fn record_completion(&self, id: ExecutorId) {
        let mut order = self.completion_order.lock().expect("scope poisoned");
        order.retain(|other| *other != id);
        order.push(id);
    }

    fn fire_resolve(&self, exec: &Arc<dyn ErasedExecutor>) {
        let event = ResolveEvent {
            executor_id: exec.id(),
            executor_name: exec.name(),
        };
        let listeners: Vec<ResolveListener> = self
            .listeners
            .resolve
            .lock()
            .expect("scope poisoned")
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }

    fn fire_update(&self, exec: &Arc<dyn ErasedExecutor>, epoch: u64) {
        let event = UpdateEvent {
            executor_id: exec.id(),
            executor_name: exec.name(),
            epoch,
        };
        let listeners: Vec<UpdateEventListener> = self
            .listeners
            .update
            .lock()
            .expect("scope poisoned")
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }

    fn fire_release(&self, exec: &Arc<dyn ErasedExecutor>, mode: ReleaseMode) {
        let event = ReleaseEvent {
            executor_id: exec.id(),
            executor_name: exec.name(),
            mode,
        };
        let listeners: Vec<ReleaseListener> = self
            .listeners
            .release
            .lock()
            .expect("scope poisoned")
            .clone();
        for listener in listeners {
            listener(&event);
        }
    }

    pub(crate) fn fire_error(self: &Arc<Self>, err: &CoreError, op: Operation) {
        let listeners: Vec<ErrorListener> =
            self.listeners.error.lock().expect("scope poisoned").clone();
        for listener in listeners {
            listener(err);
        }
        let scope = Scope {
            inner: self.clone(),
        };
        for ext in &self.extensions {
            ext.on_error(err, op, &scope);
        }
    }

    // ── Resolution engine ───────────────────────────────────────────────

    pub(crate) fn resolve_erased(
        self: &Arc<Self>,
        exec: Arc<dyn ErasedExecutor>,
        chain: Vec<(ExecutorId, String)>,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let this = self.clone();
        Box::pin(async move {
            this.check_disposed()?;

            // The chain check runs before any cell is awaited: a cycle
            // through a pending cell would otherwise deadlock.
            if let Some(pos) = chain.iter().position(|(id, _)| *id == exec.id()) {
                let mut names: Vec<String> =
                    chain[pos..].iter().map(|(_, name)| name.clone()).collect();
                names.push(exec.name());
                return Err(CoreError::circular(names).with_scope_id(this.id));
            }

            let cell = this.cell_for(&exec);
            enum FastPath {
                Value(ErasedValue),
                Preset(ErasedValue),
                Cached(CoreError),
                Wait(SharedResolve),
            }
            let fast = {
                let mut state = cell.lock_state();
                match &*state {
                    CellState::Resolved { value, .. } => FastPath::Value(value.clone()),
                    CellState::Rejected(err) => FastPath::Cached(err.clone()),
                    CellState::Pending(shared) => FastPath::Wait(shared.clone()),
                    CellState::Absent => {
                        if let Some(value) = this.presets.get(&exec.id()).map(|v| v.clone()) {
                            let epoch = cell.bump_epoch();
                            *state = CellState::Resolved {
                                value: value.clone(),
                                epoch,
                            };
                            FastPath::Preset(value)
                        } else {
                            let shared: SharedResolve =
                                Self::drive_factory(this.clone(), exec.clone(), chain)
                                    .boxed()
                                    .shared();
                            *state = CellState::Pending(shared.clone());
                            FastPath::Wait(shared)
                        }
                    }
                }
            };
            match fast {
                FastPath::Value(value) => Ok(value),
                FastPath::Preset(value) => {
                    this.record_completion(exec.id());
                    this.fire_resolve(&exec);
                    tracing::trace!(
                        executor = %exec.name(),
                        scope = %this.id,
                        "preset short-circuit"
                    );
                    Ok(value)
                }
                FastPath::Cached(err) => {
                    // A cached rejection re-raises, and observers hear
                    // about it, until the accessor is released.
                    this.fire_error(&err, Operation::Resolve);
                    Err(err)
                }
                FastPath::Wait(shared) => shared.await,
            }
        })
    }

    async fn drive_factory(
        this: Arc<ScopeInner>,
        exec: Arc<dyn ErasedExecutor>,
        mut chain: Vec<(ExecutorId, String)>,
    ) -> Result<ErasedValue, CoreError> {
        chain.push((exec.id(), exec.name()));
        let ctl = Controller::new(ScopeRef::from_scope(&this).with_chain(chain.clone()));
        let ctx = ResolveCtx {
            target: ResolveTarget::Scope(this.clone()),
            chain,
            current: Some((exec.id(), exec.name())),
        };
        tracing::debug!(executor = %exec.name(), scope = %this.id, "resolving");
        let result = exec.run(&ctx, ctl.clone()).await;
        let cell = this.cell_for(&exec);
        match result {
            Ok(value) => {
                cell.add_cleanups(ctl.take_cleanups());
                cell.set_resolved(value.clone());
                this.record_completion(exec.id());
                this.fire_resolve(&exec);
                if ctl.release_requested() {
                    cell.release(ReleaseMode::Soft);
                    this.fire_release(&exec, ReleaseMode::Soft);
                }
                Ok(value)
            }
            Err(err) => {
                // Cleanups registered before the failure still run.
                for cleanup in ctl.take_cleanups().into_iter().rev() {
                    cleanup();
                }
                // A cycle error already carries its complete chain.
                let err = if err.code() == ErrorCode::CircularDependency {
                    err
                } else {
                    err.with_executor_name_if_absent(exec.name())
                        .with_scope_id(this.id)
                        .push_dependency(exec.name())
                };
                cell.set_rejected(err.clone());
                this.fire_error(&err, Operation::Resolve);
                tracing::debug!(
                    executor = %exec.name(),
                    scope = %this.id,
                    error = %err,
                    "factory failed"
                );
                Err(err)
            }
        }
    }

    // ── Updates & reactive propagation ──────────────────────────────────

    pub(crate) fn update_erased(
        self: &Arc<Self>,
        exec: Arc<dyn ErasedExecutor>,
        value: ErasedValue,
    ) -> BoxFuture<'static, Result<(), CoreError>> {
        let this = self.clone();
        Box::pin(async move {
            this.check_disposed()?;
            let cell = this
                .cells
                .get(&exec.id())
                .map(|c| c.clone())
                .ok_or_else(|| {
                    CoreError::new(
                        ErrorCode::DependencyNotFound,
                        Stage::Update,
                        format!("executor `{}` has never been resolved here", exec.name()),
                    )
                    .with_scope_id(this.id)
                })?;
            let epoch = cell.replace_value(value.clone())?;
            tracing::debug!(executor = %exec.name(), scope = %this.id, epoch, "updated");
            this.propagate(exec.id()).await;
            // Listeners fire after propagation completes, in registration
            // order.
            cell.notify_listeners(&value);
            this.fire_update(&exec, epoch);
            Ok(())
        })
    }

    /// Breadth-first re-resolution of reactive dependents. The closure is
    /// recomputed lazily: re-resolution may install different edges, so
    /// each dependent's own dependents are read after it completes. Each
    /// dependent is re-resolved at most once per update.
    async fn propagate(self: &Arc<Self>, origin: ExecutorId) {
        let mut visited: HashSet<ExecutorId> = HashSet::new();
        visited.insert(origin);
        let mut queue: VecDeque<ExecutorId> = self
            .cells
            .get(&origin)
            .map(|c| c.dependents_snapshot().into())
            .unwrap_or_default();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(cell) = self.cells.get(&id).map(|c| c.clone()) else {
                continue;
            };
            // Old cleanups fire before the new factory runs.
            match cell.lookup() {
                ResolutionState::Resolved | ResolutionState::Rejected => {
                    cell.release(ReleaseMode::Soft);
                }
                ResolutionState::Absent | ResolutionState::Pending => {}
            }
            let exec = cell.executor.clone();
            match self.resolve_erased(exec, Vec::new()).await {
                Ok(value) => {
                    cell.notify_listeners(&value);
                    queue.extend(cell.dependents_snapshot());
                }
                Err(err) => {
                    // Recorded in the rejected cell; propagation continues
                    // to the remaining dependents.
                    tracing::warn!(
                        executor = %cell.executor.name(),
                        scope = %self.id,
                        error = %err,
                        "reactive re-resolution failed"
                    );
                }
            }
        }
    }

    // ── Release & disposal ──────────────────────────────────────────────

    pub(crate) fn release_erased(
        self: &Arc<Self>,
        id: ExecutorId,
        mode: ReleaseMode,
    ) -> Result<(), CoreError> {
        self.check_disposed()?;
        let Some(cell) = self.cells.get(&id).map(|c| c.clone()) else {
            return Ok(());
        };
        match mode {
            ReleaseMode::Soft => {
                cell.release(ReleaseMode::Soft);
                self.fire_release(&cell.executor.clone(), ReleaseMode::Soft);
            }
            ReleaseMode::Hard => {
                // Hard release cascades to reactive dependents only;
                // non-reactive dependents keep their cached values.
                let ordered = self.collect_reactive_closure(id);
                for member in ordered.iter().rev() {
                    if let Some(target) = self.cells.get(member).map(|c| c.clone()) {
                        if target.lookup() != ResolutionState::Absent {
                            target.release(ReleaseMode::Hard);
                            self.fire_release(&target.executor.clone(), ReleaseMode::Hard);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// BFS over reactive edges starting at `origin` (inclusive, origin
    /// first).
    fn collect_reactive_closure(&self, origin: ExecutorId) -> Vec<ExecutorId> {
        let mut visited: HashSet<ExecutorId> = HashSet::new();
        let mut ordered = Vec::new();
        let mut queue: VecDeque<ExecutorId> = VecDeque::from([origin]);
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            ordered.push(id);
            if let Some(cell) = self.cells.get(&id) {
                queue.extend(cell.dependents_snapshot());
            }
        }
        ordered
    }

    pub(crate) fn dispose(self: &Arc<Self>) {
        if self.disposed.is_cancelled() {
            return;
        }
        self.disposed.cancel();
        let scope = Scope {
            inner: self.clone(),
        };
        for ext in &self.extensions {
            ext.dispose(&scope);
        }
        // Reverse completion order approximates reverse topological order:
        // dependencies always complete before their dependents.
        let order: Vec<ExecutorId> = {
            let mut order = self.completion_order.lock().expect("scope poisoned");
            std::mem::take(&mut *order)
        };
        for id in order.iter().rev() {
            if let Some(cell) = self.cells.get(id).map(|c| c.clone()) {
                cell.release(ReleaseMode::Hard);
            }
        }
        self.cells.clear();
        tracing::debug!(scope = %self.id, "scope disposed");
    }
}

// ── ResolveCtx ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) enum ResolveTarget {
    Scope(Arc<ScopeInner>),
    Pod(Arc<PodInner>),
}

/// Per-call resolution context threaded through dependency resolution.
/// Carries the cycle-detection chain and the executor whose factory is
/// being driven.
pub struct ResolveCtx {
    pub(crate) target: ResolveTarget,
    pub(crate) chain: Vec<(ExecutorId, String)>,
    pub(crate) current: Option<(ExecutorId, String)>,
}

impl ResolveCtx {
    pub(crate) fn for_pod(pod: &Arc<PodInner>) -> Self {
        Self {
            target: ResolveTarget::Pod(pod.clone()),
            chain: Vec::new(),
            current: None,
        }
    }

    pub(crate) fn resolve_value(
        &self,
        exec: &Arc<dyn ErasedExecutor>,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        match &self.target {
            ResolveTarget::Scope(s) => s.resolve_erased(exec.clone(), self.chain.clone()),
            ResolveTarget::Pod(p) => p.resolve_erased(exec.clone(), self.chain.clone()),
        }
    }

    pub(crate) fn resolve_reactive(
        &self,
        exec: &Arc<dyn ErasedExecutor>,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        match &self.target {
            ResolveTarget::Pod(_) => {
                let err = CoreError::reactive_in_pod(&exec.name());
                Box::pin(async move { Err(err) })
            }
            ResolveTarget::Scope(s) => {
                let scope = s.clone();
                let exec = exec.clone();
                let chain = self.chain.clone();
                let current = self.current.clone();
                Box::pin(async move {
                    let value = scope.resolve_erased(exec.clone(), chain).await?;
                    if let Some((dependent, _)) = current {
                        scope.cell_for(&exec).add_dependent(dependent);
                    }
                    Ok(value)
                })
            }
        }
    }

    /// Cell + routing handle for lazy/static delivery. The handle carries
    /// the current chain: touching the accessor inside the depending
    /// factory still participates in cycle detection.
    pub(crate) fn accessor_cell(
        &self,
        exec: &Arc<dyn ErasedExecutor>,
    ) -> Result<(Arc<Cell>, ScopeRef), CoreError> {
        match &self.target {
            ResolveTarget::Scope(s) => Ok((
                s.cell_for(exec),
                ScopeRef::from_scope(s).with_chain(self.chain.clone()),
            )),
            ResolveTarget::Pod(p) => Ok((
                p.cell_for(exec),
                ScopeRef::from_pod(p).with_chain(self.chain.clone()),
            )),
        }
    }

    /// Drive the factory thunk through the `wrap_resolve` chain.
    pub(crate) fn run_factory(
        &self,
        thunk: FactoryThunk,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let (scope_id, pod_id, extensions) = match &self.target {
            ResolveTarget::Scope(s) => (s.id, None, s.extensions.clone()),
            ResolveTarget::Pod(p) => (p.parent_id(), Some(p.id()), p.extension_chain()),
        };
        let info = ResolveInfo {
            executor_id: self.current.as_ref().map(|(id, _)| *id),
            executor_name: self
                .current
                .as_ref()
                .map(|(_, name)| name.clone())
                .unwrap_or_else(|| "anonymous".to_string()),
            scope_id,
            pod_id,
        };
        compose_resolve(&extensions, &info, thunk)
    }
}

// ── ScopeRef ────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum ScopeRefInner {
    Scope(Weak<ScopeInner>),
    Pod(Weak<PodInner>),
}

/// Weak handle into the owning scope or pod, as exposed to factories via
/// [`Controller::scope`](crate::executor::Controller::scope) and carried by
/// accessors. Operations on a dropped or disposed container fail with
/// `SCOPE_DISPOSED`.
///
/// A handle held by a factory carries that factory's resolution chain, so
/// ad-hoc resolution participates in cycle detection.
#[derive(Clone)]
pub struct ScopeRef {
    inner: ScopeRefInner,
    chain: Vec<(ExecutorId, String)>,
}

impl ScopeRef {
    pub(crate) fn from_scope(scope: &Arc<ScopeInner>) -> Self {
        Self {
            inner: ScopeRefInner::Scope(Arc::downgrade(scope)),
            chain: Vec::new(),
        }
    }

    pub(crate) fn from_pod(pod: &Arc<PodInner>) -> Self {
        Self {
            inner: ScopeRefInner::Pod(Arc::downgrade(pod)),
            chain: Vec::new(),
        }
    }

    pub(crate) fn with_chain(mut self, chain: Vec<(ExecutorId, String)>) -> Self {
        self.chain = chain;
        self
    }

    fn gone() -> CoreError {
        CoreError::new(
            ErrorCode::ScopeDisposed,
            Stage::Resolve,
            "owning container has been dropped",
        )
    }

    pub fn is_disposed(&self) -> bool {
        match &self.inner {
            ScopeRefInner::Scope(weak) => {
                weak.upgrade().map(|s| s.is_disposed()).unwrap_or(true)
            }
            ScopeRefInner::Pod(weak) => weak.upgrade().map(|p| p.is_disposed()).unwrap_or(true),
        }
    }

    /// Ad-hoc resolution through the owning container.
    pub async fn resolve<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<T, CoreError> {
        let value = self.resolve_erased(executor.erased()).await?;
        downcast_value(&value, &executor.name())
    }

    pub(crate) fn resolve_erased(
        &self,
        exec: Arc<dyn ErasedExecutor>,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        match &self.inner {
            ScopeRefInner::Scope(weak) => match weak.upgrade() {
                Some(scope) => scope.resolve_erased(exec, self.chain.clone()),
                None => Box::pin(async { Err(Self::gone()) }),
            },
            ScopeRefInner::Pod(weak) => match weak.upgrade() {
                Some(pod) => pod.resolve_erased(exec, self.chain.clone()),
                None => Box::pin(async { Err(Self::gone()) }),
            },
        }
    }

    pub(crate) fn update_erased(
        &self,
        exec: Arc<dyn ErasedExecutor>,
        value: ErasedValue,
    ) -> BoxFuture<'static, Result<(), CoreError>> {
        match &self.inner {
            ScopeRefInner::Scope(weak) => match weak.upgrade() {
                Some(scope) => scope.update_erased(exec, value),
                None => Box::pin(async { Err(Self::gone()) }),
            },
            ScopeRefInner::Pod(weak) => match weak.upgrade() {
                Some(pod) => pod.update_erased(exec, value),
                None => Box::pin(async { Err(Self::gone()) }),
            },
        }
    }

    pub(crate) fn release_erased(
        &self,
        id: ExecutorId,
        mode: ReleaseMode,
    ) -> Result<(), CoreError> {
        match &self.inner {
            ScopeRefInner::Scope(weak) => match weak.upgrade() {
                Some(scope) => scope.release_erased(id, mode),
                None => Err(Self::gone()),
            },
            ScopeRefInner::Pod(weak) => match weak.upgrade() {
                Some(pod) => pod.release_erased(id, mode),
                None => Err(Self::gone()),
            },
        }
    }
}

// ── Scope ───────────────────────────────────────────────────────────────────

/// Root container for resolution.
///
/// # Example
///
/// ```ignore
/// let scope = Scope::new();
/// let config = provide(|_| async { Ok(Config::default()) });
/// let loaded = scope.resolve(&config).await?;
/// scope.dispose();
/// ```
#[derive(Clone)]
pub struct Scope {
    pub(crate) inner: Arc<ScopeInner>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("cells", &self.inner.cells.len())
            .finish()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ScopeBuilder {
        ScopeBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn meta(&self) -> &MetaMap {
        &self.inner.meta
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Resolve an executor, lazily driving its factory on first call.
    pub async fn resolve<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<T, CoreError> {
        let value = self
            .inner
            .resolve_erased(executor.erased(), Vec::new())
            .await?;
        downcast_value(&value, &executor.name())
    }

    /// Replace a resolved value and re-resolve reactive dependents.
    pub async fn update<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        value: T,
    ) -> Result<(), CoreError> {
        self.inner
            .update_erased(executor.erased(), Arc::new(value))
            .await
    }

    /// Compute the replacement from the current value.
    pub async fn update_with<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        f: impl FnOnce(&T) -> T,
    ) -> Result<(), CoreError> {
        let current = self.accessor(executor).get()?;
        self.update(executor, f(&current)).await
    }

    /// Release a cached value. [`ReleaseMode::Hard`] cascades to reactive
    /// dependents.
    pub fn release<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        mode: ReleaseMode,
    ) -> Result<(), CoreError> {
        self.inner.release_erased(executor.id(), mode)
    }

    /// Typed handle over the executor's cell (created absent if missing).
    pub fn accessor<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Accessor<T> {
        let cell = self.inner.cell_for(&executor.erased());
        Accessor::from_cell(cell, ScopeRef::from_scope(&self.inner))
    }

    /// Subscribe to updates of one executor. Sugar over
    /// [`Accessor::subscribe`].
    pub fn on_update<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        f: impl Fn(&T) + Send + Sync + 'static,
    ) -> crate::accessor::Subscription {
        self.accessor(executor).subscribe(f)
    }

    /// Scope-wide resolve listener.
    pub fn on_resolve(&self, f: impl Fn(&ResolveEvent) + Send + Sync + 'static) {
        self.inner
            .listeners
            .resolve
            .lock()
            .expect("scope poisoned")
            .push(Arc::new(f));
    }

    /// Scope-wide release listener.
    pub fn on_release(&self, f: impl Fn(&ReleaseEvent) + Send + Sync + 'static) {
        self.inner
            .listeners
            .release
            .lock()
            .expect("scope poisoned")
            .push(Arc::new(f));
    }

    /// Scope-wide update listener.
    pub fn on_update_any(&self, f: impl Fn(&UpdateEvent) + Send + Sync + 'static) {
        self.inner
            .listeners
            .update
            .lock()
            .expect("scope poisoned")
            .push(Arc::new(f));
    }

    /// Scope-wide error listener. Informational: errors propagate
    /// regardless.
    pub fn on_error(&self, f: impl Fn(&CoreError) + Send + Sync + 'static) {
        self.inner
            .listeners
            .error
            .lock()
            .expect("scope poisoned")
            .push(Arc::new(f));
    }

    /// Executors known to this scope (resolved, pending, or registered).
    pub fn registered(&self) -> Vec<DynExecutor> {
        self.inner
            .cells
            .iter()
            .map(|entry| DynExecutor {
                inner: entry.value().executor.clone(),
            })
            .collect()
    }

    /// Create a child pod with default options.
    pub fn create_pod(&self) -> Pod {
        self.pod_builder().build()
    }

    /// Create a child pod with presets and pod-local extensions.
    pub fn pod_builder(&self) -> PodBuilder {
        PodBuilder::new(self.inner.clone())
    }

    /// Release all accessors in reverse completion order and run their
    /// cleanups. Idempotent. Subsequent operations fail with
    /// `SCOPE_DISPOSED`.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

// ── ScopeBuilder ────────────────────────────────────────────────────────────

/// Builder for [`Scope`], collecting extensions, presets, meta and
/// pre-registered executors.
#[derive(Default)]
pub struct ScopeBuilder {
    extensions: Vec<Arc<dyn Extension>>,
    presets: Vec<Preset>,
    meta: MetaMap,
    registered: Vec<DynExecutor>,
}

impl ScopeBuilder {
    pub fn with_extension(mut self, ext: impl Extension) -> Self {
        self.extensions.push(Arc::new(ext));
        self
    }

    pub fn with_extension_arc(mut self, ext: Arc<dyn Extension>) -> Self {
        self.extensions.push(ext);
        self
    }

    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.presets.push(preset);
        self
    }

    pub fn with_meta(mut self, entry: Tagged) -> Self {
        self.meta = self.meta.with(entry);
        self
    }

    /// Pre-register an executor so tooling and extensions can enumerate it
    /// before first resolution.
    pub fn with_registered(mut self, executor: impl Into<DynExecutor>) -> Self {
        self.registered.push(executor.into());
        self
    }

    pub fn build(self) -> Scope {
        let inner = Arc::new(ScopeInner {
            id: Uuid::new_v4(),
            cells: DashMap::new(),
            presets: DashMap::new(),
            extensions: self.extensions,
            meta: self.meta,
            disposed: CancellationToken::new(),
            completion_order: Mutex::new(Vec::new()),
            listeners: EventListeners::default(),
        });
        for preset in self.presets {
            inner.presets.insert(preset.id, preset.value);
        }
        for executor in self.registered {
            inner.cell_for(&executor.inner);
        }
        let scope = Scope { inner };
        for ext in &scope.inner.extensions {
            ext.init(&scope);
        }
        tracing::debug!(scope = %scope.inner.id, "scope created");
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::ResolutionState;
    use crate::executor::{derive, provide, DepMap};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::OnceLock;
    use std::time::Duration;

    fn counted(counter: &Arc<AtomicUsize>, value: i32) -> Executor<i32> {
        let counter = counter.clone();
        provide(move |_ctl| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(value)
            }
        })
    }

    fn new_counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    // ── Resolution ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn resolves_dependency_graph_once() {
        let (ca, cb, cc) = (new_counter(), new_counter(), new_counter());
        let a = counted(&ca, 1);
        let b = {
            let cb = cb.clone();
            derive(a.clone(), move |v, _ctl| {
                let cb = cb.clone();
                async move {
                    cb.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(v + 1)
                }
            })
        };
        let c = {
            let cc = cc.clone();
            derive((a.clone(), b.clone()), move |(x, y), _ctl| {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(x + y)
                }
            })
        };

        let scope = Scope::new();
        assert_eq!(scope.resolve(&c).await.unwrap(), 3);
        assert_eq!(ca.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(cb.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(cc.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let counter = new_counter();
        let e = counted(&counter, 5);
        let scope = Scope::new();
        for _ in 0..10 {
            assert_eq!(scope.resolve(&e).await.unwrap(), 5);
        }
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_resolution_shares_one_factory_run() {
        let counter = new_counter();
        let e = {
            let counter = counter.clone();
            provide(move |_ctl| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(7)
                }
            })
        };
        let scope = Scope::new();
        let (r1, r2, r3) = tokio::join!(scope.resolve(&e), scope.resolve(&e), scope.resolve(&e));
        assert_eq!(r1.unwrap(), 7);
        assert_eq!(r2.unwrap(), 7);
        assert_eq!(r3.unwrap(), 7);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn preset_short_circuits_factory_and_dependencies() {
        let (cd, ce) = (new_counter(), new_counter());
        let dep = counted(&cd, 1);
        let e = {
            let ce = ce.clone();
            derive(dep.clone(), move |v, _ctl| {
                let ce = ce.clone();
                async move {
                    ce.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(v * 10)
                }
            })
        };
        let scope = Scope::builder().with_preset(preset(&e, 42)).build();
        assert_eq!(scope.resolve(&e).await.unwrap(), 42);
        assert_eq!(ce.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(cd.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cycle_is_detected_with_full_chain() {
        // Late-bound cycle: `a` resolves `b` ad hoc, `b` depends on `a`.
        let slot: Arc<OnceLock<Executor<i32>>> = Arc::new(OnceLock::new());
        let a = {
            let slot = slot.clone();
            provide(move |ctl| {
                let slot = slot.clone();
                async move {
                    let b = slot.get().cloned().expect("b installed");
                    ctl.scope().resolve(&b).await
                }
            })
        }
        .with_name("a");
        let b = derive(a.clone(), |v, _ctl| async move { Ok(v + 1) }).with_name("b");
        slot.set(b.clone()).ok();

        let scope = Scope::new();
        let err = scope.resolve(&b).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CircularDependency);
        let chain = &err.context().dependency_chain;
        assert!(chain.len() >= 2);
        assert_eq!(chain.first(), chain.last());
    }

    #[tokio::test]
    async fn direct_self_cycle_is_detected() {
        let slot: Arc<OnceLock<Executor<i32>>> = Arc::new(OnceLock::new());
        let e = {
            let slot = slot.clone();
            provide(move |ctl| {
                let slot = slot.clone();
                async move {
                    let me = slot.get().cloned().expect("installed");
                    ctl.scope().resolve(&me).await
                }
            })
        };
        slot.set(e.clone()).ok();
        let scope = Scope::new();
        let err = scope.resolve(&e).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CircularDependency);
    }

    // ── Errors ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rejected_factory_is_cached_and_reraised() {
        let counter = new_counter();
        let errors = new_counter();
        let e = {
            let counter = counter.clone();
            provide(move |_ctl| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    Err::<i32, _>(CoreError::factory("x"))
                }
            })
        };
        let scope = Scope::new();
        {
            let errors = errors.clone();
            scope.on_error(move |_err| {
                errors.fetch_add(1, AtomicOrdering::SeqCst);
            });
        }
        let first = scope.resolve(&e).await.unwrap_err();
        let second = scope.resolve(&e).await.unwrap_err();
        assert_eq!(first.code(), ErrorCode::FactoryThrewError);
        assert_eq!(second.code(), ErrorCode::FactoryThrewError);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(errors.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn release_clears_a_rejected_cell() {
        let counter = new_counter();
        let e = {
            let counter = counter.clone();
            provide(move |_ctl| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                        Err(CoreError::factory("first run fails"))
                    } else {
                        Ok(3)
                    }
                }
            })
        };
        let scope = Scope::new();
        scope.resolve(&e).await.unwrap_err();
        scope.release(&e, ReleaseMode::Hard).unwrap();
        assert_eq!(scope.resolve(&e).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn dependency_failure_accumulates_chain() {
        let a = provide(|_ctl| async { Err::<i32, _>(CoreError::factory("boom")) }).with_name("a");
        let b = derive(a.clone(), |v, _ctl| async move { Ok(v + 1) }).with_name("b");
        let scope = Scope::new();
        let err = scope.resolve(&b).await.unwrap_err();
        assert_eq!(err.context().executor_name.as_deref(), Some("a"));
        assert_eq!(err.context().dependency_chain, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn disposed_scope_rejects_operations() {
        let e = provide(|_ctl| async { Ok(1) });
        let scope = Scope::new();
        scope.resolve(&e).await.unwrap();
        scope.dispose();
        let err = scope.resolve(&e).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ScopeDisposed);
        assert!(scope.is_disposed());
    }

    // ── Reactive propagation ────────────────────────────────────────────

    #[tokio::test]
    async fn update_re_resolves_reactive_dependent() {
        let counter = new_counter();
        let a = provide(|_ctl| async { Ok(1) });
        let b = {
            let counter = counter.clone();
            derive(a.reactive(), move |v, _ctl| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(v + 1)
                }
            })
        };
        let scope = Scope::new();
        assert_eq!(scope.resolve(&b).await.unwrap(), 2);
        scope.update(&a, 10).await.unwrap();
        assert_eq!(scope.accessor(&b).get().unwrap(), 11);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn diamond_dependent_re_resolves_once_per_update() {
        let count_d = new_counter();
        let a = provide(|_ctl| async { Ok(1) });
        let b = derive(a.reactive(), |v, _ctl| async move { Ok(v * 2) });
        let c = derive(a.reactive(), |v, _ctl| async move { Ok(v * 3) });
        let d = {
            let count_d = count_d.clone();
            derive((b.reactive(), c.reactive()), move |(x, y), _ctl| {
                let count_d = count_d.clone();
                async move {
                    count_d.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(x + y)
                }
            })
        };
        let scope = Scope::new();
        assert_eq!(scope.resolve(&d).await.unwrap(), 5);
        scope.update(&a, 10).await.unwrap();
        assert_eq!(scope.accessor(&d).get().unwrap(), 50);
        assert_eq!(count_d.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn old_cleanups_run_before_the_new_factory() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let a = provide(|_ctl| async { Ok(1) });
        let b = {
            let log = log.clone();
            derive(a.reactive(), move |v, ctl| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push("factory");
                    let log2 = log.clone();
                    ctl.cleanup(move || log2.lock().unwrap().push("cleanup"));
                    Ok(v + 1)
                }
            })
        };
        let scope = Scope::new();
        scope.resolve(&b).await.unwrap();
        scope.update(&a, 2).await.unwrap();
        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["factory", "cleanup", "factory"]);
    }

    #[tokio::test]
    async fn update_listeners_fire_after_propagation_in_order() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let a = provide(|_ctl| async { Ok(1) });
        let b = {
            let log = log.clone();
            derive(a.reactive(), move |v, _ctl| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push("dependent".to_string());
                    Ok(v + 1)
                }
            })
        };
        let scope = Scope::new();
        scope.resolve(&b).await.unwrap();
        log.lock().unwrap().clear();

        let accessor = scope.accessor(&a);
        for name in ["one", "two"] {
            let log = log.clone();
            accessor.subscribe(move |_v: &i32| log.lock().unwrap().push(name.to_string()));
        }
        scope.update(&a, 5).await.unwrap();
        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["dependent", "one", "two"]);
    }

    #[tokio::test]
    async fn update_requires_a_resolved_accessor() {
        let e = provide(|_ctl| async { Ok(1) });
        let scope = Scope::new();
        let err = scope.update(&e, 2).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyNotFound);
    }

    #[tokio::test]
    async fn update_with_derives_from_current_value() {
        let e = provide(|_ctl| async { Ok(10) });
        let scope = Scope::new();
        scope.resolve(&e).await.unwrap();
        scope.update_with(&e, |v| v + 5).await.unwrap();
        assert_eq!(scope.accessor(&e).get().unwrap(), 15);
    }

    // ── Release & disposal ──────────────────────────────────────────────

    #[tokio::test]
    async fn cleanups_run_lifo_on_release() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let e = {
            let log = log.clone();
            provide(move |ctl| {
                let log = log.clone();
                async move {
                    let first = log.clone();
                    ctl.cleanup(move || first.lock().unwrap().push("first"));
                    let second = log.clone();
                    ctl.cleanup(move || second.lock().unwrap().push("second"));
                    Ok(1)
                }
            })
        };
        let scope = Scope::new();
        scope.resolve(&e).await.unwrap();
        scope.release(&e, ReleaseMode::Hard).unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn hard_release_cascades_to_reactive_dependents_only() {
        let a = provide(|_ctl| async { Ok(1) });
        let reactive_dep = derive(a.reactive(), |v, _ctl| async move { Ok(v + 1) });
        let plain_dep = derive(a.clone(), |v, _ctl| async move { Ok(v + 2) });
        let scope = Scope::new();
        scope.resolve(&reactive_dep).await.unwrap();
        scope.resolve(&plain_dep).await.unwrap();

        scope.release(&a, ReleaseMode::Hard).unwrap();
        assert_eq!(scope.accessor(&a).lookup(), ResolutionState::Absent);
        assert_eq!(scope.accessor(&reactive_dep).lookup(), ResolutionState::Absent);
        assert_eq!(scope.accessor(&plain_dep).lookup(), ResolutionState::Resolved);
    }

    #[tokio::test]
    async fn dependent_cleanups_run_before_dependency_cleanups_on_dispose() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let a = {
            let log = log.clone();
            provide(move |ctl| {
                let log = log.clone();
                async move {
                    let log2 = log.clone();
                    ctl.cleanup(move || log2.lock().unwrap().push("a"));
                    Ok(1)
                }
            })
        };
        let b = {
            let log = log.clone();
            derive(a.reactive(), move |v, ctl| {
                let log = log.clone();
                async move {
                    let log2 = log.clone();
                    ctl.cleanup(move || log2.lock().unwrap().push("b"));
                    Ok(v + 1)
                }
            })
        };
        let scope = Scope::new();
        scope.resolve(&b).await.unwrap();
        scope.dispose();
        assert_eq!(log.lock().unwrap().clone(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn soft_release_preserves_subscribers() {
        let seen = new_counter();
        let e = provide(|_ctl| async { Ok(1) });
        let scope = Scope::new();
        scope.resolve(&e).await.unwrap();
        let accessor = scope.accessor(&e);
        {
            let seen = seen.clone();
            accessor.subscribe(move |_v: &i32| {
                seen.fetch_add(1, AtomicOrdering::SeqCst);
            });
        }
        scope.release(&e, ReleaseMode::Soft).unwrap();
        scope.resolve(&e).await.unwrap();
        scope.update(&e, 2).await.unwrap();
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn controller_release_requests_self_invalidation() {
        let counter = new_counter();
        let e = {
            let counter = counter.clone();
            provide(move |ctl| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    ctl.release();
                    Ok(1)
                }
            })
        };
        let scope = Scope::new();
        scope.resolve(&e).await.unwrap();
        scope.resolve(&e).await.unwrap();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 2);
    }

    // ── Variants ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn lazy_dependency_defers_resolution() {
        let counter = new_counter();
        let dep = counted(&counter, 9);
        let untouched = derive(dep.lazy(), |_acc, _ctl| async move { Ok("left alone") });
        let scope = Scope::new();
        scope.resolve(&untouched).await.unwrap();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 0);

        let touched = derive(dep.lazy(), |acc, _ctl| async move {
            let v = acc.resolve().await?;
            Ok(v + 1)
        });
        assert_eq!(scope.resolve(&touched).await.unwrap(), 10);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn static_dependency_delivers_an_updatable_accessor() {
        let dep = provide(|_ctl| async { Ok(1) });
        let e = derive(dep.as_static(), |acc, _ctl| async move {
            let v = acc.resolve().await?;
            acc.update(v + 100).await?;
            Ok(acc.get()?)
        });
        let scope = Scope::new();
        assert_eq!(scope.resolve(&e).await.unwrap(), 101);
        assert_eq!(scope.accessor(&dep).get().unwrap(), 101);
    }

    #[tokio::test]
    async fn dep_map_resolves_by_name() {
        let host = provide(|_ctl| async { Ok("localhost".to_string()) });
        let port = provide(|_ctl| async { Ok(8080u16) });
        let addr = derive(
            DepMap::new().with("host", &host).with("port", &port),
            |deps, _ctl| async move {
                let host: String = deps.get("host")?;
                let port: u16 = deps.get("port")?;
                Ok(format!("{host}:{port}"))
            },
        );
        let scope = Scope::new();
        assert_eq!(scope.resolve(&addr).await.unwrap(), "localhost:8080");
    }

    // ── Extensions & events ─────────────────────────────────────────────

    struct Marker {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Extension for Marker {
        fn wrap_resolve(
            &self,
            _info: ResolveInfo,
            next: crate::extension::ResolveNext,
        ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
            let log = self.log.clone();
            let name = self.name;
            Box::pin(async move {
                log.lock().unwrap().push(format!("{name}:before"));
                let result = next.run().await;
                log.lock().unwrap().push(format!("{name}:after"));
                result
            })
        }
    }

    #[tokio::test]
    async fn extensions_nest_in_registration_order() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let scope = Scope::builder()
            .with_extension(Marker {
                name: "outer",
                log: log.clone(),
            })
            .with_extension(Marker {
                name: "inner",
                log: log.clone(),
            })
            .build();
        let e = provide(|_ctl| async { Ok(1) });
        scope.resolve(&e).await.unwrap();
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn scope_events_fire_on_resolve_and_release() {
        let resolves = new_counter();
        let releases = new_counter();
        let scope = Scope::new();
        {
            let resolves = resolves.clone();
            scope.on_resolve(move |_event| {
                resolves.fetch_add(1, AtomicOrdering::SeqCst);
            });
        }
        {
            let releases = releases.clone();
            scope.on_release(move |_event| {
                releases.fetch_add(1, AtomicOrdering::SeqCst);
            });
        }
        let e = provide(|_ctl| async { Ok(1) });
        scope.resolve(&e).await.unwrap();
        scope.release(&e, ReleaseMode::Hard).unwrap();
        assert_eq!(resolves.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(releases.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registered_executors_are_enumerable_before_resolution() {
        let e = provide(|_ctl| async { Ok(1) }).with_name("registry-entry");
        let scope = Scope::builder().with_registered(&e).build();
        let names: Vec<String> = scope.registered().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["registry-entry".to_string()]);
    }

    #[tokio::test]
    async fn ad_hoc_resolution_through_controller_scope() {
        let dep = provide(|_ctl| async { Ok(20) });
        let e = {
            let dep = dep.clone();
            provide(move |ctl| {
                let dep = dep.clone();
                async move {
                    let v = ctl.scope().resolve(&dep).await?;
                    Ok(v * 2)
                }
            })
        };
        let scope = Scope::new();
        assert_eq!(scope.resolve(&e).await.unwrap(), 40);
    }
}
