//! Pods: lightweight child containers.
//!
//! A pod delegates resolution to its parent scope for executors it does
//! not override, while isolating presets, cleanups and mutation. The
//! delegation priority is strict:
//!
//! 1. A preset on the executor itself wins — no factory, no dependency
//!    walk inside the pod.
//! 2. Otherwise, if the parent already holds the executor resolved and no
//!    transitive dependency has a pod preset, the parent's cached value is
//!    adopted without re-execution (and without re-registering cleanups).
//! 3. Otherwise the factory runs inside the pod, consulting the parent for
//!    each dependency through the same algorithm.
//!
//! Reactive propagation is a scope-only concept: resolving a
//! reactive-wrapped dependency inside a pod fails with
//! `REACTIVE_EXECUTOR_IN_POD`, and updates applied through a pod accessor
//! mutate only the pod's copy.

use crate::accessor::{Accessor, Cell, CellState, ReleaseMode, SharedResolve};
use crate::error::{CoreError, ErrorCode, Stage};
use crate::executor::{
    downcast_value, Controller, DependencyList, ErasedExecutor, Executor, ExecutorId,
};
use crate::extension::{Extension, Operation};
use crate::scope::{Preset, ResolveCtx, ResolveTarget, Scope, ScopeInner, ScopeRef};
use crate::types::{BoxFuture, ErasedValue};
use dashmap::DashMap;
use futures_util::FutureExt;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(crate) struct PodInner {
    id: Uuid,
    pub(crate) parent: Arc<ScopeInner>,
    cells: DashMap<ExecutorId, Arc<Cell>>,
    pub(crate) presets: DashMap<ExecutorId, ErasedValue>,
    extensions: Vec<Arc<dyn Extension>>,
    disposed: CancellationToken,
    completion_order: Mutex<Vec<ExecutorId>>,
}

impl PodInner {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn parent_id(&self) -> Uuid {
        self.parent.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.is_cancelled() || self.parent.is_disposed()
    }

    pub(crate) fn check_disposed(&self) -> Result<(), CoreError> {
        if self.disposed.is_cancelled() {
            Err(CoreError::scope_disposed(self.id))
        } else if self.parent.is_disposed() {
            Err(CoreError::scope_disposed(self.parent.id))
        } else {
            Ok(())
        }
    }

    /// Parent scope extensions followed by pod-local ones.
    pub(crate) fn extension_chain(&self) -> Vec<Arc<dyn Extension>> {
        let mut chain = self.parent.extensions.clone();
        chain.extend(self.extensions.iter().cloned());
        chain
    }

    pub(crate) fn cell_for(&self, exec: &Arc<dyn ErasedExecutor>) -> Arc<Cell> {
        self.cells
            .entry(exec.id())
            .or_insert_with(|| Cell::new(exec.clone()))
            .clone()
    }

    fn record_completion(&self, id: ExecutorId) {
        let mut order = self.completion_order.lock().expect("pod poisoned");
        order.retain(|other| *other != id);
        order.push(id);
    }

    /// True when any strict dependency of `exec`, transitively, has a
    /// preset in this pod — the signal that the parent's cached value would
    /// diverge from what this pod must observe.
    fn has_transitive_preset(&self, exec: &Arc<dyn ErasedExecutor>) -> bool {
        let mut visited: HashSet<ExecutorId> = HashSet::new();
        let mut stack: Vec<Arc<dyn ErasedExecutor>> = exec
            .dep_refs()
            .into_iter()
            .map(|r| r.executor)
            .collect();
        while let Some(dep) = stack.pop() {
            if !visited.insert(dep.id()) {
                continue;
            }
            if self.presets.contains_key(&dep.id()) {
                return true;
            }
            stack.extend(dep.dep_refs().into_iter().map(|r| r.executor));
        }
        false
    }

    pub(crate) fn resolve_erased(
        self: &Arc<Self>,
        exec: Arc<dyn ErasedExecutor>,
        chain: Vec<(ExecutorId, String)>,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let this = self.clone();
        Box::pin(async move {
            this.check_disposed()?;

            if let Some(pos) = chain.iter().position(|(id, _)| *id == exec.id()) {
                let mut names: Vec<String> =
                    chain[pos..].iter().map(|(_, name)| name.clone()).collect();
                names.push(exec.name());
                return Err(CoreError::circular(names).with_scope_id(this.parent.id));
            }

            let cell = this.cell_for(&exec);

            // Delegation inputs, computed outside the state lock.
            let own_preset = this.presets.get(&exec.id()).map(|v| v.clone());
            let parent_value = if own_preset.is_some() || this.has_transitive_preset(&exec) {
                None
            } else {
                this.parent.peek_resolved(exec.id())
            };

            enum FastPath {
                Value(ErasedValue),
                Adopted(ErasedValue, &'static str),
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
                        if let Some(value) = own_preset {
                            let epoch = cell.bump_epoch();
                            *state = CellState::Resolved {
                                value: value.clone(),
                                epoch,
                            };
                            FastPath::Adopted(value, "pod preset short-circuit")
                        } else if let Some(value) = parent_value {
                            // Adopt the parent's cached value: no factory
                            // call, no cleanups re-registered.
                            let epoch = cell.bump_epoch();
                            *state = CellState::Resolved {
                                value: value.clone(),
                                epoch,
                            };
                            FastPath::Adopted(value, "delegated to parent cache")
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
                FastPath::Adopted(value, how) => {
                    this.record_completion(exec.id());
                    tracing::trace!(executor = %exec.name(), pod = %this.id, "{how}");
                    Ok(value)
                }
                FastPath::Cached(err) => {
                    this.parent.fire_error(&err, Operation::Resolve);
                    Err(err)
                }
                FastPath::Wait(shared) => shared.await,
            }
        })
    }

    async fn drive_factory(
        this: Arc<PodInner>,
        exec: Arc<dyn ErasedExecutor>,
        mut chain: Vec<(ExecutorId, String)>,
    ) -> Result<ErasedValue, CoreError> {
        chain.push((exec.id(), exec.name()));
        let ctl = Controller::new(ScopeRef::from_pod(&this).with_chain(chain.clone()));
        let ctx = ResolveCtx {
            target: ResolveTarget::Pod(this.clone()),
            chain,
            current: Some((exec.id(), exec.name())),
        };
        tracing::debug!(executor = %exec.name(), pod = %this.id, "resolving in pod");
        let result = exec.run(&ctx, ctl.clone()).await;
        let cell = this.cell_for(&exec);
        match result {
            Ok(value) => {
                cell.add_cleanups(ctl.take_cleanups());
                cell.set_resolved(value.clone());
                this.record_completion(exec.id());
                if ctl.release_requested() {
                    cell.release(ReleaseMode::Soft);
                }
                Ok(value)
            }
            Err(err) => {
                for cleanup in ctl.take_cleanups().into_iter().rev() {
                    cleanup();
                }
                let err = if err.code() == ErrorCode::CircularDependency {
                    err
                } else {
                    err.with_executor_name_if_absent(exec.name())
                        .with_scope_id(this.parent.id)
                        .push_dependency(exec.name())
                };
                cell.set_rejected(err.clone());
                this.parent.fire_error(&err, Operation::Resolve);
                Err(err)
            }
        }
    }

    /// Replace the pod's copy of a resolved value. No reactive
    /// propagation: mutation stays inside the pod.
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
                        format!("executor `{}` has never been resolved in this pod", exec.name()),
                    )
                })?;
            cell.replace_value(value.clone())?;
            cell.notify_listeners(&value);
            Ok(())
        })
    }

    pub(crate) fn release_erased(
        &self,
        id: ExecutorId,
        mode: ReleaseMode,
    ) -> Result<(), CoreError> {
        self.check_disposed()?;
        if let Some(cell) = self.cells.get(&id).map(|c| c.clone()) {
            cell.release(mode);
        }
        Ok(())
    }

    pub(crate) fn dispose(self: &Arc<Self>) {
        if self.disposed.is_cancelled() {
            return;
        }
        self.disposed.cancel();
        let pod = Pod {
            inner: self.clone(),
        };
        for ext in self.extension_chain() {
            ext.dispose_pod(&pod);
        }
        let order: Vec<ExecutorId> = {
            let mut order = self.completion_order.lock().expect("pod poisoned");
            std::mem::take(&mut *order)
        };
        for id in order.iter().rev() {
            if let Some(cell) = self.cells.get(id).map(|c| c.clone()) {
                cell.release(ReleaseMode::Hard);
            }
        }
        self.cells.clear();
        tracing::debug!(pod = %self.id, "pod disposed");
    }
}

// ── Pod ─────────────────────────────────────────────────────────────────────

/// Child container delegating cache hits to a parent [`Scope`].
#[derive(Clone)]
pub struct Pod {
    pub(crate) inner: Arc<PodInner>,
}

impl fmt::Debug for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pod")
            .field("id", &self.inner.id)
            .field("parent", &self.inner.parent.id)
            .finish()
    }
}

impl Pod {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Handle to the parent scope.
    pub fn parent(&self) -> Scope {
        Scope {
            inner: self.inner.parent.clone(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Resolve following the pod delegation contract (see module docs).
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

    /// Resolve a dependency declaration against this pod, delivering values
    /// and accessors per the variant wrappers. Used by the flow runtime.
    pub async fn resolve_deps<D: DependencyList>(
        &self,
        deps: &D,
    ) -> Result<D::Output, CoreError> {
        self.inner.check_disposed()?;
        let ctx = ResolveCtx::for_pod(&self.inner);
        deps.resolve(&ctx).await
    }

    /// Typed handle over the pod's cell for an executor (created absent if
    /// missing). Reads delegate to the parent's value when the pod adopted
    /// it.
    pub fn accessor<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Accessor<T> {
        let cell = self.inner.cell_for(&executor.erased());
        Accessor::from_cell(cell, ScopeRef::from_pod(&self.inner))
    }

    /// Scope extensions followed by pod-local ones. Used by the flow
    /// runtime to drive the `wrap_execute` chain.
    pub fn extensions(&self) -> Vec<Arc<dyn Extension>> {
        self.inner.extension_chain()
    }

    /// Run this pod's cleanups in reverse completion order. Never touches
    /// the parent. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

/// Builder for [`Pod`], collecting pod-local presets and extensions.
pub struct PodBuilder {
    parent: Arc<ScopeInner>,
    presets: Vec<Preset>,
    extensions: Vec<Arc<dyn Extension>>,
}

impl PodBuilder {
    pub(crate) fn new(parent: Arc<ScopeInner>) -> Self {
        Self {
            parent,
            presets: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.presets.push(preset);
        self
    }

    pub fn with_extension(mut self, ext: impl Extension) -> Self {
        self.extensions.push(Arc::new(ext));
        self
    }

    pub fn with_extension_arc(mut self, ext: Arc<dyn Extension>) -> Self {
        self.extensions.push(ext);
        self
    }

    pub fn build(self) -> Pod {
        let inner = Arc::new(PodInner {
            id: Uuid::new_v4(),
            parent: self.parent,
            cells: DashMap::new(),
            presets: DashMap::new(),
            extensions: self.extensions,
            disposed: CancellationToken::new(),
            completion_order: Mutex::new(Vec::new()),
        });
        for preset in self.presets {
            inner.presets.insert(preset.id, preset.value);
        }
        let pod = Pod { inner };
        for ext in pod.inner.extension_chain() {
            ext.init_pod(&pod);
        }
        tracing::debug!(pod = %pod.inner.id, parent = %pod.inner.parent.id, "pod created");
        pod
    }
}
