//! Per-scope resolution record for one executor.
//!
//! The internal [`Cell`] is the unit of shared mutable state: it is read by
//! many callers but mutated only through resolution, `update` and `release`.
//! The public [`Accessor`] is a typed handle over a cell, routing
//! resolution and updates through the owning scope or pod.

use crate::error::{CoreError, ErrorCode, Stage};
use crate::executor::{ErasedExecutor, ExecutorId};
use crate::scope::ScopeRef;
use crate::types::{BoxFuture, ErasedValue};
use futures_util::future::Shared;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub(crate) type SharedResolve = Shared<BoxFuture<'static, Result<ErasedValue, CoreError>>>;

type CleanupFn = Box<dyn FnOnce() + Send>;
type ListenerFn = Arc<dyn Fn(&ErasedValue) + Send + Sync>;

/// Resolution state of an accessor, as reported by [`Accessor::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Absent,
    Pending,
    Resolved,
    Rejected,
}

/// Whether a release drops subscribers along with the cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Drop the value, run cleanups, drop subscribers, cascade to reactive
    /// dependents.
    Hard,
    /// Drop the value and run cleanups but preserve subscribers; no cascade.
    Soft,
}

pub(crate) enum CellState {
    Absent,
    Pending(SharedResolve),
    Resolved { value: ErasedValue, epoch: u64 },
    Rejected(CoreError),
}

impl CellState {
    fn as_resolution_state(&self) -> ResolutionState {
        match self {
            CellState::Absent => ResolutionState::Absent,
            CellState::Pending(_) => ResolutionState::Pending,
            CellState::Resolved { .. } => ResolutionState::Resolved,
            CellState::Rejected(_) => ResolutionState::Rejected,
        }
    }
}

pub(crate) struct Cell {
    pub(crate) executor: Arc<dyn ErasedExecutor>,
    state: Mutex<CellState>,
    cleanups: Mutex<Vec<CleanupFn>>,
    /// Reactive edges: executors to re-resolve when this cell's value
    /// changes. Installed in the parent scope only.
    dependents: Mutex<Vec<ExecutorId>>,
    listeners: Mutex<Vec<(u64, ListenerFn)>>,
    next_listener: AtomicU64,
    epoch: AtomicU64,
}

impl Cell {
    pub(crate) fn new(executor: Arc<dyn ErasedExecutor>) -> Arc<Self> {
        Arc::new(Self {
            executor,
            state: Mutex::new(CellState::Absent),
            cleanups: Mutex::new(Vec::new()),
            dependents: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
        })
    }

    pub(crate) fn lookup(&self) -> ResolutionState {
        self.state
            .lock()
            .expect("cell poisoned")
            .as_resolution_state()
    }

    pub(crate) fn lock_state(&self) -> std::sync::MutexGuard<'_, CellState> {
        self.state.lock().expect("cell poisoned")
    }

    /// Cached value if resolved, without side effects.
    pub(crate) fn peek_value(&self) -> Option<ErasedValue> {
        match &*self.lock_state() {
            CellState::Resolved { value, .. } => Some(value.clone()),
            _ => None,
        }
    }

    pub(crate) fn get_erased(&self) -> Result<ErasedValue, CoreError> {
        match &*self.lock_state() {
            CellState::Resolved { value, .. } => Ok(value.clone()),
            CellState::Rejected(err) => Err(err.clone()),
            _ => Err(CoreError::new(
                ErrorCode::DependencyNotFound,
                Stage::Resolve,
                format!(
                    "executor `{}` is not resolved; `get` is a synchronous peek",
                    self.executor.name()
                ),
            )),
        }
    }

    pub(crate) fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn set_resolved(&self, value: ErasedValue) -> u64 {
        let epoch = self.bump_epoch();
        *self.lock_state() = CellState::Resolved { value, epoch };
        epoch
    }

    /// Replace the value of a resolved cell, bumping the epoch. Errors when
    /// the cell holds no value.
    pub(crate) fn replace_value(&self, value: ErasedValue) -> Result<u64, CoreError> {
        let mut state = self.lock_state();
        match &*state {
            CellState::Resolved { .. } => {
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                *state = CellState::Resolved { value, epoch };
                Ok(epoch)
            }
            _ => Err(CoreError::new(
                ErrorCode::DependencyNotFound,
                Stage::Update,
                format!(
                    "executor `{}` has no resolved value to update",
                    self.executor.name()
                ),
            )),
        }
    }

    pub(crate) fn set_rejected(&self, err: CoreError) {
        *self.lock_state() = CellState::Rejected(err);
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn add_cleanups(&self, cleanups: Vec<CleanupFn>) {
        self.cleanups
            .lock()
            .expect("cell poisoned")
            .extend(cleanups);
    }

    /// Run registered cleanups in LIFO order.
    pub(crate) fn run_cleanups(&self) {
        let mut cleanups = std::mem::take(&mut *self.cleanups.lock().expect("cell poisoned"));
        while let Some(cleanup) = cleanups.pop() {
            cleanup();
        }
    }

    /// Drop the cached value and run cleanups. Hard release also drops
    /// subscribers. Reactive edges are left in place; cascades are the
    /// scope's concern.
    pub(crate) fn release(&self, mode: ReleaseMode) {
        {
            let mut state = self.lock_state();
            *state = CellState::Absent;
        }
        self.run_cleanups();
        if mode == ReleaseMode::Hard {
            self.listeners.lock().expect("cell poisoned").clear();
        }
    }

    pub(crate) fn add_dependent(&self, id: ExecutorId) {
        let mut dependents = self.dependents.lock().expect("cell poisoned");
        if !dependents.contains(&id) {
            dependents.push(id);
        }
    }

    pub(crate) fn dependents_snapshot(&self) -> Vec<ExecutorId> {
        self.dependents.lock().expect("cell poisoned").clone()
    }

    pub(crate) fn subscribe_erased(&self, f: ListenerFn) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().expect("cell poisoned").push((id, f));
        id
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.listeners
            .lock()
            .expect("cell poisoned")
            .retain(|(lid, _)| *lid != id);
    }

    /// Invoke update listeners in registration order. The list is cloned
    /// out so listeners may subscribe/unsubscribe reentrantly.
    pub(crate) fn notify_listeners(&self, value: &ErasedValue) {
        let listeners: Vec<ListenerFn> = self
            .listeners
            .lock()
            .expect("cell poisoned")
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for listener in listeners {
            listener(value);
        }
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("executor", &self.executor.name())
            .field("state", &self.lookup())
            .field("epoch", &self.epoch())
            .finish()
    }
}

// ── Accessor ────────────────────────────────────────────────────────────────

/// Typed handle over one executor's per-scope resolution record.
///
/// Delivered to factories for `lazy`/`static` dependencies and available
/// via `scope.accessor(&e)`.
pub struct Accessor<T> {
    cell: Arc<Cell>,
    scope: ScopeRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            scope: self.scope.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("executor", &self.cell.executor.name())
            .field("state", &self.cell.lookup())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Accessor<T> {
    pub(crate) fn from_cell(cell: Arc<Cell>, scope: ScopeRef) -> Self {
        Self {
            cell,
            scope,
            _marker: PhantomData,
        }
    }

    /// Current resolution state, without side effects. Never suspends.
    pub fn lookup(&self) -> ResolutionState {
        self.cell.lookup()
    }

    /// Epoch of the cached value; bumped on every update.
    pub fn epoch(&self) -> u64 {
        self.cell.epoch()
    }

    /// Synchronous peek at the resolved value. Never suspends; raises when
    /// the cell is not resolved.
    pub fn get(&self) -> Result<T, CoreError> {
        let value = self.cell.get_erased()?;
        crate::executor::downcast_value(&value, &self.cell.executor.name())
    }

    /// Resolve through the owning scope or pod. Idempotent: concurrent
    /// callers share one factory invocation; a rejected cell re-raises the
    /// cached error until released.
    pub async fn resolve(&self) -> Result<T, CoreError> {
        let value = self.scope.resolve_erased(self.cell.executor.clone()).await?;
        crate::executor::downcast_value(&value, &self.cell.executor.name())
    }

    /// Replace the resolved value and run reactive propagation, then update
    /// listeners. Only valid on a resolved cell.
    pub async fn update(&self, value: T) -> Result<(), CoreError> {
        self.scope
            .update_erased(self.cell.executor.clone(), Arc::new(value))
            .await
    }

    /// Compute the replacement from the current value.
    pub async fn update_with(&self, f: impl FnOnce(&T) -> T) -> Result<(), CoreError> {
        let current = self.get()?;
        self.update(f(&current)).await
    }

    /// Register an update listener; fires after each successful update with
    /// the new value. Returns an unsubscribe handle.
    pub fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let name = self.cell.executor.name();
        let listener: ListenerFn = Arc::new(move |erased: &ErasedValue| {
            if let Some(value) = erased.downcast_ref::<T>() {
                f(value);
            } else {
                tracing::warn!(executor = %name, "update listener saw unexpected value type");
            }
        });
        let id = self.cell.subscribe_erased(listener);
        Subscription {
            cell: Arc::downgrade(&self.cell),
            id,
        }
    }

    /// Alias for [`subscribe`](Self::subscribe).
    pub fn on_update(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.subscribe(f)
    }

    /// Release the cached value: cleanups run LIFO, the cell returns to
    /// absent. Hard release also drops subscribers and cascades to reactive
    /// dependents.
    pub fn release(&self, mode: ReleaseMode) -> Result<(), CoreError> {
        self.scope.release_erased(self.cell.executor.id(), mode)
    }
}

/// Handle returned by [`Accessor::subscribe`]; detaches the listener.
pub struct Subscription {
    cell: Weak<Cell>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(cell) = self.cell.upgrade() {
            cell.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::provide;
    use crate::scope::Scope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn get_is_a_peek_and_never_resolves() {
        let e = provide(|_ctl| async { Ok(1) });
        let scope = Scope::new();
        let accessor = scope.accessor(&e);
        assert_eq!(accessor.lookup(), ResolutionState::Absent);
        let err = accessor.get().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DependencyNotFound);
        assert_eq!(accessor.lookup(), ResolutionState::Absent);
    }

    #[tokio::test]
    async fn resolve_then_get_agree() {
        let e = provide(|_ctl| async { Ok("value".to_string()) });
        let scope = Scope::new();
        let accessor = scope.accessor(&e);
        assert_eq!(accessor.resolve().await.unwrap(), "value");
        assert_eq!(accessor.get().unwrap(), "value");
        assert_eq!(accessor.lookup(), ResolutionState::Resolved);
    }

    #[tokio::test]
    async fn update_bumps_the_epoch() {
        let e = provide(|_ctl| async { Ok(1) });
        let scope = Scope::new();
        let accessor = scope.accessor(&e);
        accessor.resolve().await.unwrap();
        let before = accessor.epoch();
        accessor.update(2).await.unwrap();
        assert!(accessor.epoch() > before);
        assert_eq!(accessor.get().unwrap(), 2);
    }

    #[tokio::test]
    async fn unsubscribed_listeners_stop_firing() {
        let seen = Arc::new(AtomicUsize::new(0));
        let e = provide(|_ctl| async { Ok(1) });
        let scope = Scope::new();
        let accessor = scope.accessor(&e);
        accessor.resolve().await.unwrap();

        let sub = {
            let seen = seen.clone();
            accessor.subscribe(move |_v: &i32| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };
        accessor.update(2).await.unwrap();
        sub.unsubscribe();
        accessor.update(3).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn update_with_reads_the_current_value() {
        let e = provide(|_ctl| async { Ok(10) });
        let scope = Scope::new();
        let accessor = scope.accessor(&e);
        accessor.resolve().await.unwrap();
        accessor.update_with(|v| v * 3).await.unwrap();
        assert_eq!(accessor.get().unwrap(), 30);
    }
}
