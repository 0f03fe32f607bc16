//! Cross-cutting hooks around resolution and flow execution.
//!
//! Extensions compose in registration order: `wrap_resolve` and
//! `wrap_execute` form nested middlewares around the underlying operation,
//! with the first registered extension outermost. Each wrapper receives a
//! next thunk; it may run code before and after, short-circuit, transform
//! the result, or re-raise. Extensions observe errors via `on_error` but
//! cannot suppress them.

use crate::error::CoreError;
use crate::executor::ExecutorId;
use crate::pod::Pod;
use crate::scope::Scope;
use crate::types::{BoxFuture, ErasedValue};
use std::sync::Arc;
use uuid::Uuid;

/// Deferred invocation of the wrapped operation (factory or flow handler).
pub type FactoryThunk =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<ErasedValue, CoreError>> + Send>;

/// Context handed to [`Extension::wrap_resolve`].
#[derive(Debug, Clone)]
pub struct ResolveInfo {
    pub executor_id: Option<ExecutorId>,
    pub executor_name: String,
    pub scope_id: Uuid,
    pub pod_id: Option<Uuid>,
}

/// Context handed to [`Extension::wrap_execute`].
#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub flow_name: String,
    pub depth: usize,
    pub parallel: bool,
    /// Journal key for sub-flow invocations; `None` on root executions.
    pub journal_key: Option<String>,
}

/// Which operation an error surfaced from, as reported to
/// [`Extension::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Resolve,
    Update,
    Release,
    Dispose,
    FlowExecute,
}

/// Continuation passed to [`Extension::wrap_resolve`].
pub struct ResolveNext {
    f: FactoryThunk,
}

impl ResolveNext {
    pub(crate) fn new(f: FactoryThunk) -> Self {
        Self { f }
    }

    /// Invoke the remainder of the chain (ultimately the factory).
    pub fn run(self) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        (self.f)()
    }
}

/// Continuation passed to [`Extension::wrap_execute`].
pub struct ExecuteNext {
    f: FactoryThunk,
}

impl ExecuteNext {
    pub(crate) fn new(f: FactoryThunk) -> Self {
        Self { f }
    }

    /// Invoke the remainder of the chain (ultimately the flow handler).
    pub fn run(self) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        (self.f)()
    }
}

/// A composable unit of cross-cutting behavior installed on a scope.
///
/// All hooks are optional. Extensions may read decoration, time
/// operations, emit telemetry and intercept errors; they cannot mutate the
/// executor graph.
///
/// # Example
///
/// ```ignore
/// struct CountResolves(AtomicU64);
///
/// impl Extension for CountResolves {
///     fn wrap_resolve(
///         &self,
///         _info: ResolveInfo,
///         next: ResolveNext,
///     ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         next.run()
///     }
/// }
/// ```
pub trait Extension: Send + Sync + 'static {
    /// Called once when the owning scope is built.
    fn init(&self, _scope: &Scope) {}

    /// Called when a pod is created from the owning scope.
    fn init_pod(&self, _pod: &Pod) {}

    /// Wrap a factory invocation. The default forwards to `next`.
    fn wrap_resolve(
        &self,
        _info: ResolveInfo,
        next: ResolveNext,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        next.run()
    }

    /// Wrap a flow handler invocation. The default forwards to `next`.
    fn wrap_execute(
        &self,
        _info: ExecutionInfo,
        next: ExecuteNext,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        next.run()
    }

    /// Observe a surfaced error. Informational; the error propagates
    /// regardless.
    fn on_error(&self, _err: &CoreError, _op: Operation, _scope: &Scope) {}

    /// Called when the owning scope is disposed.
    fn dispose(&self, _scope: &Scope) {}

    /// Called when a pod of the owning scope is disposed.
    fn dispose_pod(&self, _pod: &Pod) {}
}

/// Nest `wrap_resolve` hooks around `thunk`, first registered outermost,
/// and drive the chain.
pub(crate) fn compose_resolve(
    extensions: &[Arc<dyn Extension>],
    info: &ResolveInfo,
    thunk: FactoryThunk,
) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
    let mut next = ResolveNext::new(thunk);
    for ext in extensions.iter().rev() {
        let ext = ext.clone();
        let info = info.clone();
        let inner = next;
        next = ResolveNext::new(Box::new(move || ext.wrap_resolve(info, inner)));
    }
    next.run()
}

/// Nest `wrap_execute` hooks around `thunk`, first registered outermost,
/// and drive the chain. Used by the flow runtime.
pub fn compose_execute(
    extensions: &[Arc<dyn Extension>],
    info: &ExecutionInfo,
    thunk: FactoryThunk,
) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
    let mut next = ExecuteNext::new(thunk);
    for ext in extensions.iter().rev() {
        let ext = ext.clone();
        let info = info.clone();
        let inner = next;
        next = ExecuteNext::new(Box::new(move || ext.wrap_execute(info, inner)));
    }
    next.run()
}
