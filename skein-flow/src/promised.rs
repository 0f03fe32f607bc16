//! Composable async flow result carrying its originating pod and context.
//!
//! A [`Promised`] is awaitable (`execute(..).await`) and composable via
//! `map`/`switch`/`map_error`/`switch_error`. Implicitly created pods are
//! disposed when the promised reaches its terminal await (or is dropped
//! unawaited, e.g. as a losing `race` branch), unless the pod is adopted
//! via [`Promised::get_pod`].

use crate::context::FlowCtx;
use crate::flow::FlowError;
use futures_util::future::{join_all, select_all};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use skein_core::error::{CoreError, ErrorCode, Stage};
use skein_core::scope::Scope;
use skein_core::types::BoxFuture;
use skein_core::Pod;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ties pod (and private scope) lifetime to the promised: disposal happens
/// when the guard drops, unless the pod was adopted.
struct DisposeGuard {
    pod: Pod,
    implicit_pod: bool,
    implicit_scope: Option<Scope>,
    adopted: Arc<AtomicBool>,
}

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        if self.adopted.load(Ordering::SeqCst) {
            return;
        }
        if self.implicit_pod {
            self.pod.dispose();
        }
        if let Some(scope) = &self.implicit_scope {
            scope.dispose();
        }
    }
}

/// Full outcome of a flow execution, from [`Promised::in_details`].
pub struct Details<O, E> {
    pub success: bool,
    pub result: Option<O>,
    pub error: Option<FlowError<E>>,
    /// Execution context; `None` only for empty combinators.
    pub ctx: Option<FlowCtx>,
}

/// A pending flow result.
pub struct Promised<O, E> {
    future: BoxFuture<'static, Result<O, FlowError<E>>>,
    ctx: Option<FlowCtx>,
    guards: Vec<DisposeGuard>,
}

impl<O, E> Promised<O, E>
where
    O: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(
        future: BoxFuture<'static, Result<O, FlowError<E>>>,
        ctx: FlowCtx,
        pod: Pod,
        implicit_pod: bool,
        implicit_scope: Option<Scope>,
    ) -> Self {
        Self {
            future,
            ctx: Some(ctx),
            guards: vec![DisposeGuard {
                pod,
                implicit_pod,
                implicit_scope,
                adopted: Arc::new(AtomicBool::new(false)),
            }],
        }
    }

    /// The execution context, when this promised wraps a single execution.
    pub fn ctx(&self) -> Option<FlowCtx> {
        self.ctx.clone()
    }

    /// Adopt the executing pod: the caller takes over disposal and the
    /// terminal await no longer disposes it.
    pub fn get_pod(&self) -> Option<Pod> {
        self.guards.first().map(|guard| {
            guard.adopted.store(true, Ordering::SeqCst);
            guard.pod.clone()
        })
    }

    /// Transform the success value.
    pub fn map<O2, F>(self, f: F) -> Promised<O2, E>
    where
        O2: Send + 'static,
        F: FnOnce(O) -> O2 + Send + 'static,
    {
        let Promised { future, ctx, guards } = self;
        Promised {
            future: Box::pin(async move { future.await.map(f) }),
            ctx,
            guards,
        }
    }

    /// Chain an async continuation on success.
    pub fn switch<O2, F, Fut>(self, f: F) -> Promised<O2, E>
    where
        O2: Send + 'static,
        F: FnOnce(O) -> Fut + Send + 'static,
        Fut: Future<Output = Result<O2, FlowError<E>>> + Send + 'static,
    {
        let Promised { future, ctx, guards } = self;
        Promised {
            future: Box::pin(async move {
                match future.await {
                    Ok(value) => f(value).await,
                    Err(err) => Err(err),
                }
            }),
            ctx,
            guards,
        }
    }

    /// Transform the typed error payload; faults pass through unchanged.
    pub fn map_error<E2, F>(self, f: F) -> Promised<O, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        let Promised { future, ctx, guards } = self;
        Promised {
            future: Box::pin(async move {
                future.await.map_err(|err| match err {
                    FlowError::Ko(e) => FlowError::Ko(f(e)),
                    FlowError::Fault(fault) => FlowError::Fault(fault),
                })
            }),
            ctx,
            guards,
        }
    }

    /// Recover from a typed error payload with an async continuation;
    /// faults pass through unchanged.
    pub fn switch_error<E2, F, Fut>(self, f: F) -> Promised<O, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Fut + Send + 'static,
        Fut: Future<Output = Result<O, FlowError<E2>>> + Send + 'static,
    {
        let Promised { future, ctx, guards } = self;
        Promised {
            future: Box::pin(async move {
                match future.await {
                    Ok(value) => Ok(value),
                    Err(FlowError::Ko(e)) => f(e).await,
                    Err(FlowError::Fault(fault)) => Err(FlowError::Fault(fault)),
                }
            }),
            ctx,
            guards,
        }
    }

    /// Await and return the full outcome instead of a `Result`.
    pub async fn in_details(self) -> Details<O, E> {
        let Promised { future, ctx, guards } = self;
        let result = future.await;
        drop(guards);
        match result {
            Ok(value) => Details {
                success: true,
                result: Some(value),
                error: None,
                ctx,
            },
            Err(err) => Details {
                success: false,
                result: None,
                error: Some(err),
                ctx,
            },
        }
    }

    // ── Combinators ─────────────────────────────────────────────────────

    /// Resolve when every item succeeds, in input order; reject with the
    /// first rejection (completion order). All pods are disposed when the
    /// combined promised settles.
    pub fn all(items: Vec<Promised<O, E>>) -> Promised<Vec<O>, E> {
        let (futures, ctx, guards) = Self::disassemble(items);
        Promised {
            future: Box::pin(async move {
                let count = futures.len();
                let mut pending: FuturesUnordered<_> = futures
                    .into_iter()
                    .enumerate()
                    .map(|(index, future)| async move { (index, future.await) })
                    .collect();
                let mut slots: Vec<Option<O>> =
                    std::iter::repeat_with(|| None).take(count).collect();
                while let Some((index, result)) = pending.next().await {
                    match result {
                        Ok(value) => slots[index] = Some(value),
                        Err(err) => return Err(err),
                    }
                }
                Ok(slots
                    .into_iter()
                    .map(|slot| slot.expect("every branch completed"))
                    .collect())
            }),
            ctx,
            guards,
        }
    }

    /// Settle with the first item to settle; the losing branches are
    /// dropped (their pods disposed).
    pub fn race(items: Vec<Promised<O, E>>) -> Promised<O, E> {
        let (futures, ctx, guards) = Self::disassemble(items);
        Promised {
            future: Box::pin(async move {
                if futures.is_empty() {
                    return Err(FlowError::Fault(CoreError::new(
                        ErrorCode::FlowExecutionFailed,
                        Stage::FlowExecute,
                        "race over an empty set",
                    )));
                }
                let (result, _, _) = select_all(futures).await;
                result
            }),
            ctx,
            guards,
        }
    }

    /// Await every item, returning per-item outcomes in input order.
    pub fn all_settled(items: Vec<Promised<O, E>>) -> Promised<Vec<Result<O, FlowError<E>>>, E> {
        let (futures, ctx, guards) = Self::disassemble(items);
        Promised {
            future: Box::pin(async move { Ok(join_all(futures).await) }),
            ctx,
            guards,
        }
    }

    /// Run an ad-hoc computation against an existing pod, wrapped as a
    /// promised. The pod is not auto-disposed.
    pub fn try_with<F, Fut>(pod: &Pod, f: F) -> Promised<O, E>
    where
        F: FnOnce(FlowCtx) -> Fut,
        Fut: Future<Output = Result<O, FlowError<E>>> + Send + 'static,
    {
        let ctx = FlowCtx::root("try".to_string(), pod.clone(), Vec::new(), Vec::new());
        let future = f(ctx.clone());
        Promised {
            future: Box::pin(future),
            ctx: Some(ctx),
            guards: vec![DisposeGuard {
                pod: pod.clone(),
                implicit_pod: false,
                implicit_scope: None,
                adopted: Arc::new(AtomicBool::new(false)),
            }],
        }
    }

    #[allow(clippy::type_complexity)]
    fn disassemble(
        items: Vec<Promised<O, E>>,
    ) -> (
        Vec<BoxFuture<'static, Result<O, FlowError<E>>>>,
        Option<FlowCtx>,
        Vec<DisposeGuard>,
    ) {
        let mut futures = Vec::with_capacity(items.len());
        let mut guards = Vec::new();
        let mut ctx = None;
        for item in items {
            futures.push(item.future);
            guards.extend(item.guards);
            if ctx.is_none() {
                ctx = item.ctx;
            }
        }
        (futures, ctx, guards)
    }
}

impl<O, E> IntoFuture for Promised<O, E>
where
    O: Send + 'static,
    E: Send + 'static,
{
    type Output = Result<O, FlowError<E>>;
    type IntoFuture = BoxFuture<'static, Result<O, FlowError<E>>>;

    /// Terminal await: yields the success value or the flow error, then
    /// disposes implicitly created pods (unless adopted).
    fn into_future(self) -> Self::IntoFuture {
        let Promised { future, guards, .. } = self;
        Box::pin(async move {
            let result = future.await;
            drop(guards);
            result
        })
    }
}
