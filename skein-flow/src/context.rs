//! Flow execution context: tag data store, journal, sub-flows and
//! parallelism.
//!
//! Every execution owns a context: a tag store seeded from the caller's
//! options and the parent context's non-private entries, a journal of
//! recorded step outcomes, and a reference to the executing pod. Disposal
//! of the pod surfaces as `SCOPE_DISPOSED` on subsequent `run`/`exec`/
//! `resolve` calls — in-flight handlers are never forcibly interrupted.

use crate::flow::{run_flow, Flow, FlowError, Flowed};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use skein_core::error::{CoreError, ErrorCode, Stage};
use skein_core::executor::Executor;
use skein_core::tag::{Tag, TagStore, Tagged};
use skein_core::types::ErasedValue;
use skein_core::Pod;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

// ── Built-in tags ───────────────────────────────────────────────────────────

/// Name of the currently executing flow.
pub fn flow_name_tag() -> Tag<String> {
    static TAG: OnceLock<Tag<String>> = OnceLock::new();
    TAG.get_or_init(|| Tag::new("flow.name")).clone()
}

/// Sub-flow nesting depth; `0` for root executions.
pub fn flow_depth_tag() -> Tag<usize> {
    static TAG: OnceLock<Tag<usize>> = OnceLock::new();
    TAG.get_or_init(|| Tag::new("flow.depth")).clone()
}

/// Whether this execution was started by a parallel combinator.
pub fn flow_is_parallel_tag() -> Tag<bool> {
    static TAG: OnceLock<Tag<bool>> = OnceLock::new();
    TAG.get_or_init(|| Tag::new("flow.is-parallel")).clone()
}

// ── Journal ─────────────────────────────────────────────────────────────────

enum JournalEntry {
    /// A `ctx.run` closure is currently executing under this key.
    Running,
    /// Outcome recorded during this execution.
    Recorded(ErasedValue),
    /// Outcome seeded before execution; replayed on first use.
    Seeded(ErasedValue),
}

struct CtxInner {
    flow_name: String,
    depth: usize,
    parallel: bool,
    pod: Pod,
    store: TagStore,
    parent: Option<Arc<CtxInner>>,
    journal: Mutex<HashMap<String, JournalEntry>>,
    exec_ordinal: AtomicU64,
}

/// Execution context handed to flow handlers.
#[derive(Clone)]
pub struct FlowCtx {
    inner: Arc<CtxInner>,
}

impl fmt::Debug for FlowCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCtx")
            .field("flow", &self.inner.flow_name)
            .field("depth", &self.inner.depth)
            .field("pod", &self.inner.pod.id())
            .finish()
    }
}

impl FlowCtx {
    pub(crate) fn root(
        flow_name: String,
        pod: Pod,
        tags: Vec<Tagged>,
        journal_seed: Vec<(String, ErasedValue)>,
    ) -> Self {
        let store = TagStore::new();
        store.extend(tags);
        let ctx = Self {
            inner: Arc::new(CtxInner {
                flow_name: flow_name.clone(),
                depth: 0,
                parallel: false,
                pod,
                store,
                parent: None,
                journal: Mutex::new(
                    journal_seed
                        .into_iter()
                        .map(|(key, value)| (key, JournalEntry::Seeded(value)))
                        .collect(),
                ),
                exec_ordinal: AtomicU64::new(0),
            }),
        };
        ctx.install_builtins(&flow_name, 0, false);
        ctx
    }

    /// Child context for a sub-flow: same pod, inherited non-private tags,
    /// incremented depth, fresh journal.
    fn child(&self, flow_name: String, parallel: bool) -> Self {
        let store = TagStore::new();
        store.extend(self.inner.store.public_entries());
        let depth = self.inner.depth + 1;
        let ctx = Self {
            inner: Arc::new(CtxInner {
                flow_name: flow_name.clone(),
                depth,
                parallel,
                pod: self.inner.pod.clone(),
                store,
                parent: Some(self.inner.clone()),
                journal: Mutex::new(HashMap::new()),
                exec_ordinal: AtomicU64::new(0),
            }),
        };
        ctx.install_builtins(&flow_name, depth, parallel);
        ctx
    }

    fn install_builtins(&self, flow_name: &str, depth: usize, parallel: bool) {
        // Built-in writes are schema-free; failures are impossible.
        let _ = flow_name_tag().set(&self.inner.store, flow_name.to_string());
        let _ = flow_depth_tag().set(&self.inner.store, depth);
        let _ = flow_is_parallel_tag().set(&self.inner.store, parallel);
    }

    pub fn pod(&self) -> &Pod {
        &self.inner.pod
    }

    pub fn flow_name(&self) -> &str {
        &self.inner.flow_name
    }

    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    pub fn is_parallel(&self) -> bool {
        self.inner.parallel
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    fn check_disposed(&self) -> Result<(), CoreError> {
        if self.inner.pod.is_disposed() {
            Err(CoreError::scope_disposed(self.inner.pod.id()).with_stage(Stage::FlowExecute))
        } else {
            Ok(())
        }
    }

    // ── Outcome constructors ────────────────────────────────────────────

    /// Wrap a success payload.
    pub fn ok<O, E>(&self, data: O) -> Result<Flowed<O, E>, CoreError> {
        Ok(Flowed::Ok(data))
    }

    /// Wrap a typed error payload.
    pub fn ko<O, E>(&self, error: E) -> Result<Flowed<O, E>, CoreError> {
        Ok(Flowed::Ko(error))
    }

    // ── Context store ───────────────────────────────────────────────────

    /// Read a tag from the context store; raises when absent with no
    /// default.
    pub fn get<V: Clone + Send + Sync + 'static>(&self, tag: &Tag<V>) -> Result<V, CoreError> {
        tag.get(&self.inner.store)
    }

    /// Read a tag, or the configured default, or `None`.
    pub fn find<V: Clone + Send + Sync + 'static>(&self, tag: &Tag<V>) -> Option<V> {
        tag.find(&self.inner.store)
    }

    /// Validate and write a tag into the context store.
    pub fn set<V: Clone + Send + Sync + 'static>(
        &self,
        tag: &Tag<V>,
        value: V,
    ) -> Result<(), CoreError> {
        tag.set(&self.inner.store, value)
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Resolve an executor through the executing pod.
    pub async fn resolve<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> Result<T, CoreError> {
        self.check_disposed()?;
        self.inner.pod.resolve(executor).await
    }

    // ── Journal ─────────────────────────────────────────────────────────

    /// Run a journaled step. The outcome is recorded under `key`; a key
    /// seeded before execution replays the recorded value without invoking
    /// the closure; a key reused within the same execution raises
    /// `JOURNAL_KEY_DUPLICATE`.
    pub async fn run<R, F, Fut>(&self, key: impl Into<String>, f: F) -> Result<R, CoreError>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, CoreError>>,
    {
        self.check_disposed()?;
        let key = key.into();
        {
            let mut journal = self.inner.journal.lock().expect("journal poisoned");
            match journal.get(&key) {
                None => {
                    journal.insert(key.clone(), JournalEntry::Running);
                }
                Some(JournalEntry::Seeded(value)) => {
                    let value = value.clone();
                    let replayed = value.downcast_ref::<R>().cloned().ok_or_else(|| {
                        CoreError::new(
                            ErrorCode::FlowExecutionFailed,
                            Stage::Journal,
                            format!("seeded journal entry `{key}` has an unexpected type"),
                        )
                    })?;
                    journal.insert(key.clone(), JournalEntry::Recorded(value));
                    tracing::trace!(flow = %self.inner.flow_name, key = %key, "journal replay");
                    return Ok(replayed);
                }
                Some(JournalEntry::Running) | Some(JournalEntry::Recorded(_)) => {
                    return Err(CoreError::new(
                        ErrorCode::JournalKeyDuplicate,
                        Stage::Journal,
                        format!(
                            "journal key `{key}` already used in flow `{}`",
                            self.inner.flow_name
                        ),
                    ));
                }
            }
        }
        let result = f().await;
        let mut journal = self.inner.journal.lock().expect("journal poisoned");
        match &result {
            Ok(value) => {
                journal.insert(key, JournalEntry::Recorded(Arc::new(value.clone())));
            }
            Err(_) => {
                // A failed step leaves no record; the key may be retried.
                journal.remove(&key);
            }
        }
        result
    }

    // ── Sub-flows ───────────────────────────────────────────────────────

    /// Execute a sub-flow inside the same pod. The sub-flow inherits the
    /// context store (non-private tags), increments the depth and is
    /// journaled under an auto-generated key.
    pub async fn exec<I, O, E>(&self, flow: &Flow<I, O, E>, input: I) -> Result<O, FlowError<E>>
    where
        I: Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.check_disposed().map_err(FlowError::Fault)?;
        let key = self.next_journal_key();
        let child = self.child(flow.name().to_string(), false);
        let result = run_flow(flow.clone(), input, child, Some(key.clone())).await;
        self.record_subflow(key, &result);
        result
    }

    /// Execute one sub-flow over many inputs concurrently, failing fast on
    /// the first error. Children are flagged parallel.
    pub async fn exec_parallel<I, O, E>(
        &self,
        flow: &Flow<I, O, E>,
        inputs: Vec<I>,
    ) -> Result<Vec<O>, FlowError<E>>
    where
        I: Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.check_disposed().map_err(FlowError::Fault)?;
        let mut handles = Vec::with_capacity(inputs.len());
        for input in inputs {
            let key = self.next_journal_key();
            let child = self.child(flow.name().to_string(), true);
            let flow = flow.clone();
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                let result = run_flow(flow, input, child, Some(key.clone())).await;
                this.record_subflow(key, &result);
                result
            }));
        }
        self.collect_fail_fast(handles).await
    }

    /// Await joined tasks in completion order, returning outputs in input
    /// order or the first error encountered. Dropping the remaining
    /// handles detaches them: they keep running, results discarded.
    async fn collect_fail_fast<T, Er>(
        &self,
        handles: Vec<tokio::task::JoinHandle<Result<T, Er>>>,
    ) -> Result<Vec<T>, Er>
    where
        T: Send + 'static,
        Er: From<CoreError> + Send + 'static,
    {
        let count = handles.len();
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| async move { (index, handle.await) })
            .collect();
        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(count).collect();
        while let Some((index, joined)) = pending.next().await {
            match joined {
                Ok(Ok(output)) => slots[index] = Some(output),
                Ok(Err(err)) => return Err(err),
                Err(join_err) => {
                    return Err(Er::from(CoreError::new(
                        ErrorCode::FlowExecutionFailed,
                        Stage::FlowExecute,
                        format!("parallel item panicked: {join_err}"),
                    )))
                }
            }
        }
        Ok(slots
            .into_iter()
            .map(|slot| slot.expect("every task completed"))
            .collect())
    }

    fn next_journal_key(&self) -> String {
        let ordinal = self.inner.exec_ordinal.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}:{}", self.inner.flow_name, self.inner.depth, ordinal)
    }

    /// Record a sub-flow outcome in this context's journal for tracing.
    fn record_subflow<O, E>(&self, key: String, result: &Result<O, FlowError<E>>)
    where
        O: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let entry: ErasedValue = Arc::new(result.clone());
        self.inner
            .journal
            .lock()
            .expect("journal poisoned")
            .insert(key, JournalEntry::Recorded(entry));
    }

    // ── Parallelism ─────────────────────────────────────────────────────

    /// Await all items, failing fast on the first rejection (observed in
    /// completion order). Remaining items keep running on the executor;
    /// their results are discarded. Outputs preserve input order.
    pub async fn parallel<T, Er, F>(&self, items: Vec<F>) -> Result<Vec<T>, Er>
    where
        F: Future<Output = Result<T, Er>> + Send + 'static,
        T: Send + 'static,
        Er: From<CoreError> + Send + 'static,
    {
        let handles: Vec<_> = items.into_iter().map(tokio::spawn).collect();
        self.collect_fail_fast(handles).await
    }

    /// Await all items, returning per-item outcomes. No start-order
    /// guarantee; completion order is the executor's.
    pub async fn parallel_settled<T, Er, F>(&self, items: Vec<F>) -> Vec<Result<T, Er>>
    where
        F: Future<Output = Result<T, Er>> + Send + 'static,
        T: Send + 'static,
        Er: From<CoreError> + Send + 'static,
    {
        let handles: Vec<_> = items.into_iter().map(tokio::spawn).collect();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(Er::from(CoreError::new(
                    ErrorCode::FlowExecutionFailed,
                    Stage::FlowExecute,
                    format!("parallel item panicked: {join_err}"),
                ))),
            });
        }
        outcomes
    }
}
