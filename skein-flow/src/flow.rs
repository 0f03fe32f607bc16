//! Flow definitions and execution.
//!
//! A flow is a typed, schema-bounded computation running inside a pod with
//! a dedicated context store. Input is validated before the handler runs;
//! success and error payloads are validated at the output boundary. The
//! handler itself is driven through the extension pipeline's
//! `wrap_execute` chain.

use crate::context::FlowCtx;
use crate::promised::Promised;
use skein_core::error::{CoreError, ErrorCategory, ErrorCode, Stage};
use skein_core::extension::{compose_execute, ExecutionInfo, Extension, FactoryThunk};
use skein_core::schema::{Accept, Schema, SchemaRef};
use skein_core::scope::Scope;
use skein_core::tag::{MetaMap, Tagged};
use skein_core::types::{BoxFuture, ErasedValue};
use skein_core::{DependencyList, Pod};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Outcome returned by a flow handler: a success payload or a typed error
/// payload. Produced via [`FlowCtx::ok`] / [`FlowCtx::ko`].
#[derive(Clone)]
pub enum Flowed<O, E> {
    Ok(O),
    Ko(E),
}

impl<O: fmt::Debug, E: fmt::Debug> fmt::Debug for Flowed<O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flowed::Ok(o) => f.debug_tuple("Ok").field(o).finish(),
            Flowed::Ko(e) => f.debug_tuple("Ko").field(e).finish(),
        }
    }
}

/// How a flow failed: with the flow's declared error payload, or with a
/// runtime fault (validation, disposal, journal misuse, handler failure).
#[derive(Clone)]
pub enum FlowError<E> {
    Ko(E),
    Fault(CoreError),
}

impl<E> FlowError<E> {
    pub fn ko(&self) -> Option<&E> {
        match self {
            FlowError::Ko(e) => Some(e),
            FlowError::Fault(_) => None,
        }
    }

    pub fn fault(&self) -> Option<&CoreError> {
        match self {
            FlowError::Ko(_) => None,
            FlowError::Fault(err) => Some(err),
        }
    }

    /// Error code of the fault, when this is a fault.
    pub fn code(&self) -> Option<ErrorCode> {
        self.fault().map(|err| err.code())
    }
}

impl<E> From<CoreError> for FlowError<E> {
    fn from(err: CoreError) -> Self {
        FlowError::Fault(err)
    }
}

impl<E: fmt::Debug> fmt::Debug for FlowError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Ko(e) => f.debug_tuple("Ko").field(e).finish(),
            FlowError::Fault(err) => f.debug_tuple("Fault").field(err).finish(),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for FlowError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Ko(e) => write!(f, "flow returned error payload: {e:?}"),
            FlowError::Fault(err) => write!(f, "{err}"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for FlowError<E> {}

type HandlerFn<I, O, E> =
    Box<dyn Fn(FlowCtx, I) -> BoxFuture<'static, Result<Flowed<O, E>, CoreError>> + Send + Sync>;

pub(crate) struct FlowInner<I, O, E> {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) input_schema: SchemaRef<I>,
    pub(crate) success_schema: SchemaRef<O>,
    pub(crate) error_schema: SchemaRef<E>,
    pub(crate) meta: MetaMap,
    pub(crate) handler: HandlerFn<I, O, E>,
}

/// A typed flow: name, version, input/success/error schemas, dependency
/// declaration and handler. Cheap to clone; clones share identity.
pub struct Flow<I, O, E> {
    pub(crate) inner: Arc<FlowInner<I, O, E>>,
}

impl<I, O, E> Clone for Flow<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<I, O, E> fmt::Debug for Flow<I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .finish()
    }
}

impl<I, O, E> Flow<I, O, E> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn meta(&self) -> &MetaMap {
        &self.inner.meta
    }
}

/// Start defining a flow.
///
/// # Example
///
/// ```ignore
/// let double = define("double")
///     .input_schema(Refine::new(|n: &i64| {
///         (*n >= 0).then_some(()).ok_or_else(|| "negative".to_string())
///     }))
///     .success::<i64>()
///     .error::<String>()
///     .handler((), |_, ctx, n| async move { ctx.ok(n * 2) });
/// ```
pub fn define(name: impl Into<String>) -> FlowBuilder<(), (), ()> {
    FlowBuilder {
        name: name.into(),
        version: "1".to_string(),
        input_schema: Arc::new(Accept),
        success_schema: Arc::new(Accept),
        error_schema: Arc::new(Accept),
        meta: MetaMap::new(),
    }
}

/// Builder for [`Flow`]; the `input`/`success`/`error` steps fix the three
/// payload types.
pub struct FlowBuilder<I, O, E> {
    name: String,
    version: String,
    input_schema: SchemaRef<I>,
    success_schema: SchemaRef<O>,
    error_schema: SchemaRef<E>,
    meta: MetaMap,
}

impl<I, O, E> FlowBuilder<I, O, E>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_meta(mut self, entry: Tagged) -> Self {
        self.meta = self.meta.with(entry);
        self
    }

    /// Fix the input type, accepting any value.
    pub fn input<I2: Send + Sync + 'static>(self) -> FlowBuilder<I2, O, E> {
        self.input_schema(Accept)
    }

    /// Fix the input type with a validating schema.
    pub fn input_schema<I2: Send + Sync + 'static>(
        self,
        schema: impl Schema<I2>,
    ) -> FlowBuilder<I2, O, E> {
        FlowBuilder {
            name: self.name,
            version: self.version,
            input_schema: Arc::new(schema),
            success_schema: self.success_schema,
            error_schema: self.error_schema,
            meta: self.meta,
        }
    }

    /// Fix the success type, accepting any value.
    pub fn success<O2: Send + Sync + 'static>(self) -> FlowBuilder<I, O2, E> {
        self.success_schema(Accept)
    }

    /// Fix the success type with a validating schema.
    pub fn success_schema<O2: Send + Sync + 'static>(
        self,
        schema: impl Schema<O2>,
    ) -> FlowBuilder<I, O2, E> {
        FlowBuilder {
            name: self.name,
            version: self.version,
            input_schema: self.input_schema,
            success_schema: Arc::new(schema),
            error_schema: self.error_schema,
            meta: self.meta,
        }
    }

    /// Fix the error type, accepting any value.
    pub fn error<E2: Send + Sync + 'static>(self) -> FlowBuilder<I, O, E2> {
        self.error_schema(Accept)
    }

    /// Fix the error type with a validating schema.
    pub fn error_schema<E2: Send + Sync + 'static>(
        self,
        schema: impl Schema<E2>,
    ) -> FlowBuilder<I, O, E2> {
        FlowBuilder {
            name: self.name,
            version: self.version,
            input_schema: self.input_schema,
            success_schema: self.success_schema,
            error_schema: Arc::new(schema),
            meta: self.meta,
        }
    }

    /// Attach the dependency declaration and handler, producing the flow.
    ///
    /// Dependencies are resolved through the executing pod on every
    /// invocation, before the handler body runs.
    pub fn handler<D, F, Fut>(self, deps: D, f: F) -> Flow<I, O, E>
    where
        D: DependencyList,
        F: Fn(D::Output, FlowCtx, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Flowed<O, E>, CoreError>> + Send + 'static,
    {
        let deps = Arc::new(deps);
        let f = Arc::new(f);
        let handler: HandlerFn<I, O, E> = Box::new(move |ctx: FlowCtx, input: I| {
            let deps = deps.clone();
            let f = f.clone();
            Box::pin(async move {
                let resolved = ctx.pod().resolve_deps(&*deps).await?;
                f(resolved, ctx, input).await
            })
        });
        Flow {
            inner: Arc::new(FlowInner {
                name: self.name,
                version: self.version,
                input_schema: self.input_schema,
                success_schema: self.success_schema,
                error_schema: self.error_schema,
                meta: self.meta,
                handler,
            }),
        }
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

/// Options for [`execute`].
#[derive(Default)]
pub struct ExecuteOptions {
    /// Scope to create the execution pod from. Ignored when `pod` is set;
    /// when neither is set, a private scope is created and disposed with
    /// the pod.
    pub scope: Option<Scope>,
    /// Pod to execute in. Externally supplied pods are not auto-disposed.
    pub pod: Option<Pod>,
    /// Tag entries seeded into the context store.
    pub tags: Vec<Tagged>,
    /// Pod-local extensions; applied only when the pod is created here.
    pub extensions: Vec<Arc<dyn Extension>>,
    /// Pre-recorded journal outcomes keyed by `ctx.run` key; a seeded key
    /// replays the recorded value instead of invoking the closure.
    pub journal: Vec<(String, ErasedValue)>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(mut self, scope: &Scope) -> Self {
        self.scope = Some(scope.clone());
        self
    }

    pub fn pod(mut self, pod: &Pod) -> Self {
        self.pod = Some(pod.clone());
        self
    }

    pub fn tag(mut self, entry: Tagged) -> Self {
        self.tags.push(entry);
        self
    }

    pub fn extension(mut self, ext: impl Extension) -> Self {
        self.extensions.push(Arc::new(ext));
        self
    }

    /// Seed a journal entry for replay.
    pub fn journal_entry<T: Send + Sync + 'static>(
        mut self,
        key: impl Into<String>,
        value: T,
    ) -> Self {
        self.journal.push((key.into(), Arc::new(value)));
        self
    }
}

/// Execute a flow, returning a [`Promised`] carrying its pod and context.
///
/// The pod is obtained from the options (or created from the supplied
/// scope, or from a private scope). Implicitly created pods are disposed
/// when the promised is awaited, unless adopted via
/// [`Promised::get_pod`].
pub fn execute<I, O, E>(flow: &Flow<I, O, E>, input: I, options: ExecuteOptions) -> Promised<O, E>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let (pod, implicit_pod, implicit_scope) = match options.pod {
        Some(pod) => (pod, false, None),
        None => {
            let (scope, implicit_scope) = match options.scope {
                Some(scope) => (scope, None),
                None => {
                    let scope = Scope::new();
                    (scope.clone(), Some(scope))
                }
            };
            let mut builder = scope.pod_builder();
            for ext in options.extensions {
                builder = builder.with_extension_arc(ext);
            }
            (builder.build(), true, implicit_scope)
        }
    };

    let ctx = FlowCtx::root(
        flow.name().to_string(),
        pod.clone(),
        options.tags,
        options.journal,
    );
    let flow = flow.clone();
    let run_ctx = ctx.clone();
    let future: BoxFuture<'static, Result<O, FlowError<E>>> =
        Box::pin(async move { run_flow(flow, input, run_ctx, None).await });
    Promised::new(future, ctx, pod, implicit_pod, implicit_scope)
}

/// Handler failures keep their typed code when they are already flow,
/// scope or validation errors; anything else becomes
/// `FLOW_EXECUTION_FAILED` with the original as source.
fn normalize_handler_error(err: CoreError) -> CoreError {
    match err.category() {
        ErrorCategory::Flow | ErrorCategory::Scope | ErrorCategory::Validation => err,
        _ => CoreError::new(
            ErrorCode::FlowExecutionFailed,
            Stage::FlowExecute,
            format!("flow handler failed: {err}"),
        )
        .with_source(err),
    }
}

/// Shared execution path for root executions and sub-flows: input
/// validation, handler through the `wrap_execute` chain, boundary
/// validation of the outcome.
pub(crate) async fn run_flow<I, O, E>(
    flow: Flow<I, O, E>,
    input: I,
    ctx: FlowCtx,
    journal_key: Option<String>,
) -> Result<O, FlowError<E>>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    if ctx.pod().is_disposed() {
        return Err(FlowError::Fault(
            CoreError::scope_disposed(ctx.pod().id()).with_stage(Stage::FlowExecute),
        ));
    }

    // The handler never runs on input failure.
    if let Err(issues) = flow.inner.input_schema.validate(&input) {
        return Err(FlowError::Fault(issues.into_error(Stage::FlowInput)));
    }

    let info = ExecutionInfo {
        flow_name: flow.name().to_string(),
        depth: ctx.depth(),
        parallel: ctx.is_parallel(),
        journal_key,
    };
    tracing::debug!(flow = %info.flow_name, depth = info.depth, "executing flow");

    let handler_flow = flow.clone();
    let handler_ctx = ctx.clone();
    let thunk: FactoryThunk = Box::new(move || {
        Box::pin(async move {
            let outcome = (handler_flow.inner.handler)(handler_ctx, input)
                .await
                .map_err(normalize_handler_error)?;
            Ok(Arc::new(outcome) as ErasedValue)
        })
    });

    let erased = compose_execute(&ctx.pod().extensions(), &info, thunk)
        .await
        .map_err(FlowError::Fault)?;
    let outcome = erased
        .downcast_ref::<Flowed<O, E>>()
        .cloned()
        .ok_or_else(|| {
            FlowError::Fault(CoreError::new(
                ErrorCode::FlowExecutionFailed,
                Stage::FlowExecute,
                format!(
                    "flow `{}` produced a value of unexpected type",
                    flow.name()
                ),
            ))
        })?;

    match outcome {
        Flowed::Ok(data) => match flow.inner.success_schema.validate(&data) {
            Ok(()) => Ok(data),
            Err(issues) => Err(FlowError::Fault(issues.into_error(Stage::FlowOutput))),
        },
        Flowed::Ko(error) => match flow.inner.error_schema.validate(&error) {
            Ok(()) => Err(FlowError::Ko(error)),
            Err(issues) => Err(FlowError::Fault(issues.into_error(Stage::FlowOutput))),
        },
    }
}
