//! Executor model: immutable graph nodes.
//!
//! An [`Executor`] declares its dependencies and a factory; it owns no
//! state. All state (cached values, cleanups, reactive edges) lives in the
//! per-scope accessor cell. Variant wrappers ([`Reactive`], [`Lazy`],
//! [`StaticDep`]) share the base executor's identity — resolution always
//! uses the base as cache key — and only change how the dependency is
//! delivered to a consuming factory.

use crate::accessor::Accessor;
use crate::error::{CoreError, ErrorCode, Stage};
use crate::extension::FactoryThunk;
use crate::scope::{ResolveCtx, ScopeRef};
use crate::tag::{MetaMap, Tagged};
use crate::types::{BoxFuture, ErasedValue};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic executor identity, assigned at construction. Reference
/// equality remains the public contract; the id is the internal cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutorId(u64);

impl ExecutorId {
    fn next() -> Self {
        Self(NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a dependency element is delivered to the consuming factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    /// Deliver the resolved value.
    Value,
    /// Deliver the resolved value and install a reactive edge.
    Reactive,
    /// Deliver the accessor without triggering resolution.
    Lazy,
    /// Deliver the accessor for read/update/subscribe.
    Static,
}

/// Type-erased reference to a dependency element, as recorded on the
/// depending executor for graph walks (cycle reporting, pod preset checks).
#[derive(Clone)]
pub struct DepRef {
    pub(crate) executor: Arc<dyn ErasedExecutor>,
    pub(crate) kind: DepKind,
}

impl fmt::Debug for DepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepRef")
            .field("executor", &self.executor.name())
            .field("kind", &self.kind)
            .finish()
    }
}

// ── Controller ──────────────────────────────────────────────────────────────

type CleanupFn = Box<dyn FnOnce() + Send>;

struct ControllerInner {
    scope: ScopeRef,
    cleanups: Mutex<Vec<CleanupFn>>,
    release_requested: AtomicBool,
}

/// Handle passed to every factory invocation.
///
/// # Example
///
/// ```ignore
/// let listener = provide(|ctl| async move {
///     let socket = bind().await?;
///     let handle = socket.handle();
///     ctl.cleanup(move || handle.close());
///     Ok(socket)
/// });
/// ```
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    pub(crate) fn new(scope: ScopeRef) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                scope,
                cleanups: Mutex::new(Vec::new()),
                release_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Register a release callback. Callbacks run in LIFO order when the
    /// accessor's value leaves the cache.
    pub fn cleanup(&self, f: impl FnOnce() + Send + 'static) {
        self.inner
            .cleanups
            .lock()
            .expect("controller poisoned")
            .push(Box::new(f));
    }

    /// Handle into the owning scope or pod, for ad-hoc resolution.
    pub fn scope(&self) -> ScopeRef {
        self.inner.scope.clone()
    }

    /// Request self-invalidation: the accessor is released as soon as the
    /// current resolution completes, so the next resolve re-runs the
    /// factory.
    pub fn release(&self) {
        self.inner.release_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_cleanups(&self) -> Vec<CleanupFn> {
        std::mem::take(&mut *self.inner.cleanups.lock().expect("controller poisoned"))
    }

    pub(crate) fn release_requested(&self) -> bool {
        self.inner.release_requested.load(Ordering::SeqCst)
    }
}

// ── Erased executor ─────────────────────────────────────────────────────────

type RunFn = Box<
    dyn for<'a> Fn(&'a ResolveCtx, Controller) -> BoxFuture<'a, Result<ErasedValue, CoreError>>
        + Send
        + Sync,
>;

/// Object-safe view of an executor used by the resolution engine.
pub(crate) trait ErasedExecutor: Send + Sync + 'static {
    fn id(&self) -> ExecutorId;
    fn name(&self) -> String;
    fn dep_refs(&self) -> Vec<DepRef>;
    fn meta(&self) -> MetaMap;
    /// Resolve dependencies, then drive the factory through the extension
    /// pipeline.
    fn run<'a>(
        &'a self,
        ctx: &'a ResolveCtx,
        ctl: Controller,
    ) -> BoxFuture<'a, Result<ErasedValue, CoreError>>;
}

struct ExecutorInner<T> {
    id: ExecutorId,
    name: OnceLock<String>,
    meta: Mutex<MetaMap>,
    dep_refs: Vec<DepRef>,
    run: RunFn,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ErasedExecutor for ExecutorInner<T> {
    fn id(&self) -> ExecutorId {
        self.id
    }

    fn name(&self) -> String {
        self.name
            .get()
            .cloned()
            .unwrap_or_else(|| format!("executor-{}", self.id))
    }

    fn dep_refs(&self) -> Vec<DepRef> {
        self.dep_refs.clone()
    }

    fn meta(&self) -> MetaMap {
        self.meta.lock().expect("executor meta poisoned").clone()
    }

    fn run<'a>(
        &'a self,
        ctx: &'a ResolveCtx,
        ctl: Controller,
    ) -> BoxFuture<'a, Result<ErasedValue, CoreError>> {
        (self.run)(ctx, ctl)
    }
}

// ── Executor ────────────────────────────────────────────────────────────────

/// An immutable graph node declaring dependencies and a factory producing
/// `T`. Cheap to clone; clones share identity.
pub struct Executor<T> {
    inner: Arc<ExecutorInner<T>>,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Executor<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Executor<T> {
    pub fn id(&self) -> ExecutorId {
        self.inner.id
    }

    pub fn name(&self) -> String {
        ErasedExecutor::name(&*self.inner)
    }

    pub fn meta(&self) -> MetaMap {
        ErasedExecutor::meta(&*self.inner)
    }

    /// Set a debug name (first write wins).
    pub fn with_name(self, name: impl Into<String>) -> Self {
        let _ = self.inner.name.set(name.into());
        self
    }

    /// Attach a decoration entry (construction-time only).
    pub fn with_meta(self, entry: Tagged) -> Self {
        {
            let mut meta = self.inner.meta.lock().expect("executor meta poisoned");
            let current = meta.clone();
            *meta = current.with(entry);
        }
        self
    }

    /// Reactive handle: used as a dependency, installs a reactive edge so
    /// the dependent is re-resolved when this executor is updated.
    pub fn reactive(&self) -> Reactive<T> {
        Reactive { base: self.clone() }
    }

    /// Lazy handle: the dependent receives this executor's accessor without
    /// triggering resolution.
    pub fn lazy(&self) -> Lazy<T> {
        Lazy { base: self.clone() }
    }

    /// Static handle: the dependent receives the accessor itself, for
    /// read/update/subscribe.
    pub fn as_static(&self) -> StaticDep<T> {
        StaticDep { base: self.clone() }
    }

    pub(crate) fn erased(&self) -> Arc<dyn ErasedExecutor> {
        self.inner.clone()
    }
}

/// Reactive variant of an [`Executor`], sharing its identity.
pub struct Reactive<T> {
    base: Executor<T>,
}

/// Lazy variant of an [`Executor`], sharing its identity.
pub struct Lazy<T> {
    base: Executor<T>,
}

/// Static variant of an [`Executor`], sharing its identity.
pub struct StaticDep<T> {
    base: Executor<T>,
}

macro_rules! impl_variant {
    ($variant:ident) => {
        impl<T> Clone for $variant<T> {
            fn clone(&self) -> Self {
                Self {
                    base: self.base.clone(),
                }
            }
        }

        impl<T: Send + Sync + 'static> $variant<T> {
            /// The underlying base executor.
            pub fn executor(&self) -> &Executor<T> {
                &self.base
            }
        }
    };
}

impl_variant!(Reactive);
impl_variant!(Lazy);
impl_variant!(StaticDep);

/// Type-erased executor handle, for registry lists and tooling.
#[derive(Clone)]
pub struct DynExecutor {
    pub(crate) inner: Arc<dyn ErasedExecutor>,
}

impl DynExecutor {
    pub fn id(&self) -> ExecutorId {
        self.inner.id()
    }

    pub fn name(&self) -> String {
        self.inner.name()
    }

    pub fn meta(&self) -> MetaMap {
        self.inner.meta()
    }
}

impl<T: Send + Sync + 'static> From<&Executor<T>> for DynExecutor {
    fn from(e: &Executor<T>) -> Self {
        Self { inner: e.erased() }
    }
}

impl fmt::Debug for DynExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynExecutor")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

// ── Construction ────────────────────────────────────────────────────────────

/// Create an executor with no dependencies.
///
/// # Example
///
/// ```ignore
/// let config = provide(|_ctl| async { Ok(AppConfig::default()) });
/// ```
pub fn provide<T, F, Fut>(factory: F) -> Executor<T>
where
    T: Send + Sync + 'static,
    F: Fn(Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
{
    derive((), move |_: (), ctl| factory(ctl))
}

/// Create an executor deriving its value from resolved dependencies.
///
/// `deps` is a single executor (or variant handle), a tuple of such, or a
/// [`DepMap`] for name-keyed access.
///
/// # Example
///
/// ```ignore
/// let total = derive((price.clone(), tax.reactive()), |(p, t), _ctl| async move {
///     Ok(p + t)
/// });
/// ```
pub fn derive<D, T, F, Fut>(deps: D, factory: F) -> Executor<T>
where
    D: DependencyList,
    T: Send + Sync + 'static,
    F: Fn(D::Output, Controller) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
{
    let dep_refs = deps.refs();
    let deps = Arc::new(deps);
    let factory: Arc<
        dyn Fn(D::Output, Controller) -> BoxFuture<'static, Result<T, CoreError>> + Send + Sync,
    > = Arc::new(move |out, ctl| Box::pin(factory(out, ctl)));

    let run: RunFn = Box::new(move |ctx: &ResolveCtx, ctl: Controller| {
        let deps = deps.clone();
        let factory = factory.clone();
        Box::pin(async move {
            let out = deps.resolve(ctx).await?;
            let thunk: FactoryThunk = Box::new(move || {
                let fut = factory(out, ctl);
                Box::pin(async move {
                    let value = fut.await?;
                    Ok(Arc::new(value) as ErasedValue)
                })
            });
            ctx.run_factory(thunk).await
        })
    });

    Executor {
        inner: Arc::new(ExecutorInner {
            id: ExecutorId::next(),
            name: OnceLock::new(),
            meta: Mutex::new(MetaMap::new()),
            dep_refs,
            run,
            _marker: PhantomData,
        }),
    }
}

// ── Dependency declarations ─────────────────────────────────────────────────

pub(crate) fn downcast_value<T: Clone + Send + Sync + 'static>(
    value: &ErasedValue,
    name: &str,
) -> Result<T, CoreError> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        CoreError::new(
            ErrorCode::FactoryReturnedInvalid,
            Stage::Resolve,
            format!("executor `{name}` resolved to an unexpected type"),
        )
        .with_executor_name(name)
    })
}

/// A dependency declaration: nothing, a single executor or variant handle,
/// a tuple of declarations (resolved in declaration order), or a [`DepMap`].
pub trait DependencyList: Send + Sync + 'static {
    /// Shape of the resolved dependencies as delivered to the factory.
    type Output: Send + 'static;

    /// Graph edges declared by this list, for cycle reporting and pod
    /// preset checks.
    fn refs(&self) -> Vec<DepRef>;

    fn resolve<'a>(&'a self, ctx: &'a ResolveCtx)
        -> BoxFuture<'a, Result<Self::Output, CoreError>>;
}

impl DependencyList for () {
    type Output = ();

    fn refs(&self) -> Vec<DepRef> {
        Vec::new()
    }

    fn resolve<'a>(
        &'a self,
        _ctx: &'a ResolveCtx,
    ) -> BoxFuture<'a, Result<Self::Output, CoreError>> {
        Box::pin(async { Ok(()) })
    }
}

impl<T: Clone + Send + Sync + 'static> DependencyList for Executor<T> {
    type Output = T;

    fn refs(&self) -> Vec<DepRef> {
        vec![DepRef {
            executor: self.erased(),
            kind: DepKind::Value,
        }]
    }

    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolveCtx,
    ) -> BoxFuture<'a, Result<Self::Output, CoreError>> {
        Box::pin(async move {
            let erased = self.erased();
            let value = ctx.resolve_value(&erased).await?;
            downcast_value(&value, &self.name())
        })
    }
}

impl<T: Clone + Send + Sync + 'static> DependencyList for Reactive<T> {
    type Output = T;

    fn refs(&self) -> Vec<DepRef> {
        vec![DepRef {
            executor: self.base.erased(),
            kind: DepKind::Reactive,
        }]
    }

    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolveCtx,
    ) -> BoxFuture<'a, Result<Self::Output, CoreError>> {
        Box::pin(async move {
            let erased = self.base.erased();
            let value = ctx.resolve_reactive(&erased).await?;
            downcast_value(&value, &self.base.name())
        })
    }
}

impl<T: Clone + Send + Sync + 'static> DependencyList for Lazy<T> {
    type Output = Accessor<T>;

    fn refs(&self) -> Vec<DepRef> {
        vec![DepRef {
            executor: self.base.erased(),
            kind: DepKind::Lazy,
        }]
    }

    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolveCtx,
    ) -> BoxFuture<'a, Result<Self::Output, CoreError>> {
        Box::pin(async move {
            let erased = self.base.erased();
            let (cell, scope) = ctx.accessor_cell(&erased)?;
            Ok(Accessor::from_cell(cell, scope))
        })
    }
}

impl<T: Clone + Send + Sync + 'static> DependencyList for StaticDep<T> {
    type Output = Accessor<T>;

    fn refs(&self) -> Vec<DepRef> {
        vec![DepRef {
            executor: self.base.erased(),
            kind: DepKind::Static,
        }]
    }

    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolveCtx,
    ) -> BoxFuture<'a, Result<Self::Output, CoreError>> {
        Box::pin(async move {
            let erased = self.base.erased();
            let (cell, scope) = ctx.accessor_cell(&erased)?;
            Ok(Accessor::from_cell(cell, scope))
        })
    }
}

macro_rules! impl_dependency_tuple {
    ( $( $name:ident ),+ ) => {
        impl<$( $name: DependencyList ),+> DependencyList for ($( $name, )+) {
            type Output = ($( $name::Output, )+);

            fn refs(&self) -> Vec<DepRef> {
                #[allow(non_snake_case)]
                let ($( $name, )+) = self;
                let mut refs = Vec::new();
                $( refs.extend($name.refs()); )+
                refs
            }

            fn resolve<'a>(
                &'a self,
                ctx: &'a ResolveCtx,
            ) -> BoxFuture<'a, Result<Self::Output, CoreError>> {
                #[allow(non_snake_case)]
                let ($( $name, )+) = self;
                Box::pin(async move {
                    Ok(($( $name.resolve(ctx).await?, )+))
                })
            }
        }
    };
}

impl_dependency_tuple!(D1);
impl_dependency_tuple!(D1, D2);
impl_dependency_tuple!(D1, D2, D3);
impl_dependency_tuple!(D1, D2, D3, D4);
impl_dependency_tuple!(D1, D2, D3, D4, D5);
impl_dependency_tuple!(D1, D2, D3, D4, D5, D6);
impl_dependency_tuple!(D1, D2, D3, D4, D5, D6, D7);
impl_dependency_tuple!(D1, D2, D3, D4, D5, D6, D7, D8);

// ── Name-keyed dependency maps ──────────────────────────────────────────────

/// Conversion into a single [`DepRef`]; implemented by executors and their
/// variant handles so all can appear in a [`DepMap`].
pub trait IntoDepRef {
    fn into_dep_ref(&self) -> DepRef;
}

impl<T: Send + Sync + 'static> IntoDepRef for Executor<T> {
    fn into_dep_ref(&self) -> DepRef {
        DepRef {
            executor: self.erased(),
            kind: DepKind::Value,
        }
    }
}

impl<T: Send + Sync + 'static> IntoDepRef for Reactive<T> {
    fn into_dep_ref(&self) -> DepRef {
        DepRef {
            executor: self.base.erased(),
            kind: DepKind::Reactive,
        }
    }
}

impl<T: Send + Sync + 'static> IntoDepRef for Lazy<T> {
    fn into_dep_ref(&self) -> DepRef {
        DepRef {
            executor: self.base.erased(),
            kind: DepKind::Lazy,
        }
    }
}

impl<T: Send + Sync + 'static> IntoDepRef for StaticDep<T> {
    fn into_dep_ref(&self) -> DepRef {
        DepRef {
            executor: self.base.erased(),
            kind: DepKind::Static,
        }
    }
}

/// Ordered name→executor dependency mapping. Resolution delivers a
/// [`ResolvedMap`] with typed access by name.
///
/// # Example
///
/// ```ignore
/// let report = derive(
///     DepMap::new().with("db", &db).with("clock", &clock.lazy()),
///     |deps, _ctl| async move {
///         let db: DbPool = deps.get("db")?;
///         Ok(build_report(db))
///     },
/// );
/// ```
#[derive(Clone, Default)]
pub struct DepMap {
    entries: Vec<(String, DepRef)>,
}

impl DepMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<D: IntoDepRef>(mut self, name: impl Into<String>, dep: &D) -> Self {
        self.entries.push((name.into(), dep.into_dep_ref()));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum ResolvedEntry {
    Value(ErasedValue),
    Accessor(Arc<crate::accessor::Cell>, ScopeRef),
}

/// Resolved values of a [`DepMap`], with typed access by name.
pub struct ResolvedMap {
    entries: HashMap<String, ResolvedEntry>,
}

impl ResolvedMap {
    /// Retrieve a resolved value by name, cloning it out.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<T, CoreError> {
        match self.entries.get(name) {
            Some(ResolvedEntry::Value(v)) => downcast_value(v, name),
            Some(ResolvedEntry::Accessor(..)) => Err(CoreError::new(
                ErrorCode::FactoryReturnedInvalid,
                Stage::Resolve,
                format!("dependency `{name}` is lazy/static; use `accessor` instead of `get`"),
            )),
            None => Err(CoreError::new(
                ErrorCode::DependencyNotFound,
                Stage::Resolve,
                format!("no dependency named `{name}` in map"),
            )),
        }
    }

    /// Retrieve the accessor of a lazy/static entry by name.
    pub fn accessor<T: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Accessor<T>, CoreError> {
        match self.entries.get(name) {
            Some(ResolvedEntry::Accessor(cell, scope)) => {
                Ok(Accessor::from_cell(cell.clone(), scope.clone()))
            }
            Some(ResolvedEntry::Value(_)) => Err(CoreError::new(
                ErrorCode::FactoryReturnedInvalid,
                Stage::Resolve,
                format!("dependency `{name}` is a value; use `get` instead of `accessor`"),
            )),
            None => Err(CoreError::new(
                ErrorCode::DependencyNotFound,
                Stage::Resolve,
                format!("no dependency named `{name}` in map"),
            )),
        }
    }
}

impl DependencyList for DepMap {
    type Output = ResolvedMap;

    fn refs(&self) -> Vec<DepRef> {
        self.entries.iter().map(|(_, r)| r.clone()).collect()
    }

    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolveCtx,
    ) -> BoxFuture<'a, Result<Self::Output, CoreError>> {
        Box::pin(async move {
            let mut entries = HashMap::with_capacity(self.entries.len());
            for (name, dep) in &self.entries {
                let resolved = match dep.kind {
                    DepKind::Value => {
                        ResolvedEntry::Value(ctx.resolve_value(&dep.executor).await?)
                    }
                    DepKind::Reactive => {
                        ResolvedEntry::Value(ctx.resolve_reactive(&dep.executor).await?)
                    }
                    DepKind::Lazy | DepKind::Static => {
                        let (cell, scope) = ctx.accessor_cell(&dep.executor)?;
                        ResolvedEntry::Accessor(cell, scope)
                    }
                };
                entries.insert(name.clone(), resolved);
            }
            Ok(ResolvedMap { entries })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use crate::tag::Tag;

    #[tokio::test]
    async fn names_default_to_the_executor_id() {
        let e = provide(|_ctl| async { Ok(1) });
        assert!(e.name().starts_with("executor-"));
        let named = provide(|_ctl| async { Ok(1) }).with_name("db-pool");
        assert_eq!(named.name(), "db-pool");
    }

    #[tokio::test]
    async fn meta_entries_are_readable_through_tags() {
        let owner: Tag<String> = Tag::new("owner");
        let e = provide(|_ctl| async { Ok(1) })
            .with_meta(owner.entry("platform-team".to_string()).unwrap());
        assert_eq!(owner.find(&e.meta()), Some("platform-team".to_string()));
    }

    #[tokio::test]
    async fn variants_share_the_base_identity() {
        let e = provide(|_ctl| async { Ok(1) });
        assert_eq!(e.reactive().executor().id(), e.id());
        assert_eq!(e.lazy().executor().id(), e.id());
        assert_eq!(e.as_static().executor().id(), e.id());
    }

    #[tokio::test]
    async fn resolved_map_distinguishes_values_from_accessors() {
        let value_dep = provide(|_ctl| async { Ok(1) });
        let lazy_dep = provide(|_ctl| async { Ok(2) });
        let e = derive(
            DepMap::new()
                .with("value", &value_dep)
                .with("deferred", &lazy_dep.lazy()),
            |deps, _ctl| async move {
                let v: i32 = deps.get("value")?;
                assert!(deps.get::<i32>("deferred").is_err());
                assert!(deps.accessor::<i32>("value").is_err());
                assert!(deps.get::<i32>("missing").is_err());
                let deferred = deps.accessor::<i32>("deferred")?;
                Ok(v + deferred.resolve().await?)
            },
        );
        let scope = Scope::new();
        assert_eq!(scope.resolve(&e).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cleanups_are_collected_from_the_controller() {
        let e = provide(|ctl| async move {
            ctl.cleanup(|| {});
            ctl.cleanup(|| {});
            Ok(1)
        });
        let scope = Scope::new();
        scope.resolve(&e).await.unwrap();
    }
}
