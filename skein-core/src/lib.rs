//! Skein core — a graph of lazy, cacheable, reactive computations.
//!
//! Application state and services are modelled as a directed acyclic graph
//! of [`Executor`]s resolved within a [`Scope`]: resolution is lazy,
//! cached per scope, and async-safe (concurrent resolutions share one
//! factory invocation). Updates propagate along reactive edges, re-running
//! dependents with ordered cleanup. [`Pod`]s are lightweight child
//! containers that delegate cache hits to their parent while isolating
//! presets and mutation; the flow runtime in `skein-flow` builds on them.
//!
//! ```ignore
//! use skein_core::prelude::*;
//!
//! let port = provide(|_| async { Ok(8080u16) });
//! let addr = derive(port.reactive(), |p, _| async move {
//!     Ok(format!("0.0.0.0:{p}"))
//! });
//!
//! let scope = Scope::new();
//! assert_eq!(scope.resolve(&addr).await?, "0.0.0.0:8080");
//! scope.update(&port, 9090).await?;
//! assert_eq!(scope.accessor(&addr).get()?, "0.0.0.0:9090");
//! ```

pub mod accessor;
pub mod error;
pub mod executor;
pub mod extension;
pub mod extensions;
pub mod pod;
pub mod prelude;
pub mod schema;
pub mod scope;
pub mod tag;
pub mod telemetry;
pub mod types;

pub use accessor::{Accessor, ReleaseMode, ResolutionState, Subscription};
pub use error::{CoreError, ErrorCategory, ErrorCode, ErrorContext, Stage};
pub use executor::{
    derive, provide, Controller, DepKind, DepMap, DepRef, DependencyList, DynExecutor, Executor,
    ExecutorId, IntoDepRef, Lazy, Reactive, ResolvedMap, StaticDep,
};
pub use extension::{
    compose_execute, ExecuteNext, ExecutionInfo, Extension, FactoryThunk, Operation, ResolveInfo,
    ResolveNext,
};
pub use extensions::{LogLevel, Logged, Timed};
pub use pod::{Pod, PodBuilder};
pub use schema::{Accept, Refine, Schema, SchemaIssue, SchemaIssues, SchemaRef, Valid};
pub use scope::{
    preset, Preset, ReleaseEvent, ResolveCtx, ResolveEvent, Scope, ScopeBuilder, ScopeRef,
    UpdateEvent,
};
pub use tag::{MetaMap, Tag, TagKey, TagSource, TagStore, Tagged};
pub use telemetry::init_tracing;
pub use types::{BoxFuture, ErasedValue};
