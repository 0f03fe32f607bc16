//! Skein core prelude — import everything you need with a single `use`.
//!
//! ```ignore
//! use skein_core::prelude::*;
//!
//! let config = provide(|_| async { Ok(Config::default()) });
//! let service = derive(config.clone(), |cfg, ctl| async move {
//!     let svc = Service::start(cfg).await.map_err(CoreError::factory_source)?;
//!     let handle = svc.handle();
//!     ctl.cleanup(move || handle.stop());
//!     Ok(svc)
//! });
//!
//! let scope = Scope::new();
//! let svc = scope.resolve(&service).await?;
//! ```

pub use crate::accessor::{Accessor, ReleaseMode, ResolutionState, Subscription};
pub use crate::error::{CoreError, ErrorCategory, ErrorCode, Stage};
pub use crate::executor::{
    derive, provide, Controller, DepMap, DependencyList, DynExecutor, Executor, ResolvedMap,
};
pub use crate::extension::{ExecutionInfo, Extension, Operation, ResolveInfo};
pub use crate::extensions::{LogLevel, Logged, Timed};
pub use crate::pod::{Pod, PodBuilder};
pub use crate::schema::{Accept, Refine, Schema, Valid};
pub use crate::scope::{preset, Preset, Scope, ScopeBuilder, ScopeRef};
pub use crate::tag::{MetaMap, Tag, TagStore, Tagged};
pub use crate::telemetry::init_tracing;
