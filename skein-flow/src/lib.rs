//! Skein flow — context-scoped, journaled execution of typed handlers.
//!
//! Flows run on top of the scope/pod machinery from `skein-core`: each
//! execution obtains a pod, instantiates a fresh context store, and runs a
//! schema-bounded handler that may resolve executors (through the pod) and
//! invoke sub-flows (which inherit the pod and context).
//!
//! ```ignore
//! use skein_flow::{define, execute, ExecuteOptions};
//!
//! let greet = define("greet")
//!     .input::<String>()
//!     .success::<String>()
//!     .error::<String>()
//!     .handler((), |_, ctx, name| async move { ctx.ok(format!("hello {name}")) });
//!
//! let greeting = execute(&greet, "skein".into(), ExecuteOptions::new()).await?;
//! ```

pub mod context;
pub mod flow;
pub mod promised;

pub use context::{flow_depth_tag, flow_is_parallel_tag, flow_name_tag, FlowCtx};
pub use flow::{define, execute, ExecuteOptions, Flow, FlowBuilder, FlowError, Flowed};
pub use promised::{Details, Promised};
