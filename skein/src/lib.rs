//! Skein — a graph of lazy, cacheable, reactive computations.
//!
//! This facade crate re-exports the Skein sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use skein::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature | Default | Crate        |
//! |---------|---------|--------------|
//! | `flow`  | **yes** | `skein-flow` |

pub extern crate skein_core;

// Re-export everything from skein-core at the top level for convenience.
pub use skein_core::*;

#[cfg(feature = "flow")]
pub use skein_flow;

pub mod prelude {
    //! Skein prelude — import everything you need with a single `use`.

    pub use skein_core::prelude::*;

    #[cfg(feature = "flow")]
    pub use skein_flow::{
        define, execute, ExecuteOptions, Flow, FlowCtx, FlowError, Flowed, Promised,
    };
}
