//! Test utilities for skein: counting probe executors, a recording
//! extension, scope fixtures and flow assertion helpers.
//!
//! ```ignore
//! use skein_test::{Probe, TestScope};
//!
//! let probe = Probe::new();
//! let service = probe.executor("ready");
//! let scope = TestScope::new();
//! scope.resolve_ok(&service).await;
//! probe.assert_runs(1);
//! ```

mod harness;
mod probe;
mod recording;

pub use harness::{run_flow_test, run_flow_test_with, TestOutcome, TestScope};
pub use probe::Probe;
pub use recording::{Recording, RecordedEvent};
