use crate::recording::Recording;
use skein_core::accessor::ResolutionState;
use skein_core::error::{CoreError, ErrorCode};
use skein_core::scope::{Preset, Scope};
use skein_core::Executor;
use skein_flow::{execute, Details, ExecuteOptions, Flow, FlowError};
use std::fmt;

/// A scope fixture with a [`Recording`] extension pre-installed.
pub struct TestScope {
    pub scope: Scope,
    pub recording: Recording,
}

impl Default for TestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TestScope {
    pub fn new() -> Self {
        Self::with_presets(Vec::new())
    }

    pub fn with_presets(presets: Vec<Preset>) -> Self {
        let recording = Recording::new();
        let mut builder = Scope::builder().with_extension(recording.clone());
        for preset in presets {
            builder = builder.with_preset(preset);
        }
        Self {
            scope: builder.build(),
            recording,
        }
    }

    /// Resolve, panicking with a readable message on failure.
    pub async fn resolve_ok<T: Clone + Send + Sync + 'static>(&self, executor: &Executor<T>) -> T {
        self.scope
            .resolve(executor)
            .await
            .unwrap_or_else(|err| panic!("expected `{}` to resolve: {err}", executor.name()))
    }

    /// Resolve, panicking when it unexpectedly succeeds.
    pub async fn resolve_err<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
    ) -> CoreError {
        match self.scope.resolve(executor).await {
            Ok(_) => panic!("expected `{}` to fail", executor.name()),
            Err(err) => err,
        }
    }

    pub fn assert_state<T: Clone + Send + Sync + 'static>(
        &self,
        executor: &Executor<T>,
        expected: ResolutionState,
    ) {
        let actual = self.scope.accessor(executor).lookup();
        assert_eq!(
            actual,
            expected,
            "`{}` is {actual:?}, expected {expected:?}",
            executor.name()
        );
    }
}

/// Flow outcome wrapper with chaining assertion helpers.
pub struct TestOutcome<O, E> {
    details: Details<O, E>,
}

impl<O, E: fmt::Debug> TestOutcome<O, E> {
    /// Assert the flow succeeded. Returns `self` for chaining.
    pub fn assert_success(self) -> Self {
        assert!(
            self.details.success,
            "expected success, got {:?}",
            self.details.error
        );
        self
    }

    /// Assert the flow failed (ko or fault).
    pub fn assert_failed(self) -> Self {
        assert!(!self.details.success, "expected failure, got success");
        self
    }

    /// Assert the flow failed with a fault carrying the given code.
    pub fn assert_fault_code(self, code: ErrorCode) -> Self {
        match &self.details.error {
            Some(FlowError::Fault(fault)) => {
                assert_eq!(fault.code(), code, "unexpected fault: {fault}");
            }
            other => panic!("expected fault with {code:?}, got {other:?}"),
        }
        self
    }

    /// Assert the flow returned a typed error payload.
    pub fn assert_ko(self) -> Self {
        match &self.details.error {
            Some(FlowError::Ko(_)) => self,
            other => panic!("expected ko payload, got {other:?}"),
        }
    }

    /// The success value. Panics when the flow failed.
    pub fn value(self) -> O {
        match self.details.result {
            Some(value) => value,
            None => panic!("flow failed: {:?}", self.details.error),
        }
    }

    /// The typed error payload. Panics on success or fault.
    pub fn ko(self) -> E {
        match self.details.error {
            Some(FlowError::Ko(payload)) => payload,
            other => panic!("expected ko payload, got {other:?}"),
        }
    }
}

/// Execute a flow with default options and wrap the outcome for
/// assertions.
pub async fn run_flow_test<I, O, E>(flow: &Flow<I, O, E>, input: I) -> TestOutcome<O, E>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    run_flow_test_with(flow, input, ExecuteOptions::new()).await
}

/// Execute a flow with the given options and wrap the outcome.
pub async fn run_flow_test_with<I, O, E>(
    flow: &Flow<I, O, E>,
    input: I,
    options: ExecuteOptions,
) -> TestOutcome<O, E>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let details = execute(flow, input, options).in_details().await;
    TestOutcome { details }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::{preset, provide};
    use skein_flow::define;

    #[tokio::test]
    async fn test_scope_records_and_asserts() {
        let fixture = TestScope::new();
        let e = provide(|_ctl| async { Ok(1) }).with_name("unit");
        fixture.assert_state(&e, ResolutionState::Absent);
        assert_eq!(fixture.resolve_ok(&e).await, 1);
        fixture.assert_state(&e, ResolutionState::Resolved);
        assert_eq!(fixture.recording.resolved_names(), vec!["unit".to_string()]);
    }

    #[tokio::test]
    async fn preset_fixture_short_circuits() {
        let e = provide(|_ctl| async { Ok(1) });
        let fixture = TestScope::with_presets(vec![preset(&e, 9)]);
        assert_eq!(fixture.resolve_ok(&e).await, 9);
        // No factory ran, so nothing was recorded through the pipeline.
        assert!(fixture.recording.resolved_names().is_empty());
    }

    #[tokio::test]
    async fn flow_outcome_assertions() {
        let flow = define("assertable")
            .input::<i64>()
            .success::<i64>()
            .error::<String>()
            .handler((), |_, ctx, n: i64| async move {
                if n >= 0 {
                    ctx.ok(n)
                } else {
                    ctx.ko("negative".to_string())
                }
            });
        let value = run_flow_test(&flow, 4).await.assert_success().value();
        assert_eq!(value, 4);
        let payload = run_flow_test(&flow, -4).await.assert_failed().ko();
        assert_eq!(payload, "negative");
    }
}
