use skein_core::error::CoreError;
use skein_core::extension::{ExecuteNext, ExecutionInfo, Extension, ResolveInfo, ResolveNext};
use skein_core::scope::Scope;
use skein_core::types::{BoxFuture, ErasedValue};
use skein_core::Operation;
use std::sync::{Arc, Mutex};

/// A single event captured by the [`Recording`] extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    ResolveStart(String),
    /// Executor name and whether the resolution succeeded.
    ResolveEnd(String, bool),
    ExecuteStart(String),
    /// Flow name and whether execution produced a value through the chain.
    ExecuteEnd(String, bool),
    /// Wire code of a surfaced error.
    Error(String),
}

/// Extension capturing resolution and execution events for assertions.
///
/// Clone-cheap: clones share the same event log, so keep one handle while
/// installing another on the scope.
#[derive(Clone, Default)]
pub struct Recording {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: RecordedEvent) {
        self.events.lock().expect("recording poisoned").push(event);
    }

    /// Snapshot of all captured events, in order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("recording poisoned").clone()
    }

    /// Names of executors whose factories completed, in completion order.
    pub fn resolved_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::ResolveEnd(name, true) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Wire codes of all surfaced errors.
    pub fn error_codes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::Error(code) => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn assert_contains(&self, event: &RecordedEvent) {
        assert!(
            self.events().contains(event),
            "event {event:?} not captured; saw {:?}",
            self.events()
        );
    }

    pub fn clear(&self) {
        self.events.lock().expect("recording poisoned").clear();
    }
}

impl Extension for Recording {
    fn wrap_resolve(
        &self,
        info: ResolveInfo,
        next: ResolveNext,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let recording = self.clone();
        Box::pin(async move {
            recording.push(RecordedEvent::ResolveStart(info.executor_name.clone()));
            let result = next.run().await;
            recording.push(RecordedEvent::ResolveEnd(
                info.executor_name,
                result.is_ok(),
            ));
            result
        })
    }

    fn wrap_execute(
        &self,
        info: ExecutionInfo,
        next: ExecuteNext,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let recording = self.clone();
        Box::pin(async move {
            recording.push(RecordedEvent::ExecuteStart(info.flow_name.clone()));
            let result = next.run().await;
            recording.push(RecordedEvent::ExecuteEnd(info.flow_name, result.is_ok()));
            result
        })
    }

    fn on_error(&self, err: &CoreError, _op: Operation, _scope: &Scope) {
        self.push(RecordedEvent::Error(err.code().as_str().to_string()));
    }
}
