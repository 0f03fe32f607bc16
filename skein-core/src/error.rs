use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Machine-readable error code. The wire spelling is available via
/// [`ErrorCode::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FactoryExecutionFailed,
    FactoryThrewError,
    FactoryReturnedInvalid,
    DependencyNotFound,
    CircularDependency,
    ScopeDisposed,
    ReactiveExecutorInPod,
    SchemaValidationFailed,
    FlowExecutionFailed,
    JournalKeyDuplicate,
}

impl ErrorCode {
    /// SCREAMING_SNAKE name as surfaced to hosts and tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FactoryExecutionFailed => "FACTORY_EXECUTION_FAILED",
            ErrorCode::FactoryThrewError => "FACTORY_THREW_ERROR",
            ErrorCode::FactoryReturnedInvalid => "FACTORY_RETURNED_INVALID",
            ErrorCode::DependencyNotFound => "DEPENDENCY_NOT_FOUND",
            ErrorCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            ErrorCode::ScopeDisposed => "SCOPE_DISPOSED",
            ErrorCode::ReactiveExecutorInPod => "REACTIVE_EXECUTOR_IN_POD",
            ErrorCode::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            ErrorCode::FlowExecutionFailed => "FLOW_EXECUTION_FAILED",
            ErrorCode::JournalKeyDuplicate => "JOURNAL_KEY_DUPLICATE",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::FactoryExecutionFailed
            | ErrorCode::FactoryThrewError
            | ErrorCode::FactoryReturnedInvalid => ErrorCategory::Factory,
            ErrorCode::DependencyNotFound | ErrorCode::CircularDependency => {
                ErrorCategory::Dependency
            }
            ErrorCode::ScopeDisposed | ErrorCode::ReactiveExecutorInPod => ErrorCategory::Scope,
            ErrorCode::SchemaValidationFailed => ErrorCategory::Validation,
            ErrorCode::FlowExecutionFailed | ErrorCode::JournalKeyDuplicate => ErrorCategory::Flow,
        }
    }
}

/// Coarse grouping of [`ErrorCode`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Factory,
    Dependency,
    Scope,
    Validation,
    Flow,
    System,
}

/// Lifecycle stage at which an error was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Factory,
    Update,
    Release,
    Dispose,
    FlowInput,
    FlowExecute,
    FlowOutput,
    Journal,
}

/// Diagnostic context attached to every [`CoreError`].
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub executor_name: Option<String>,
    pub stage: Stage,
    /// Executor names accumulated as the failure propagates upward.
    pub dependency_chain: Vec<String>,
    pub scope_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub extra: Option<serde_json::Value>,
}

impl ErrorContext {
    fn new(stage: Stage) -> Self {
        Self {
            executor_name: None,
            stage,
            dependency_chain: Vec::new(),
            scope_id: None,
            timestamp: Utc::now(),
            extra: None,
        }
    }
}

struct ErrorInner {
    code: ErrorCode,
    message: String,
    context: ErrorContext,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

/// The unified runtime error. Cheap to clone — rejected accessor cells and
/// shared pending futures hand the same error to every waiter.
#[derive(Clone)]
pub struct CoreError {
    inner: Arc<ErrorInner>,
}

impl CoreError {
    pub fn new(code: ErrorCode, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ErrorInner {
                code,
                message: message.into(),
                context: ErrorContext::new(stage),
                source: None,
            }),
        }
    }

    /// A failure produced by user code inside a factory. Use this (or
    /// [`map_core_error!`](crate::map_core_error)) to surface domain errors
    /// from `provide`/`derive` factories.
    pub fn factory(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FactoryThrewError, Stage::Factory, message)
    }

    /// Wrap an arbitrary error raised inside a factory.
    pub fn factory_source<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::factory(err.to_string()).with_source(err)
    }

    pub fn scope_disposed(scope_id: Uuid) -> Self {
        Self::new(
            ErrorCode::ScopeDisposed,
            Stage::Resolve,
            "scope has been disposed",
        )
        .with_scope_id(scope_id)
    }

    pub fn circular(chain: Vec<String>) -> Self {
        let rendered = chain.join(" -> ");
        let mut err = Self::new(
            ErrorCode::CircularDependency,
            Stage::Resolve,
            format!("circular dependency detected: {rendered}"),
        );
        err.mutate_context(|ctx| ctx.dependency_chain = chain);
        err
    }

    pub fn reactive_in_pod(executor_name: &str) -> Self {
        Self::new(
            ErrorCode::ReactiveExecutorInPod,
            Stage::Resolve,
            format!("reactive executor `{executor_name}` cannot be resolved inside a pod"),
        )
        .with_executor_name(executor_name)
    }

    pub fn code(&self) -> ErrorCode {
        self.inner.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.inner.code.category()
    }

    pub fn message(&self) -> &str {
        &self.inner.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.inner.context
    }

    // ── Context builders ────────────────────────────────────────────────
    //
    // Errors are Arc-backed; these rebuild the inner record. They run on
    // failure paths only.

    fn mutate_context(&mut self, f: impl FnOnce(&mut ErrorContext)) {
        let mut context = self.inner.context.clone();
        f(&mut context);
        self.inner = Arc::new(ErrorInner {
            code: self.inner.code,
            message: self.inner.message.clone(),
            context,
            source: self.inner.source.clone(),
        });
    }

    pub fn with_executor_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.mutate_context(|ctx| ctx.executor_name = Some(name));
        self
    }

    /// Set the originating executor name only if one is not already
    /// recorded — the origin survives as the failure bubbles up.
    pub fn with_executor_name_if_absent(self, name: impl Into<String>) -> Self {
        if self.inner.context.executor_name.is_some() {
            self
        } else {
            self.with_executor_name(name)
        }
    }

    pub fn with_scope_id(mut self, id: Uuid) -> Self {
        self.mutate_context(|ctx| ctx.scope_id = Some(id));
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.mutate_context(|ctx| ctx.stage = stage);
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.mutate_context(|ctx| ctx.extra = Some(extra));
        self
    }

    /// Append an executor name to the dependency chain as the failure
    /// bubbles up through dependents.
    pub fn push_dependency(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.mutate_context(|ctx| ctx.dependency_chain.push(name));
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let rebuilt = ErrorInner {
            code: self.inner.code,
            message: self.inner.message.clone(),
            context: self.inner.context.clone(),
            source: Some(Arc::new(source)),
        };
        self.inner = Arc::new(rebuilt);
        self
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.inner.code.as_str(), self.inner.message)?;
        if let Some(name) = &self.inner.context.executor_name {
            write!(f, " (executor: {name})")?;
        }
        if !self.inner.context.dependency_chain.is_empty() {
            write!(f, " (chain: {})", self.inner.context.dependency_chain.join(" -> "))?;
        }
        Ok(())
    }
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Generate `From<E> for CoreError` implementations that map error types to
/// factory failures.
///
/// # Example
///
/// ```ignore
/// skein_core::map_core_error! {
///     std::io::Error,
///     sqlx::Error,
/// }
/// ```
#[macro_export]
macro_rules! map_core_error {
    ( $( $err_ty:ty ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::CoreError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::CoreError::factory_source(err)
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_wire_names() {
        assert_eq!(
            ErrorCode::CircularDependency.as_str(),
            "CIRCULAR_DEPENDENCY"
        );
        assert_eq!(
            ErrorCode::ReactiveExecutorInPod.as_str(),
            "REACTIVE_EXECUTOR_IN_POD"
        );
        assert_eq!(
            ErrorCode::SchemaValidationFailed.as_str(),
            "SCHEMA_VALIDATION_FAILED"
        );
    }

    #[test]
    fn categories() {
        assert_eq!(
            ErrorCode::FactoryThrewError.category(),
            ErrorCategory::Factory
        );
        assert_eq!(ErrorCode::ScopeDisposed.category(), ErrorCategory::Scope);
        assert_eq!(
            ErrorCode::JournalKeyDuplicate.category(),
            ErrorCategory::Flow
        );
    }

    #[test]
    fn chain_accumulates() {
        let err = CoreError::factory("boom")
            .push_dependency("db-pool")
            .push_dependency("user-service");
        assert_eq!(
            err.context().dependency_chain,
            vec!["db-pool".to_string(), "user-service".to_string()]
        );
    }

    #[test]
    fn circular_chain_first_last_equal() {
        let err = CoreError::circular(vec!["a".into(), "b".into(), "a".into()]);
        let chain = &err.context().dependency_chain;
        assert_eq!(chain.first(), chain.last());
        assert_eq!(err.code(), ErrorCode::CircularDependency);
    }

    #[test]
    fn display_includes_code_and_executor() {
        let err = CoreError::factory("boom").with_executor_name("cache");
        let rendered = err.to_string();
        assert!(rendered.contains("FACTORY_THREW_ERROR"));
        assert!(rendered.contains("cache"));
    }

    #[test]
    fn clone_shares_inner() {
        let err = CoreError::factory("boom");
        let clone = err.clone();
        assert_eq!(err.code(), clone.code());
        assert_eq!(err.message(), clone.message());
    }
}
