//! Built-in extensions: logging and timing around resolution and flow
//! execution.

use crate::error::CoreError;
use crate::extension::{ExecuteNext, ExecutionInfo, Extension, ResolveInfo, ResolveNext};
use crate::types::{BoxFuture, ErasedValue};
use std::time::Instant;

/// Log level for the [`Logged`] and [`Timed`] extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Log a message at the given level using `tracing`.
pub fn log_at_level(level: LogLevel, subject: &str, msg: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(subject = subject, "{}", msg),
        LogLevel::Debug => tracing::debug!(subject = subject, "{}", msg),
        LogLevel::Info => tracing::info!(subject = subject, "{}", msg),
        LogLevel::Warn => tracing::warn!(subject = subject, "{}", msg),
        LogLevel::Error => tracing::error!(subject = subject, "{}", msg),
    }
}

// ---------------------------------------------------------------------------
// Logged
// ---------------------------------------------------------------------------

/// Logs entry and exit of every resolution and flow execution at the
/// specified level.
pub struct Logged {
    pub level: LogLevel,
}

impl Logged {
    pub fn new() -> Self {
        Logged {
            level: LogLevel::Info,
        }
    }
    pub fn info() -> Self {
        Logged {
            level: LogLevel::Info,
        }
    }
    pub fn debug() -> Self {
        Logged {
            level: LogLevel::Debug,
        }
    }
    pub fn trace() -> Self {
        Logged {
            level: LogLevel::Trace,
        }
    }
    pub fn level(level: LogLevel) -> Self {
        Logged { level }
    }
}

impl Default for Logged {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension for Logged {
    fn wrap_resolve(
        &self,
        info: ResolveInfo,
        next: ResolveNext,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let level = self.level;
        Box::pin(async move {
            log_at_level(level, &info.executor_name, "resolving");
            let result = next.run().await;
            match &result {
                Ok(_) => log_at_level(level, &info.executor_name, "resolved"),
                Err(err) => log_at_level(LogLevel::Warn, &info.executor_name, &err.to_string()),
            }
            result
        })
    }

    fn wrap_execute(
        &self,
        info: ExecutionInfo,
        next: ExecuteNext,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let level = self.level;
        Box::pin(async move {
            log_at_level(level, &info.flow_name, "executing flow");
            let result = next.run().await;
            match &result {
                Ok(_) => log_at_level(level, &info.flow_name, "flow completed"),
                Err(err) => log_at_level(LogLevel::Warn, &info.flow_name, &err.to_string()),
            }
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Timed
// ---------------------------------------------------------------------------

/// Measures and logs the duration of every resolution and flow execution.
///
/// If `threshold_ms` is set, only logs when the duration exceeds the
/// threshold.
pub struct Timed {
    pub level: LogLevel,
    pub threshold_ms: Option<u64>,
}

impl Timed {
    pub fn new() -> Self {
        Timed {
            level: LogLevel::Info,
            threshold_ms: None,
        }
    }
    pub fn debug() -> Self {
        Timed {
            level: LogLevel::Debug,
            threshold_ms: None,
        }
    }
    pub fn threshold(ms: u64) -> Self {
        Timed {
            level: LogLevel::Info,
            threshold_ms: Some(ms),
        }
    }
    pub fn threshold_warn(ms: u64) -> Self {
        Timed {
            level: LogLevel::Warn,
            threshold_ms: Some(ms),
        }
    }
}

impl Default for Timed {
    fn default() -> Self {
        Self::new()
    }
}

impl Timed {
    fn report(level: LogLevel, threshold_ms: Option<u64>, subject: &str, started: Instant) {
        let elapsed = started.elapsed();
        match threshold_ms {
            Some(threshold) if elapsed.as_millis() < u128::from(threshold) => {}
            _ => log_at_level(level, subject, &format!("took {}ms", elapsed.as_millis())),
        }
    }
}

impl Extension for Timed {
    fn wrap_resolve(
        &self,
        info: ResolveInfo,
        next: ResolveNext,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let level = self.level;
        let threshold_ms = self.threshold_ms;
        Box::pin(async move {
            let started = Instant::now();
            let result = next.run().await;
            Self::report(level, threshold_ms, &info.executor_name, started);
            result
        })
    }

    fn wrap_execute(
        &self,
        info: ExecutionInfo,
        next: ExecuteNext,
    ) -> BoxFuture<'static, Result<ErasedValue, CoreError>> {
        let level = self.level;
        let threshold_ms = self.threshold_ms;
        Box::pin(async move {
            let started = Instant::now();
            let result = next.run().await;
            Self::report(level, threshold_ms, &info.flow_name, started);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::provide;
    use crate::scope::Scope;

    #[tokio::test]
    async fn logged_and_timed_pass_values_through() {
        let scope = Scope::builder()
            .with_extension(Logged::debug())
            .with_extension(Timed::debug())
            .build();
        let e = provide(|_ctl| async { Ok(11) });
        assert_eq!(scope.resolve(&e).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn timed_threshold_does_not_swallow_errors() {
        let scope = Scope::builder()
            .with_extension(Timed::threshold_warn(1_000))
            .build();
        let e: crate::executor::Executor<i32> =
            provide(|_ctl| async { Err(crate::error::CoreError::factory("kept")) });
        let err = scope.resolve(&e).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::FactoryThrewError);
    }
}
