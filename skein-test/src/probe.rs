use skein_core::{provide, CoreError, Executor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Factory-invocation and cleanup counters shared by the executors built
/// from one probe.
///
/// Every executor created through a probe increments `runs` when its
/// factory executes and `cleanups` when its accessor is released, which is
/// what most graph tests end up asserting on.
#[derive(Clone, Default)]
pub struct Probe {
    runs: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor producing `value`, counting factory runs and cleanups.
    pub fn executor<T: Clone + Send + Sync + 'static>(&self, value: T) -> Executor<T> {
        let runs = self.runs.clone();
        let cleanups = self.cleanups.clone();
        provide(move |ctl| {
            let runs = runs.clone();
            let cleanups = cleanups.clone();
            let value = value.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                ctl.cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                });
                Ok(value)
            }
        })
    }

    /// An executor whose factory always fails with a `FACTORY_THREW_ERROR`.
    pub fn failing<T: Clone + Send + Sync + 'static>(
        &self,
        message: impl Into<String>,
    ) -> Executor<T> {
        let runs = self.runs.clone();
        let message = message.into();
        provide(move |_ctl| {
            let runs = runs.clone();
            let message = message.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::factory(message))
            }
        })
    }

    /// An executor that fails its first `fail_times` runs, then produces
    /// `value`. Useful for release-and-retry scenarios.
    pub fn flaky<T: Clone + Send + Sync + 'static>(
        &self,
        fail_times: usize,
        value: T,
    ) -> Executor<T> {
        let runs = self.runs.clone();
        provide(move |_ctl| {
            let runs = runs.clone();
            let value = value.clone();
            async move {
                let run = runs.fetch_add(1, Ordering::SeqCst);
                if run < fail_times {
                    Err(CoreError::factory(format!("flaky failure #{run}")))
                } else {
                    Ok(value)
                }
            }
        })
    }

    /// Number of factory invocations across this probe's executors.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Number of cleanups executed across this probe's executors.
    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn assert_runs(&self, expected: usize) {
        assert_eq!(
            self.runs(),
            expected,
            "expected {expected} factory run(s), saw {}",
            self.runs()
        );
    }

    pub fn assert_cleanups(&self, expected: usize) {
        assert_eq!(
            self.cleanups(),
            expected,
            "expected {expected} cleanup(s), saw {}",
            self.cleanups()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::accessor::ReleaseMode;
    use skein_core::Scope;

    #[tokio::test]
    async fn probe_counts_runs_and_cleanups() {
        let probe = Probe::new();
        let e = probe.executor(5);
        let scope = Scope::new();
        assert_eq!(scope.resolve(&e).await.unwrap(), 5);
        assert_eq!(scope.resolve(&e).await.unwrap(), 5);
        probe.assert_runs(1);
        probe.assert_cleanups(0);
        scope.release(&e, ReleaseMode::Hard).unwrap();
        probe.assert_cleanups(1);
    }

    #[tokio::test]
    async fn flaky_recovers_after_release() {
        let probe = Probe::new();
        let e: Executor<i32> = probe.flaky(1, 42);
        let scope = Scope::new();
        scope.resolve(&e).await.unwrap_err();
        scope.release(&e, ReleaseMode::Hard).unwrap();
        assert_eq!(scope.resolve(&e).await.unwrap(), 42);
        probe.assert_runs(2);
    }
}
