//! End-to-end graph scenarios exercised through the public API.

use skein_core::accessor::{ReleaseMode, ResolutionState};
use skein_core::error::ErrorCode;
use skein_core::{derive, preset, provide, Scope};
use skein_test::{Probe, RecordedEvent, TestScope};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn derives_through_a_small_graph_with_one_run_each() {
    let probe = Probe::new();
    let a = probe.executor(1);
    let b_runs = Arc::new(AtomicUsize::new(0));
    let b = {
        let b_runs = b_runs.clone();
        derive(a.clone(), move |v, _ctl| {
            let b_runs = b_runs.clone();
            async move {
                b_runs.fetch_add(1, Ordering::SeqCst);
                Ok(v + 1)
            }
        })
    };
    let c_runs = Arc::new(AtomicUsize::new(0));
    let c = {
        let c_runs = c_runs.clone();
        derive((a.clone(), b.clone()), move |(x, y), _ctl| {
            let c_runs = c_runs.clone();
            async move {
                c_runs.fetch_add(1, Ordering::SeqCst);
                Ok(x + y)
            }
        })
    };
    let fixture = TestScope::new();
    assert_eq!(fixture.resolve_ok(&c).await, 3);
    // Resolving `c` again hits every cache.
    assert_eq!(fixture.resolve_ok(&c).await, 3);
    probe.assert_runs(1);
    assert_eq!(b_runs.load(Ordering::SeqCst), 1);
    assert_eq!(c_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reactive_update_reaches_the_dependent() {
    let a = provide(|_ctl| async { Ok(1) });
    let b = derive(a.reactive(), |v, _ctl| async move { Ok(v + 1) });
    let fixture = TestScope::new();
    assert_eq!(fixture.resolve_ok(&b).await, 2);
    fixture.scope.update(&a, 10).await.unwrap();
    assert_eq!(fixture.scope.accessor(&b).get().unwrap(), 11);
}

#[tokio::test]
async fn failing_factory_runs_once_and_reports_twice() {
    let probe = Probe::new();
    let e: skein_core::Executor<i32> = probe.failing("x");
    let fixture = TestScope::new();
    let first = fixture.resolve_err(&e).await;
    let second = fixture.resolve_err(&e).await;
    assert_eq!(first.code(), ErrorCode::FactoryThrewError);
    assert_eq!(second.code(), ErrorCode::FactoryThrewError);
    probe.assert_runs(1);
    assert_eq!(
        fixture.recording.error_codes(),
        vec![
            "FACTORY_THREW_ERROR".to_string(),
            "FACTORY_THREW_ERROR".to_string()
        ]
    );
}

#[tokio::test]
async fn pod_reuses_the_scope_cache() {
    let probe = Probe::new();
    let e = probe.executor(1);
    let fixture = TestScope::new();
    fixture.resolve_ok(&e).await;
    let pod = fixture.scope.create_pod();
    assert_eq!(pod.resolve(&e).await.unwrap(), 1);
    probe.assert_runs(1);
}

#[tokio::test]
async fn pod_preset_and_scope_value_coexist() {
    let e = provide(|_ctl| async { Ok(1) });
    let fixture = TestScope::new();
    fixture.resolve_ok(&e).await;
    let pod = fixture
        .scope
        .pod_builder()
        .with_preset(preset(&e, 42))
        .build();
    assert_eq!(pod.resolve(&e).await.unwrap(), 42);
    assert_eq!(fixture.resolve_ok(&e).await, 1);
}

#[tokio::test]
async fn recording_extension_sees_nested_resolutions() {
    let inner = provide(|_ctl| async { Ok(2) }).with_name("inner");
    let outer = derive(inner.clone(), |v, _ctl| async move { Ok(v * 2) }).with_name("outer");
    let fixture = TestScope::new();
    assert_eq!(fixture.resolve_ok(&outer).await, 4);
    // Dependencies complete before their dependents.
    assert_eq!(
        fixture.recording.resolved_names(),
        vec!["inner".to_string(), "outer".to_string()]
    );
    fixture
        .recording
        .assert_contains(&RecordedEvent::ResolveStart("outer".to_string()));
}

#[tokio::test]
async fn release_and_dispose_run_probe_cleanups() {
    let probe = Probe::new();
    let a = probe.executor("a");
    let b = probe.executor("b");
    let scope = Scope::new();
    scope.resolve(&a).await.unwrap();
    scope.resolve(&b).await.unwrap();
    scope.release(&a, ReleaseMode::Hard).unwrap();
    probe.assert_cleanups(1);
    scope.dispose();
    probe.assert_cleanups(2);
}

#[tokio::test]
async fn soft_release_resets_state_without_dropping_the_cell() {
    let probe = Probe::new();
    let e = probe.executor(7);
    let fixture = TestScope::new();
    fixture.resolve_ok(&e).await;
    fixture.assert_state(&e, ResolutionState::Resolved);
    fixture.scope.release(&e, ReleaseMode::Soft).unwrap();
    fixture.assert_state(&e, ResolutionState::Absent);
    assert_eq!(fixture.resolve_ok(&e).await, 7);
    probe.assert_runs(2);
}
