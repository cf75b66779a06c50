//! Integration tests for the session lifecycle: lazy connect, single-flight,
//! teardown on failure, and close semantics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use job_coach::tools::{SessionManager, SessionOptions, SessionPhase};
use job_coach::ToolErrorKind;

use super::test_helpers::{
    fast_options, jobs_handler, sample_jobs, structured_result, FakeLauncher, Handler, Reply,
};

fn search_args() -> Value {
    json!({ "q": "rust", "location": "Remote", "limit": 8 })
}

/// Silent on the first `n` calls, then answers with the sample jobs.
fn silent_first(n: usize) -> Handler {
    let seen = Arc::new(AtomicUsize::new(0));
    Arc::new(move |_: u64, _: &Value| {
        if seen.fetch_add(1, Ordering::SeqCst) < n {
            Reply::Silent
        } else {
            Reply::Result(structured_result(&sample_jobs()))
        }
    })
}

// ── Lazy connect ────────────────────────────────────────────────────────────

#[tokio::test]
async fn manager_starts_uninitialized_and_connects_on_first_use() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs()));
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    assert_eq!(manager.phase(), SessionPhase::Uninitialized);
    manager.start_session().await.unwrap();
    assert_eq!(launches.load(Ordering::SeqCst), 0, "lazy start must not spawn");

    let result = manager.invoke("search_jobs", search_args()).await.unwrap();

    assert_eq!(result.structured, Some(sample_jobs()));
    assert_eq!(manager.phase(), SessionPhase::Ready);
    assert_eq!(launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn eager_start_connects_immediately() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs()));
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(
        launcher,
        SessionOptions {
            eager_connect: true,
            ..fast_options()
        },
    );

    manager.start_session().await.unwrap();

    assert_eq!(manager.phase(), SessionPhase::Ready);
    assert_eq!(launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_is_reused_across_calls() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs()));
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    for _ in 0..3 {
        manager.invoke("search_jobs", search_args()).await.unwrap();
    }

    assert_eq!(launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_first_calls_share_one_connect() {
    let launcher =
        FakeLauncher::new(jobs_handler(sample_jobs())).with_delay(Duration::from_millis(100));
    let launches = Arc::clone(&launcher.launches);
    let manager = Arc::new(SessionManager::new(launcher, fast_options()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.invoke("search_jobs", search_args()).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().expect("every concurrent call succeeds");
    }

    assert_eq!(launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn phase_changes_are_observable() {
    let launcher =
        FakeLauncher::new(jobs_handler(sample_jobs())).with_delay(Duration::from_millis(100));
    let manager = Arc::new(SessionManager::new(launcher, fast_options()));
    let mut phases = manager.subscribe();

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.invoke("search_jobs", search_args()).await })
    };

    phases
        .wait_for(|p| *p == SessionPhase::Connecting)
        .await
        .unwrap();
    caller.await.unwrap().unwrap();
    assert_eq!(*phases.borrow_and_update(), SessionPhase::Ready);
}

// ── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_connect_is_retried_on_next_call() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs())).failing_first(1);
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    let err = manager
        .invoke("search_jobs", search_args())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::HandshakeFailed);
    assert_eq!(manager.phase(), SessionPhase::Uninitialized);

    manager.invoke("search_jobs", search_args()).await.unwrap();
    assert_eq!(manager.phase(), SessionPhase::Ready);
    assert_eq!(launches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn timeout_tears_down_and_next_call_reconnects() {
    let launcher = FakeLauncher::new(silent_first(1));
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    let err = manager
        .invoke("search_jobs", search_args())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::Timeout);
    assert_eq!(manager.phase(), SessionPhase::Uninitialized);

    let result = manager.invoke("search_jobs", search_args()).await.unwrap();
    assert_eq!(result.structured, Some(sample_jobs()));
    assert_eq!(launches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transport_failure_tears_down() {
    let launcher = FakeLauncher::new(Arc::new(|_: u64, _: &Value| Reply::Close));
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    let err = manager
        .invoke("search_jobs", search_args())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::TransportFailure);
    assert_eq!(manager.phase(), SessionPhase::Uninitialized);

    let _ = manager.invoke("search_jobs", search_args()).await;
    assert_eq!(launches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn tool_reported_failure_keeps_the_session() {
    let handler: Handler = Arc::new(|_: u64, _: &Value| {
        Reply::Result(json!({
            "content": [{ "type": "text", "text": "rate limited" }],
            "isError": true
        }))
    });
    let launcher = FakeLauncher::new(handler);
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    for _ in 0..2 {
        let err = manager
            .invoke("search_jobs", search_args())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::ToolReportedFailure);
    }

    assert_eq!(manager.phase(), SessionPhase::Ready);
    assert_eq!(launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_call_is_rejected_before_connecting() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs()));
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    let err = manager
        .invoke("search_jobs", json!({ "q": "" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::InvalidCall);

    let err = manager.invoke("", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::InvalidCall);

    assert_eq!(launches.load(Ordering::SeqCst), 0);
    assert_eq!(manager.phase(), SessionPhase::Uninitialized);
}

#[tokio::test]
async fn abandoned_call_forces_a_fresh_session() {
    let launcher = FakeLauncher::new(silent_first(1));
    let launches = Arc::clone(&launcher.launches);
    let manager = Arc::new(SessionManager::new(
        launcher,
        SessionOptions {
            call_timeout: Duration::from_secs(30),
            ..fast_options()
        },
    ));

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.invoke("search_jobs", search_args()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    caller.abort();
    let _ = caller.await;

    let result = manager.invoke("search_jobs", search_args()).await.unwrap();
    assert_eq!(result.structured, Some(sample_jobs()));
    assert_eq!(launches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn abandoned_connect_returns_to_uninitialized() {
    let launcher =
        FakeLauncher::new(jobs_handler(sample_jobs())).with_delay(Duration::from_secs(30));
    let manager = Arc::new(SessionManager::new(launcher, fast_options()));
    let mut phases = manager.subscribe();

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.invoke("search_jobs", search_args()).await })
    };
    tokio::time::timeout(
        Duration::from_secs(5),
        phases.wait_for(|phase| *phase == SessionPhase::Connecting),
    )
    .await
    .expect("connect starts")
    .unwrap();

    caller.abort();
    let _ = caller.await;

    assert_eq!(manager.phase(), SessionPhase::Uninitialized);
    assert_eq!(*phases.borrow_and_update(), SessionPhase::Uninitialized);
}

// ── Close ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_before_use_is_safe_and_idempotent() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs()));
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    manager.close().await;
    manager.close().await;

    assert_eq!(manager.phase(), SessionPhase::Closed);
    assert_eq!(launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn double_close_from_ready_releases_the_session_once() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs()));
    let launches = Arc::clone(&launcher.launches);
    let disconnects = Arc::clone(&launcher.disconnects);
    let manager = SessionManager::new(launcher, fast_options());

    manager.invoke("search_jobs", search_args()).await.unwrap();
    assert_eq!(manager.phase(), SessionPhase::Ready);

    manager.close().await;
    manager.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(manager.phase(), SessionPhase::Closed);
    assert_eq!(launches.load(Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn calls_after_close_fail_with_session_closed() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs()));
    let launches = Arc::clone(&launcher.launches);
    let manager = SessionManager::new(launcher, fast_options());

    manager.invoke("search_jobs", search_args()).await.unwrap();
    manager.stop_session().await;

    let err = manager
        .invoke("search_jobs", search_args())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::SessionClosed);
    assert_eq!(manager.phase(), SessionPhase::Closed);
    assert_eq!(launches.load(Ordering::SeqCst), 1, "closed manager never reconnects");

    let started = manager.start_session().await;
    assert!(started.is_ok(), "lazy start is a no-op even after close");
}

#[tokio::test]
async fn eager_start_after_close_fails() {
    let launcher = FakeLauncher::new(jobs_handler(sample_jobs()));
    let manager = SessionManager::new(
        launcher,
        SessionOptions {
            eager_connect: true,
            ..fast_options()
        },
    );

    manager.close().await;

    let err = manager.start_session().await.unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::SessionClosed);
}

#[tokio::test]
async fn close_during_connect_aborts_the_attempt() {
    let launcher =
        FakeLauncher::new(jobs_handler(sample_jobs())).with_delay(Duration::from_secs(30));
    let manager = Arc::new(SessionManager::new(launcher, fast_options()));
    let mut phases = manager.subscribe();

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.invoke("search_jobs", search_args()).await })
    };
    phases
        .wait_for(|p| *p == SessionPhase::Connecting)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), manager.close())
        .await
        .expect("close must not wait for the connect");

    let err = tokio::time::timeout(Duration::from_secs(5), caller)
        .await
        .expect("caller must be released")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::SessionClosed);
    assert_eq!(manager.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn close_during_call_aborts_the_call() {
    let handler: Handler = Arc::new(|_: u64, _: &Value| Reply::Silent);
    let launcher = FakeLauncher::new(handler);
    let manager = Arc::new(SessionManager::new(
        launcher,
        SessionOptions {
            call_timeout: Duration::from_secs(30),
            ..fast_options()
        },
    ));
    let mut phases = manager.subscribe();

    let caller = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.invoke("search_jobs", search_args()).await })
    };
    phases.wait_for(|p| *p == SessionPhase::Ready).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), manager.close())
        .await
        .expect("close must not wait for the call timeout");

    let err = caller.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::SessionClosed);
    assert_eq!(manager.phase(), SessionPhase::Closed);
}
