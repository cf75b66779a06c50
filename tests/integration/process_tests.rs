//! Integration tests against real child processes.
//!
//! The tool server is played by small `/bin/sh` scripts.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use job_coach::chat::{ChatOrchestrator, ChatRequest};
use job_coach::completion::ChatMessage;
use job_coach::tools::process::{ProcessConfig, ToolProcess};
use job_coach::tools::session::{ProcessLauncher, SessionLauncher};
use job_coach::tools::{SessionManager, SessionPhase};
use job_coach::ToolErrorKind;

use super::test_helpers::{fast_options, FakeCompletion, SYSTEM_PROMPT};

const SH_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"sh-jobs","version":"0.0.1"}}}'
      ;;
    *'"method":"tools/call"'*)
      id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"structuredContent":[{"title":"Shell Engineer"}],"isError":false}}\n' "$id"
      ;;
  esac
done
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn sh(script: PathBuf) -> ProcessConfig {
    ProcessConfig {
        command: "/bin/sh".into(),
        script,
        working_dir: None,
    }
}

fn launcher(config: ProcessConfig) -> ProcessLauncher {
    ProcessLauncher::new(config, Duration::from_secs(5), Duration::from_millis(500))
}

#[tokio::test]
async fn missing_script_is_process_start_failure() {
    let dir = tempfile::tempdir().unwrap();

    let err = launcher(sh(dir.path().join("absent.sh")))
        .launch()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ToolErrorKind::ProcessStartFailed);
    assert!(err.message().contains("absent.sh"));
}

#[tokio::test]
async fn missing_interpreter_is_process_start_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "server.sh", SH_SERVER);

    let err = launcher(ProcessConfig {
        command: "/nonexistent/interpreter".into(),
        script,
        working_dir: None,
    })
    .launch()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ToolErrorKind::ProcessStartFailed);
}

#[tokio::test]
async fn child_exiting_at_start_is_transport_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "crash.sh", "echo 'boom' >&2\nexit 3\n");

    let err = launcher(sh(script)).launch().await.unwrap_err();

    assert_eq!(err.kind(), ToolErrorKind::TransportFailure);
}

#[tokio::test]
async fn chat_degrades_when_the_tool_server_exits_at_start() {
    let dir = tempfile::tempdir().unwrap();
    let starts = dir.path().join("starts");
    let script = write_script(
        dir.path(),
        "crash.sh",
        &format!("echo started >> '{}'\necho 'boom' >&2\nexit 3\n", starts.display()),
    );
    let tools = Arc::new(SessionManager::new(launcher(sh(script)), fast_options()));
    let completion = Arc::new(FakeCompletion::replying("Here is some general advice."));
    let orchestrator = ChatOrchestrator::new(
        Arc::clone(&tools),
        Arc::<FakeCompletion>::clone(&completion),
        SYSTEM_PROMPT.to_owned(),
        8,
    );

    let reply = orchestrator
        .chat(&ChatRequest {
            messages: vec![ChatMessage::user("Any openings?")],
            attach_jobs: true,
            job_query: Some("engineer".into()),
            location: Some("remote".into()),
            resume_text: None,
        })
        .await
        .unwrap();

    assert_eq!(reply.reply, "Here is some general advice.");
    assert!(reply.jobs.is_none());
    let note = &completion.last_messages()[2];
    assert_eq!(note.role, "system");
    assert!(note
        .content
        .starts_with("Context: jobs unavailable (transport-failure: "));
    assert!(note.content.ends_with("). Continue without."));
    assert_eq!(tools.phase(), SessionPhase::Uninitialized);

    let spawned = std::fs::read_to_string(&starts).unwrap();
    assert_eq!(spawned.lines().count(), 1);
}

#[tokio::test]
async fn relative_script_resolves_against_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "server.sh", SH_SERVER);

    let session = launcher(ProcessConfig {
        command: "/bin/sh".into(),
        script: PathBuf::from("server.sh"),
        working_dir: Some(dir.path().to_path_buf()),
    })
    .launch()
    .await
    .unwrap();

    assert_eq!(session.token().server_name.as_deref(), Some("sh-jobs"));
}

#[tokio::test]
async fn full_session_against_a_real_process() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "server.sh", SH_SERVER);
    let manager = SessionManager::new(launcher(sh(script)), fast_options());

    let first = manager
        .invoke("search_jobs", json!({ "q": "shell", "location": "", "limit": 3 }))
        .await
        .unwrap();
    let second = manager
        .invoke("search_jobs", json!({ "q": "again" }))
        .await
        .unwrap();

    assert_eq!(first.structured, Some(json!([{ "title": "Shell Engineer" }])));
    assert_eq!(second.structured, first.structured);

    let started = Instant::now();
    manager.close().await;
    assert_eq!(manager.phase(), SessionPhase::Closed);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "server exits on stdin EOF without waiting for signals"
    );
}

#[tokio::test]
async fn unresponsive_child_is_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "stubborn.sh",
        "trap '' TERM\nwhile :; do sleep 1; done\n",
    );

    let (process, stdout, stdin) = ToolProcess::spawn(&sh(script)).unwrap();
    assert!(process.pid().is_some());
    drop(stdin);
    drop(stdout);

    let started = Instant::now();
    process.terminate(Duration::from_millis(400)).await;

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "terminate must escalate to kill"
    );
}
