//! Whole-task runs against stand-in server, browser and runner processes.
//!
//! Every child is a `/bin/sh -c` script; the argument list the harness
//! appends lands in `$0`, `$1`, ... of the script.

#![cfg(unix)]

use axum::{routing::get, Router};
use jstd_common::{AttemptPhase, CommandSpec, TaskMode, TaskOptions};
use jstd_harness::{Console, Task, TaskOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HEARTBEAT: &str = r#"echo '{"event":"onResourceReceived","url":"http://localhost/heartbeat","status":200}'; exec sleep 30"#;

const PASSING: &str = "echo 'Total 3 tests (Passed: 3; Fails: 0; Errors: 0) (5.00 ms)'";

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("/bin/sh", &["-c", script])
}

fn options(runner: &str) -> TaskOptions {
    TaskOptions {
        server: sh("exec sleep 30"),
        browser: sh(HEARTBEAT),
        runner: sh(runner),
        ..Default::default()
    }
}

fn files(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

fn task(mode: TaskMode, options: TaskOptions, files: Vec<PathBuf>) -> Arc<Task> {
    Task::new("jstd", mode, options, files, Console::default()).unwrap()
}

/// A stand-in for the JsTestDriver HTTP root
async fn fake_server() -> u16 {
    let app = Router::new().route("/", get(|| async { "jstd" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn marker(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn lines(path: &Path) -> usize {
    std::fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
}

#[tokio::test]
async fn full_mode_passes() {
    let port = fake_server().await;
    let task = task(
        TaskMode::Full,
        TaskOptions {
            port: Some(port),
            ..options(PASSING)
        },
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task.clone()).run().await.unwrap();

    assert!(outcome.success(), "{:?}", outcome);
    assert_eq!(outcome.passed, 3);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.files[0].phase, AttemptPhase::Reported);
    assert!(task.is_cleaned_up());
    assert!(task.processes().is_empty());
}

#[tokio::test]
async fn run_mode_sums_every_file() {
    let runner = r#"case "$1" in
        *a.conf) echo 'Total 4 tests (Passed: 3; Fails: 1; Errors: 0)'; echo 'Error: expected 1 but was 2' ;;
        *) echo 'Total 2 tests (Passed: 2; Fails: 0; Errors: 0)' ;;
    esac"#;
    let task = task(TaskMode::Run, options(runner), files(&["a.conf", "b.conf"]));

    let outcome = TaskOrchestrator::new(task).run().await.unwrap();

    assert_eq!(outcome.passed, 5);
    assert_eq!(outcome.failed, 1);
    assert!(outcome.has_failure);
    assert!(!outcome.success());

    let failing: Vec<_> = outcome.files.iter().filter(|f| f.failing).collect();
    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0].file, Some(PathBuf::from("a.conf")));
}

#[tokio::test]
async fn failed_count_fails_the_task_without_marker() {
    let task = task(
        TaskMode::Run,
        options("echo 'Total 5 tests (Passed: 3; Fails: 2; Errors: 0) (5.00 ms)'"),
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task).run().await.unwrap();

    assert_eq!(outcome.passed, 3);
    assert_eq!(outcome.failed, 2);
    assert!(outcome.has_failure);
    assert!(!outcome.success());
    assert_eq!(outcome.files[0].phase, AttemptPhase::Reported);
    assert!(outcome.files[0].failing);
}

#[tokio::test]
async fn runtime_exception_counts_as_zero() {
    let task = task(
        TaskMode::Run,
        options("echo 'java.lang.RuntimeException: no browsers captured'"),
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task).run().await.unwrap();

    assert_eq!(outcome.passed, 0);
    assert_eq!(outcome.failed, 0);
    assert!(outcome.success());
}

#[tokio::test]
async fn summary_without_counters_still_succeeds() {
    let task = task(
        TaskMode::Run,
        options("echo '.,.,. Tests; Fails: 0; Errors: 0. No errors'"),
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task).run().await.unwrap();

    assert!(outcome.success(), "{:?}", outcome);
    assert_eq!(outcome.files[0].phase, AttemptPhase::Reported);
}

#[tokio::test]
async fn runner_without_report_is_fatal() {
    let task = task(
        TaskMode::Run,
        options("echo 'Could not connect'; exit 1"),
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task).run().await.unwrap();

    assert!(!outcome.success());
    assert_eq!(outcome.files[0].phase, AttemptPhase::Fatal);
    assert_eq!(outcome.files[0].attempts, 1);
}

#[tokio::test]
async fn server_exit_stops_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let browser = format!("touch {}; exec sleep 30", marker(&dir, "browser").display());
    let runner = format!("touch {}", marker(&dir, "runner").display());
    let task = task(
        TaskMode::Full,
        TaskOptions {
            port: Some(free_port()),
            server: sh("exit 1"),
            browser: sh(&browser),
            runner: sh(&runner),
            ..Default::default()
        },
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task.clone()).run().await.unwrap();

    assert!(!outcome.success());
    let file = &outcome.files[0];
    assert_eq!(file.phase, AttemptPhase::Fatal);
    assert!(
        file.reason.as_deref().unwrap_or_default().contains("failed to start server"),
        "{:?}",
        file.reason
    );
    assert!(!marker(&dir, "browser").exists());
    assert!(!marker(&dir, "runner").exists());
    assert!(task.processes().is_empty());
}

#[tokio::test]
async fn browser_capture_404_is_fatal() {
    let port = fake_server().await;
    let browser = r#"echo '{"event":"onResourceReceived","url":"http://localhost/capture","status":404}'; exec sleep 30"#;
    let task = task(
        TaskMode::Full,
        TaskOptions {
            port: Some(port),
            browser: sh(browser),
            ..options(PASSING)
        },
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task.clone()).run().await.unwrap();

    assert!(!outcome.success());
    assert!(outcome.files[0]
        .reason
        .as_deref()
        .unwrap_or_default()
        .contains("server did not respond"));
    assert!(task.processes().is_empty());
}

#[tokio::test]
async fn timeouts_exhaust_the_retry_budget() {
    let dir = tempfile::tempdir().unwrap();
    let count = marker(&dir, "count");
    let runner = format!("echo run >> {}; exec sleep 30", count.display());
    let task = task(
        TaskMode::Run,
        TaskOptions {
            timeout_ms: 300,
            retries: 2,
            ..options(&runner)
        },
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task.clone()).run().await.unwrap();

    assert!(!outcome.success());
    assert_eq!(outcome.files.len(), 1);
    assert_eq!(outcome.files[0].phase, AttemptPhase::Fatal);
    assert_eq!(outcome.files[0].attempts, 2);
    assert_eq!(lines(&count), 2);
    assert!(task.processes().is_empty());
}

#[tokio::test]
async fn retry_after_timeout_can_pass() {
    let dir = tempfile::tempdir().unwrap();
    let once = marker(&dir, "once");
    let runner = format!(
        "if [ -f {0} ]; then {1}; else touch {0}; exec sleep 30; fi",
        once.display(),
        PASSING
    );
    let task = task(
        TaskMode::Run,
        TaskOptions {
            timeout_ms: 500,
            retries: 2,
            ..options(&runner)
        },
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task).run().await.unwrap();

    assert!(outcome.success(), "{:?}", outcome);
    assert_eq!(outcome.passed, 3);
    assert_eq!(outcome.files[0].attempts, 2);
}

#[tokio::test]
async fn full_mode_retry_respawns_server_and_browser() {
    let port = fake_server().await;
    let dir = tempfile::tempdir().unwrap();
    let servers = marker(&dir, "servers");
    let browsers = marker(&dir, "browsers");
    let once = marker(&dir, "once");
    let server = format!("echo s >> {}; exec sleep 30", servers.display());
    let browser = format!(
        r#"echo b >> {}; echo '{{"event":"onResourceReceived","url":"http://localhost/heartbeat","status":200}}'; exec sleep 30"#,
        browsers.display()
    );
    let runner = format!(
        "if [ -f {0} ]; then {1}; else touch {0}; exec sleep 30; fi",
        once.display(),
        PASSING
    );
    let task = task(
        TaskMode::Full,
        TaskOptions {
            port: Some(port),
            timeout_ms: 800,
            retries: 2,
            server: sh(&server),
            browser: sh(&browser),
            runner: sh(&runner),
            ..Default::default()
        },
        files(&["a.conf"]),
    );

    let outcome = TaskOrchestrator::new(task.clone()).run().await.unwrap();

    assert!(outcome.success(), "{:?}", outcome);
    assert_eq!(outcome.files[0].attempts, 2);
    assert_eq!(lines(&servers), 2);
    assert_eq!(lines(&browsers), 2);
    assert!(task.processes().is_empty());
}

#[tokio::test]
async fn server_mode_holds_until_shutdown() {
    let port = fake_server().await;
    let task = task(
        TaskMode::Server,
        TaskOptions {
            port: Some(port),
            ..options(PASSING)
        },
        vec![],
    );

    let outcome = TaskOrchestrator::new(task.clone())
        .run_until(tokio::time::sleep(Duration::from_millis(500)))
        .await
        .unwrap();

    assert!(!outcome.cancelled);
    assert!(outcome.success());
    assert_eq!(outcome.files[0].phase, AttemptPhase::Reported);
    assert!(task.processes().is_empty());
}

#[tokio::test]
async fn server_mode_fails_when_the_server_dies() {
    let port = fake_server().await;
    let task = task(
        TaskMode::Server,
        TaskOptions {
            port: Some(port),
            server: sh("sleep 1; exit 3"),
            ..options(PASSING)
        },
        vec![],
    );

    let run = TaskOrchestrator::new(task.clone())
        .run_until(tokio::time::sleep(Duration::from_secs(30)));
    let outcome = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("server mode kept holding after the server exited")
        .unwrap();

    assert!(!outcome.cancelled);
    assert!(!outcome.success());
    assert!(outcome.has_failure);
    assert!(task.processes().is_empty());
}

#[tokio::test]
async fn interrupt_cancels_and_cleans_up() {
    let task = task(TaskMode::Run, options("exec sleep 30"), files(&["a.conf"]));

    let outcome = TaskOrchestrator::new(task.clone())
        .run_until(tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert!(!outcome.success());
    assert!(task.is_cleaned_up());
    assert!(task.processes().is_empty());
}

#[tokio::test]
async fn results_are_written_to_test_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("reports");
    let task = task(
        TaskMode::Run,
        TaskOptions {
            test_output: Some(output.clone()),
            ..options(PASSING)
        },
        files(&["a.conf"]),
    );

    TaskOrchestrator::new(task).run().await.unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output.join("jstd-results.json")).unwrap())
            .unwrap();
    assert_eq!(written["passed"], 3);
    assert_eq!(written["mode"], "run");
}
