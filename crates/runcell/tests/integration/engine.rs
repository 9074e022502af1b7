use std::path::Path;
use std::time::{Duration, Instant};

use runcell::config::Config;
use runcell::{Engine, ExecutionRequest, ExecutionResult, Phase, RequestError};

use super::shell_config;

fn engine(root: &Path) -> Engine {
    Engine::new(shell_config(root))
}

fn remaining_workspaces(root: &Path) -> usize {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_interpreted_success() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());

    let result = engine
        .execute(ExecutionRequest::new("sh", "echo hello"))
        .await
        .unwrap();

    assert_eq!(
        result,
        ExecutionResult::Success {
            stdout: "hello".to_owned(),
            truncated: false,
        }
    );
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_stdin_is_delivered() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());

    let request =
        ExecutionRequest::new("sh", "read a b\necho $((a + b))").with_stdin("1 2\n");
    let result = engine.execute(request).await.unwrap();

    assert_eq!(
        result,
        ExecutionResult::Success {
            stdout: "3".to_owned(),
            truncated: false,
        }
    );
}

#[tokio::test]
async fn test_runtime_failure_reports_stderr_and_code() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());

    let result = engine
        .execute(ExecutionRequest::new("sh", "echo partial\necho boom >&2\nexit 3"))
        .await
        .unwrap();

    assert_eq!(
        result,
        ExecutionResult::RuntimeFailure {
            diagnostics: "boom\n".to_owned(),
            exit_code: Some(3),
            signal: None,
            truncated: false,
        }
    );
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_compiled_success() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());

    let result = engine
        .execute(ExecutionRequest::new("shc", "echo compiled"))
        .await
        .unwrap();

    assert_eq!(
        result,
        ExecutionResult::Success {
            stdout: "compiled".to_owned(),
            truncated: false,
        }
    );
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_compile_failure_skips_run() {
    let root = tempfile::tempdir().unwrap();
    let marker = root.path().join("ran");

    let mut config = shell_config(&root.path().join("workspaces"));
    let mut checked = config.languages["shc"].clone();
    checked.run.command = vec!["touch".to_owned(), marker.display().to_string()];
    config.languages.insert("checked".to_owned(), checked);
    let engine = Engine::new(config);

    let result = engine
        .execute(ExecutionRequest::new("checked", "if then fi ("))
        .await
        .unwrap();

    match result {
        ExecutionResult::CompileFailure { diagnostics } => {
            assert!(!diagnostics.trim().is_empty());
        }
        other => panic!("expected compile failure, got {other:?}"),
    }
    assert!(!marker.exists(), "run phase must not start");
    assert_eq!(remaining_workspaces(&root.path().join("workspaces")), 0);

    // The same language does reach the run phase once it compiles
    let result = engine
        .execute(ExecutionRequest::new("checked", "echo fine"))
        .await
        .unwrap();
    assert!(result.is_success());
    assert!(marker.exists());
}

#[tokio::test]
async fn test_compile_timeout() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());

    let started = Instant::now();
    let result = engine
        .execute(ExecutionRequest::new("slowc", "echo never"))
        .await
        .unwrap();

    assert_eq!(
        result,
        ExecutionResult::Timeout {
            phase: Phase::Compile,
        }
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_run_timeout() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());

    let started = Instant::now();
    let result = engine
        .execute(ExecutionRequest::new("sh", "while :; do :; done"))
        .await
        .unwrap();

    assert_eq!(result, ExecutionResult::Timeout { phase: Phase::Run });
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_run_timeout_kills_background_processes() {
    let root = tempfile::tempdir().unwrap();
    let pid_file = root.path().join("helper.pid");
    let engine = engine(&root.path().join("workspaces"));

    let source = format!(
        "sleep 60 &\necho $! > '{}'\nwhile :; do :; done",
        pid_file.display()
    );
    let result = engine
        .execute(ExecutionRequest::new("sh", source))
        .await
        .unwrap();
    assert_eq!(result, ExecutionResult::Timeout { phase: Phase::Run });

    assert_helper_exits(&pid_file).await;
}

/// Wait until the process whose pid is stored in `pid_file` is gone
#[cfg(target_os = "linux")]
async fn assert_helper_exits(pid_file: &Path) {
    let pid = std::fs::read_to_string(pid_file).unwrap();
    let stat = format!("/proc/{}/stat", pid.trim());

    // The orphaned helper is reparented and reaped shortly after the kill
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let alive = match std::fs::read_to_string(&stat) {
            Ok(content) => !content.contains(") Z "),
            Err(_) => false,
        };
        if !alive {
            break;
        }
        assert!(Instant::now() < deadline, "helper process still running");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dropped_request_kills_background_processes() {
    let root = tempfile::tempdir().unwrap();
    let pid_file = root.path().join("helper.pid");
    let workspaces = root.path().join("workspaces");
    let engine = engine(&workspaces);

    let source = format!(
        "sleep 60 &\necho $! > '{}'\nwhile :; do :; done",
        pid_file.display()
    );
    let request = engine.execute(ExecutionRequest::new("sh", source));
    let abandoned = tokio::time::timeout(Duration::from_millis(400), request).await;
    assert!(abandoned.is_err(), "request should still be running");

    assert_helper_exits(&pid_file).await;
    assert_eq!(remaining_workspaces(&workspaces), 0);
    assert_eq!(engine.available_slots(), 4);
}

/// Whether util-linux `setsid` is on the execution PATH
#[cfg(target_os = "linux")]
fn has_setsid(engine: &Engine) -> bool {
    let found = engine
        .config()
        .path
        .split(':')
        .any(|dir| Path::new(dir).join("setsid").is_file());
    if !found {
        eprintln!("skipping: setsid not installed");
    }
    found
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_escaped_descendant_does_not_mask_exit_status() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());
    if !has_setsid(&engine) {
        return;
    }

    // The detached sleep leaves the process group and keeps the pipes open
    let result = engine
        .execute(ExecutionRequest::new(
            "sh",
            "echo out\necho oops >&2\nsetsid -f sleep 3\nexit 2",
        ))
        .await
        .unwrap();
    assert_eq!(
        result,
        ExecutionResult::RuntimeFailure {
            diagnostics: "oops\n".to_owned(),
            exit_code: Some(2),
            signal: None,
            truncated: false,
        }
    );

    let result = engine
        .execute(ExecutionRequest::new(
            "sh",
            "echo hello\nsetsid -f sleep 3\nexit 0",
        ))
        .await
        .unwrap();
    assert_eq!(
        result,
        ExecutionResult::Success {
            stdout: "hello".to_owned(),
            truncated: false,
        }
    );
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_flooding_stdout_is_truncated() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());
    let limit = engine.config().limits.output_limit;

    let result = engine
        .execute(ExecutionRequest::new("sh", "yes"))
        .await
        .unwrap();

    match result {
        ExecutionResult::Success { stdout, truncated } => {
            assert!(truncated);
            assert!(stdout.len() <= limit);
            assert!(stdout.starts_with("y\ny\n"));
        }
        other => panic!("expected truncated success, got {other:?}"),
    }
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_rejections_create_no_workspace() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());

    let err = engine
        .execute(ExecutionRequest::new("cobol", "DISPLAY 'HI'."))
        .await
        .unwrap_err();
    assert_eq!(err, RequestError::UnsupportedLanguage("cobol".to_owned()));

    let err = engine
        .execute(ExecutionRequest::new("sh", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::InvalidRequest(_)));

    let oversized = "#".repeat(engine.config().limits.max_source_bytes + 1);
    let err = engine
        .execute(ExecutionRequest::new("sh", oversized))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::InvalidRequest(_)));

    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_missing_program_is_engine_error() {
    let root = tempfile::tempdir().unwrap();
    let mut config = shell_config(root.path());
    let mut broken = config.languages["sh"].clone();
    broken.run.command = vec!["runcell-no-such-interpreter".to_owned(), "{source}".to_owned()];
    config.languages.insert("broken".to_owned(), broken);
    let engine = Engine::new(config);

    let result = engine
        .execute(ExecutionRequest::new("broken", "echo hi"))
        .await
        .unwrap();

    assert!(matches!(result, ExecutionResult::EngineError { .. }));
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_requests_are_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());
    let request = ExecutionRequest::new("sh", "echo $((6 * 7))\nls");

    let first = engine.execute(request.clone()).await.unwrap();
    let second = engine.execute(request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        first,
        ExecutionResult::Success {
            stdout: "42\nmain.sh".to_owned(),
            truncated: false,
        }
    );
}

#[tokio::test]
async fn test_concurrent_executions_are_isolated() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine(root.path());

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let engine = engine.clone();
            let source = format!("echo {n} > own.txt\nsleep 0.1\ncat own.txt\nls");
            tokio::spawn(async move { engine.execute(ExecutionRequest::new("sh", source)).await })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(
            result,
            ExecutionResult::Success {
                stdout: format!("{n}\nmain.sh\nown.txt"),
                truncated: false,
            }
        );
    }
    assert_eq!(remaining_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_admission_limit_serializes_executions() {
    let root = tempfile::tempdir().unwrap();
    let config = Config {
        max_concurrent: 1,
        ..shell_config(root.path())
    };
    let engine = Engine::new(config);

    let started = Instant::now();
    let (first, second) = tokio::join!(
        engine.execute(ExecutionRequest::new("sh", "sleep 0.3")),
        engine.execute(ExecutionRequest::new("sh", "sleep 0.3")),
    );

    assert!(first.unwrap().is_success());
    assert!(second.unwrap().is_success());
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(engine.available_slots(), 1);
}
