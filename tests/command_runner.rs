//! Exercises the process-backed runner against throwaway shell scripts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use fmount::system::{CommandError, CommandRunner, Runner};
use tempfile::{TempDir, tempdir};

fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    path
}

fn sh(runner: &CommandRunner, script: &Path, args: &[&str]) -> Result<fmount::system::Output, CommandError> {
    let script = script.to_string_lossy();
    let mut argv = vec![script.as_ref()];
    argv.extend_from_slice(args);
    runner.run("sh", &argv)
}

#[test]
fn captures_output_and_status() {
    let dir = tempdir().unwrap();
    let tool = script(&dir, "echo.sh", "echo \"out:$1\"; echo err >&2; exit 3");

    let out = sh(&CommandRunner::default(), &tool, &["x"]).unwrap();
    assert_eq!(out.stdout, "out:x\n");
    assert_eq!(out.stderr, "err\n");
    assert_eq!(out.status, 3);
}

#[test]
fn call_surfaces_nonzero_exit() {
    let dir = tempdir().unwrap();
    let tool = script(&dir, "fail.sh", "echo 'device busy' >&2; exit 32");
    let tool = tool.to_string_lossy();

    match CommandRunner::default().call("sh", &[tool.as_ref()]) {
        Err(CommandError::Failed {
            status, diagnostic, ..
        }) => {
            assert_eq!(status, 32);
            assert_eq!(diagnostic, "device busy");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn missing_tool_is_not_found() {
    let err = CommandRunner::default()
        .run("fmount-no-such-tool", &[])
        .unwrap_err();
    assert!(matches!(err, CommandError::NotFound(name) if name == "fmount-no-such-tool"));
}

#[test]
fn overrunning_tool_is_terminated() {
    let dir = tempdir().unwrap();
    let tool = script(&dir, "hang.sh", "sleep 30");
    let runner = CommandRunner::new(Duration::from_millis(200)).with_grace(Duration::from_millis(200));

    let start = Instant::now();
    let err = sh(&runner, &tool, &[]).unwrap_err();
    assert!(matches!(err, CommandError::TimedOut { .. }));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn tool_ignoring_sigterm_is_killed() {
    let dir = tempdir().unwrap();
    let tool = script(&dir, "stubborn.sh", "trap '' TERM\nwhile true; do sleep 1; done");
    let runner = CommandRunner::new(Duration::from_millis(200)).with_grace(Duration::from_millis(200));

    let start = Instant::now();
    let err = sh(&runner, &tool, &[]).unwrap_err();
    assert!(matches!(err, CommandError::TimedOut { .. }));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn cancelled_runner_starts_nothing() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("ran");
    let tool = script(&dir, "touch.sh", &format!("touch {}", marker.display()));
    let runner = CommandRunner::default().with_cancel(Arc::new(AtomicBool::new(true)));

    let err = sh(&runner, &tool, &[]).unwrap_err();
    assert!(matches!(err, CommandError::Cancelled(_)));
    assert!(!marker.exists());
}
