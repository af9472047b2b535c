//! External command execution with per-unit log capture.
//!
//! Child stdout and stderr share one pipe write end, so the tee loop sees
//! the streams interleaved exactly as the child produced them. Every line
//! goes both to the controlling process's stdout (live visibility) and to
//! the unit's append-only log.

use crate::error::ExecutionError;
use crate::stage::CommandSpec;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, PipeReader, Write};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// Run one external command to completion.
///
/// The fully-resolved command line is appended to the log before
/// execution; every failure path appends a readable error line before
/// propagating. No retries, no interpretation of the output.
pub async fn run(
    spec: &CommandSpec,
    log_path: &Path,
    timeout: Duration,
) -> Result<(), ExecutionError> {
    let mut log = open_log(log_path)?;
    writeln!(log, "COMMAND: {}", spec.display_line()).map_err(unexpected)?;
    writeln!(log, "{}", "=".repeat(30)).map_err(unexpected)?;

    debug!(command = %spec.display_line(), log = %log_path.display(), "running command");

    let (reader, writer) = std::io::pipe().map_err(unexpected)?;

    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args).stdin(Stdio::null());

    let captured = match &spec.stdout_to {
        Some(path) => {
            // The tool's result goes to its artifact; only stderr is logged.
            let artifact = File::create(path).map_err(unexpected)?;
            cmd.stdout(artifact);
            cmd.stderr(writer);
            Some(path.clone())
        }
        None => {
            let writer2 = writer.try_clone().map_err(unexpected)?;
            cmd.stdout(writer);
            cmd.stderr(writer2);
            None
        }
    };

    let spawned = cmd.spawn();
    // Release the parent's copies of the pipe write end, otherwise the tee
    // loop never sees EOF.
    drop(cmd);

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            let err = if e.kind() == std::io::ErrorKind::NotFound {
                ExecutionError::ExecutableNotFound(spec.program.clone())
            } else {
                ExecutionError::Unexpected(e.to_string())
            };
            log_failure(&mut log, &err);
            return Err(err);
        }
    };

    let tee_log = log.try_clone().map_err(unexpected)?;
    let tee = tokio::task::spawn_blocking(move || tee_lines(reader, tee_log));

    let waited = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(e)) => Err(ExecutionError::Unexpected(e.to_string())),
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Err(ExecutionError::Timeout(timeout.as_secs()))
        }
    };

    let tee_outcome = tee.await;

    let result = waited
        .and_then(|status| {
            if status.success() {
                Ok(())
            } else {
                match status.code() {
                    Some(code) => Err(ExecutionError::NonZeroExit(code)),
                    None => Err(ExecutionError::Unexpected("terminated by signal".into())),
                }
            }
        })
        .and_then(|()| match tee_outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(unexpected(e)),
            Err(e) => Err(ExecutionError::Unexpected(e.to_string())),
        });

    if let Err(err) = &result {
        // A partial stdout capture must not satisfy the gate on a rerun.
        if let Some(path) = captured {
            let _ = std::fs::remove_file(path);
        }
        log_failure(&mut log, err);
    }

    result
}

fn open_log(path: &Path) -> Result<File, ExecutionError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(unexpected)
}

fn tee_lines(reader: PipeReader, mut log: File) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        {
            let mut out = stdout.lock();
            let _ = writeln!(out, "{line}");
        }
        writeln!(log, "{line}")?;
    }
    Ok(())
}

fn log_failure(log: &mut File, err: &ExecutionError) {
    let _ = writeln!(log, "[ERROR] {err}");
}

fn unexpected(e: std::io::Error) -> ExecutionError {
    ExecutionError::Unexpected(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_success_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("unit.log");

        run(&sh("echo hello"), &log, LONG).await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("COMMAND: sh -c echo hello"));
        assert!(contents.contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_classified_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("unit.log");

        let err = run(&sh("exit 3"), &log, LONG).await.unwrap_err();
        assert!(matches!(err, ExecutionError::NonZeroExit(3)));

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("[ERROR] command exited with code 3"));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("unit.log");

        let spec = CommandSpec::new("genopipe-no-such-tool");
        let err = run(&spec, &log, LONG).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ExecutableNotFound(_)));

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("executable not found"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("unit.log");

        let err = run(&sh("sleep 30"), &log, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_stderr_interleaves_into_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("unit.log");

        run(&sh("echo out; echo err >&2"), &log, LONG).await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("out"));
        assert!(contents.contains("err"));
    }

    #[tokio::test]
    async fn test_stdout_capture_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("unit.log");
        let counts = dir.path().join("counts.txt");

        let spec = sh("echo gene_a 12; echo progress >&2").capture_stdout(&counts);
        run(&spec, &log, LONG).await.unwrap();

        assert_eq!(std::fs::read_to_string(&counts).unwrap(), "gene_a 12\n");
        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("progress"));
        assert!(!contents.contains("gene_a"));
    }

    #[tokio::test]
    async fn test_failed_capture_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("unit.log");
        let counts = dir.path().join("counts.txt");

        let spec = sh("echo partial; exit 1").capture_stdout(&counts);
        let err = run(&spec, &log, LONG).await.unwrap_err();
        assert!(matches!(err, ExecutionError::NonZeroExit(1)));
        assert!(!counts.exists());
    }
}
