// ABOUTME: Child process execution bound to a call's cancellation signal
// ABOUTME: Captures stdout/stderr with an output cap and kills the child when the call ends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Captured result of a finished child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when the child was killed by a signal
    pub exit_code: Option<i32>,
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Whether either stream was cut at the output cap
    pub truncated: bool,
}

impl ProcessOutput {
    /// Whether the child exited with status 0
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Run `command` to completion unless `cancellation` fires first.
///
/// Each stream is read through a `max_output_bytes` cap; the child is killed
/// as soon as either stream overflows, so its output never accumulates past
/// the cap. The child is also killed when this future is dropped or cancelled.
///
/// # Errors
///
/// `CANCELLED` when the signal fires, `EXTERNAL_SERVICE_ERROR` when the
/// program cannot be spawned or its output cannot be read
pub async fn run_captured(
    mut command: Command,
    program: &str,
    cancellation: &CancellationToken,
    max_output_bytes: usize,
) -> AppResult<ProcessOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| AppError::external_service(program, format!("failed to start: {e}")))?;
    debug!(program, pid = child.id(), "Spawned child process");

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(AppError::external_service(program, "output pipes unavailable"));
    };

    let overflow = CancellationToken::new();
    let streams = async {
        tokio::try_join!(
            read_capped(stdout, max_output_bytes, &overflow),
            read_capped(stderr, max_output_bytes, &overflow),
        )
    };
    tokio::pin!(streams);

    let mut killed = false;
    let ((stdout, stdout_cut), (stderr, stderr_cut)) = loop {
        tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                debug!(program, "Killing child process on cancellation");
                return Err(AppError::cancelled(format!("{program} cancelled")));
            }
            () = overflow.cancelled(), if !killed => {
                killed = true;
                debug!(program, max_output_bytes, "Killing child process at output cap");
                if let Err(e) = child.start_kill() {
                    debug!(program, error = %e, "Child exited before it could be killed");
                }
            }
            read = &mut streams => break read.map_err(|e| {
                AppError::external_service(program, format!("failed to collect output: {e}"))
            })?,
        }
    };

    let status = tokio::select! {
        biased;
        () = cancellation.cancelled() => {
            return Err(AppError::cancelled(format!("{program} cancelled")));
        }
        status = child.wait() => status
            .map_err(|e| AppError::external_service(program, format!("failed to wait: {e}")))?,
    };

    let mut stdout = String::from_utf8_lossy(&stdout).into_owned();
    let mut stderr = String::from_utf8_lossy(&stderr).into_owned();
    let mut truncated = stdout_cut || stderr_cut;
    truncated |= truncate_utf8(&mut stdout, max_output_bytes);
    truncated |= truncate_utf8(&mut stderr, max_output_bytes);

    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        truncated,
    })
}

/// Read `reader` to EOF or one byte past `cap`, signalling `overflow` on the latter
async fn read_capped<R>(
    reader: R,
    cap: usize,
    overflow: &CancellationToken,
) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let limit = u64::try_from(cap).unwrap_or(u64::MAX).saturating_add(1);
    let mut buffer = Vec::with_capacity(cap.min(64 * 1024));
    reader.take(limit).read_to_end(&mut buffer).await?;
    let cut = buffer.len() > cap;
    if cut {
        buffer.truncate(cap);
        overflow.cancel();
    }
    Ok((buffer, cut))
}

/// Cut `text` to at most `max_bytes` on a char boundary; returns whether it was cut
pub fn truncate_utf8(text: &mut String, max_bytes: usize) -> bool {
    if text.len() <= max_bytes {
        return false;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundary() {
        let mut text = "héllo".to_owned();
        assert!(truncate_utf8(&mut text, 2));
        assert_eq!(text, "h");

        let mut short = "ok".to_owned();
        assert!(!truncate_utf8(&mut short, 10));
        assert_eq!(short, "ok");
    }

    #[tokio::test]
    async fn test_captures_exit_code_and_output() -> AppResult<()> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg("printf 'hello\\n'; exit 2");

        let output = run_captured(command, "sh", &CancellationToken::new(), 1024).await?;
        assert_eq!(output.exit_code, Some(2));
        assert_eq!(output.stdout, "hello\n");
        assert!(!output.truncated);
        Ok(())
    }

    #[tokio::test]
    async fn test_endless_output_is_cut_at_the_cap() -> AppResult<()> {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg("yes");

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run_captured(command, "sh", &CancellationToken::new(), 1024),
        )
        .await
        .map_err(|_| AppError::internal("endless output was not cut off"))??;

        assert!(output.truncated);
        assert_eq!(output.stdout.len(), 1024);
        assert!(output.stdout.starts_with("y\ny\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg("sleep 60");
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = run_captured(command, "sh", &token, 1024).await;
        assert_eq!(
            result.err().map(|e| e.kind()),
            Some(crate::errors::ErrorKind::Cancelled)
        );
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}
