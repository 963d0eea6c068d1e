//! # Process Runner
//!
//! Runs `bcp` and `sqlcmd` as child processes.
//!
//! stdout and stderr are read concurrently, line by line, and every line is
//! logged as soon as it arrives, so a long bulk copy reports progress while it
//! runs instead of after it exits.

use crate::error::{AppError, Result};
use bcpframe_core::BcpCommand;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Number of trailing output lines kept for error reports.
pub const TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// What a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
    /// Every stdout line, when capture was requested.
    pub stdout: Vec<String>,
    /// Last [`TAIL_LINES`] lines of combined output.
    pub tail: Vec<String>,
}

/// Spawn `program` and stream its output into the log.
///
/// `label` names the process in log lines; `shown` is the command line as
/// it may be logged (secrets already redacted).
pub async fn run_streaming(
    program: &Path,
    args: &[String],
    label: &str,
    shown: &str,
    capture_stdout: bool,
) -> Result<ProcessOutput> {
    tracing::info!(process = label, command = shown, "Executing command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| AppError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, Stream::Stderr, tx.clone())));
    }
    drop(tx);

    let mut output = ProcessOutput::default();
    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    while let Some((stream, line)) = rx.recv().await {
        match stream {
            Stream::Stdout => tracing::info!(process = label, "{line}"),
            Stream::Stderr => tracing::warn!(process = label, "{line}"),
        }
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.clone());
        if capture_stdout && stream == Stream::Stdout {
            output.stdout.push(line);
        }
    }

    for reader in readers {
        match reader.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(process = label, error = %err, "Output stream read failed"),
            Err(err) => tracing::warn!(process = label, error = %err, "Output reader task failed"),
        }
    }

    let status = child.wait().await?;
    output.code = status.code();
    output.success = status.success();
    output.tail = tail.into();

    tracing::debug!(process = label, code = ?output.code, "Process exited");
    Ok(output)
}

async fn forward_lines<R>(
    reader: R,
    stream: Stream,
    tx: mpsc::UnboundedSender<(Stream, String)>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if tx.send((stream, line)).is_err() {
            break;
        }
    }
    Ok(())
}

/// Run a bcp command, failing with [`AppError::BcpFailed`] on a non-zero exit.
pub async fn run_bcp(command: &BcpCommand) -> Result<ProcessOutput> {
    let output = run_streaming(
        command.program(),
        command.args(),
        "bcp",
        &command.to_string(),
        false,
    )
    .await?;

    if !output.success {
        return Err(AppError::BcpFailed {
            code: output.code,
            tail: output.tail,
        });
    }
    Ok(output)
}

// =============================================================================
// TESTS
// =============================================================================
