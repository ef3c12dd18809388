// src/exec/task_runner.rs

//! Runs one execution attempt of one record's process.
//!
//! The child is spawned as the leader of a new process group. Its stdout and
//! stderr are merged into a single line stream (split on `\n` and `\r`, since
//! both tools redraw progress in place) and forwarded to the caller as
//! [`ExecEvent`]s. The read loop watches the cancellation token; once it
//! fires the loop stops waiting for natural exit and tears the group down
//! with terminate, a bounded wait, then kill.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exec::controller::ProcessController;

/// Upper bound on reading trailing output after the main process exited.
/// Grandchildren that inherited the pipes may keep them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    /// The process is up; `pid` is also its process-group ID.
    Spawned { pid: u32 },
    /// One line of combined output, without the terminator.
    Line(String),
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Natural exit with a code (zero is success).
    Exited(i32),
    /// The process ended without an exit code (killed by a signal).
    Died,
    /// Cancellation was requested; the process group has been torn down.
    Cancelled,
}

enum LoopEnd {
    Cancelled,
    Exited(ExitStatus),
    OutputClosed,
}

/// Spawn `argv` and drive it to completion or cancellation.
///
/// Spawn and wait failures are returned as errors; everything else is an
/// [`AttemptOutcome`].
pub async fn run_process(
    argv: Vec<String>,
    cancel: CancellationToken,
    events: mpsc::Sender<ExecEvent>,
    controller: Arc<dyn ProcessController>,
    kill_grace: Duration,
) -> Result<AttemptOutcome> {
    let (program, args) = argv.split_first().context("empty command line")?;
    if cancel.is_cancelled() {
        return Ok(AttemptOutcome::Cancelled);
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(0x0000_0200); // CREATE_NEW_PROCESS_GROUP

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning '{program}'"))?;
    let pid = child.id().context("spawned process has no pid")?;
    info!(pid, program = %program, "process started");

    if events.send(ExecEvent::Spawned { pid }).await.is_err() {
        debug!(pid, "event consumer gone before spawn notification");
    }

    let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, line_tx.clone()));
    }
    drop(line_tx);

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break LoopEnd::Cancelled,
            line = line_rx.recv() => match line {
                Some(line) => forward(&events, line).await,
                None => break LoopEnd::OutputClosed,
            },
            status = child.wait() => {
                let status = status.context("waiting for process")?;
                let _ = timeout(OUTPUT_DRAIN_TIMEOUT, async {
                    while let Some(line) = line_rx.recv().await {
                        forward(&events, line).await;
                    }
                })
                .await;
                break LoopEnd::Exited(status);
            }
        }
    };

    let status = match end {
        LoopEnd::Exited(status) => Some(status),
        LoopEnd::OutputClosed => tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status.context("waiting for process")?),
        },
        LoopEnd::Cancelled => None,
    };

    match status {
        // An exit racing with a stop request still counts as a stop.
        Some(_) if cancel.is_cancelled() => Ok(AttemptOutcome::Cancelled),
        Some(status) => {
            info!(pid, code = ?status.code(), "process exited");
            Ok(match status.code() {
                Some(code) => AttemptOutcome::Exited(code),
                None => AttemptOutcome::Died,
            })
        }
        None => {
            info!(pid, "cancellation requested; shutting process group down");
            shutdown(&mut child, pid, controller.as_ref(), kill_grace).await;
            Ok(AttemptOutcome::Cancelled)
        }
    }
}

async fn forward(events: &mpsc::Sender<ExecEvent>, line: String) {
    if events.send(ExecEvent::Line(line)).await.is_err() {
        debug!("event consumer gone; dropping output line");
    }
}

/// Terminate, wait up to `grace`, kill, wait up to `grace` again.
async fn shutdown(
    child: &mut Child,
    pid: u32,
    controller: &dyn ProcessController,
    grace: Duration,
) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    // A stopped group holds SIGTERM pending until continued.
    if controller.supports_pause() {
        if let Err(e) = controller.resume(pid) {
            debug!(pid, error = %e, "resume before terminate failed");
        }
    }
    if let Err(e) = controller.terminate(pid) {
        warn!(pid, error = %e, "failed to terminate process group");
    }
    if timeout(grace, child.wait()).await.is_ok() {
        return;
    }

    warn!(pid, grace_secs = grace.as_secs(), "process ignored terminate; killing");
    if let Err(e) = controller.kill(pid) {
        warn!(pid, error = %e, "failed to kill process group; killing leader only");
        let _ = child.start_kill();
    }
    if timeout(grace, child.wait()).await.is_err() {
        error!(pid, "process still alive after kill");
    }
}

/// Forward `reader` to `tx` split on `\n` and `\r`, skipping empty segments.
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = reader;
    let mut buf = [0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "output stream read failed");
                break;
            }
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !flush(&mut pending, &tx).await {
                    return;
                }
            } else {
                pending.push(byte);
            }
        }
    }

    flush(&mut pending, &tx).await;
}

async fn flush(pending: &mut Vec<u8>, tx: &mpsc::Sender<String>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    tx.send(line).await.is_ok()
}
