//! Tracked external processes for stage processors.

use std::collections::VecDeque;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::StageContext;
use crate::error::StageError;

const TAIL_LINES: usize = 20;

/// Which pipe carries the progress lines. The other one is kept for error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStream {
    Stdout,
    Stderr,
}

/// Run `command` to completion as the job's registered process.
///
/// The process leads a new process group so that cancellation can take down
/// everything it spawned. Each line of `stream` is handed to `on_line`; the
/// last lines of the other pipe end up in the error when the process fails.
pub async fn run_tracked<F>(
    ctx: &StageContext,
    mut command: Command,
    stream: ProgressStream,
    mut on_line: F,
) -> Result<(), StageError>
where
    F: FnMut(&str) + Send,
{
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    ctx.check_cancelled()?;
    let mut child = command
        .spawn()
        .map_err(|e| StageError::process(format!("failed to spawn {}: {}", program, e)))?;
    let pid = child
        .id()
        .ok_or_else(|| StageError::process(format!("{} exited before it was tracked", program)))?;
    ctx.register_process(pid);
    // a cancellation that ran before the registration could not see this process
    if ctx.is_cancelled() {
        let _ = child.start_kill();
    }
    info!(job_id = ctx.job_id(), pid, "Started {}", program);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    let mut keep_tail = |line: &str| {
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    };

    let pipes = async {
        match stream {
            ProgressStream::Stdout => {
                tokio::join!(read_lines(stdout, &mut on_line), read_lines(stderr, &mut keep_tail));
            }
            ProgressStream::Stderr => {
                tokio::join!(read_lines(stdout, &mut keep_tail), read_lines(stderr, &mut on_line));
            }
        }
    };
    let (status, ()) = tokio::join!(child.wait(), pipes);
    ctx.deregister_process(pid);

    let status = status.map_err(|e| StageError::process(format!("failed to wait for {}: {}", program, e)))?;
    ctx.check_cancelled()?;

    if status.success() {
        debug!(job_id = ctx.job_id(), pid, "{} finished", program);
        Ok(())
    } else {
        let tail = Vec::from(tail).join("\n");
        Err(StageError::process(format!("{} exited with {}: {}", program, status, tail.trim())))
    }
}

/// Run `command` and collect its stdout.
pub async fn capture_stdout(ctx: &StageContext, command: Command) -> Result<String, StageError> {
    let mut output = String::new();
    run_tracked(ctx, command, ProgressStream::Stdout, |line| {
        output.push_str(line);
        output.push('\n');
    })
    .await?;
    Ok(output)
}

/// Feed `f` every line of `reader`. Carriage returns also end a line, since
/// progress bars redraw in place.
async fn read_lines<R, F>(reader: Option<R>, f: &mut F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str) + ?Sized,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                for line in text.split(['\r', '\n']) {
                    let line = line.trim();
                    if !line.is_empty() {
                        f(line);
                    }
                }
            }
            Err(e) => {
                debug!("stopped reading process output: {}", e);
                break;
            }
        }
    }
}
