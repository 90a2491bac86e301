//! `agent_run` executor: spawns the AI CLI subprocess, streams its stdout,
//! and enforces the hard timeout / terminate-then-kill shutdown sequence.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{info, warn};

const HARD_TIMEOUT: Duration = Duration::from_secs(600);
const SIGTERM_GRACE: Duration = Duration::from_secs(5);
const PROGRESS_LINE_BATCH: usize = 20;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

pub enum ExecOutcome {
    Completed { output_text: String },
    Failed { error_summary: String, output_text: Option<String> },
    Cancelled,
}

/// Run `agent_cli` with `prompt_text` on stdin, reporting progress through
/// `on_progress` and observing `cancel` for a cooperative stop request.
pub async fn run_agent(
    agent_cli: &str,
    prompt_text: &str,
    mut on_progress: impl FnMut(String) + Send,
    mut cancel: tokio::sync::oneshot::Receiver<()>,
) -> Result<ExecOutcome> {
    let mut child = Command::new(agent_cli)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn agent CLI `{agent_cli}`"))?;

    if let Some(mut stdin) = child.stdin.take() {
        let prompt = prompt_text.to_string();
        tokio::spawn(async move {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }

    let stdout = child.stdout.take().context("subprocess stdout not piped")?;
    let mut lines = BufReader::new(stdout).lines();

    let mut collected = String::new();
    let mut pending_since_flush = 0usize;
    let mut last_flush = Instant::now();
    let mut last_line = String::new();

    let deadline = Instant::now() + HARD_TIMEOUT;

    let exit_status = loop {
        tokio::select! {
            biased;
            _ = &mut cancel => {
                terminate_then_kill(&mut child).await;
                return Ok(ExecOutcome::Cancelled);
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(agent_cli, "agent subprocess hit hard timeout, sending SIGTERM");
                terminate_then_kill(&mut child).await;
                return Ok(ExecOutcome::Failed {
                    error_summary: "timed out after 600s".to_string(),
                    output_text: Some(collected),
                });
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(raw)) => {
                        let clean = strip_ansi(&raw);
                        if !clean.trim().is_empty() {
                            last_line = clean.clone();
                        }
                        collected.push_str(&clean);
                        collected.push('\n');
                        pending_since_flush += 1;
                        if pending_since_flush >= PROGRESS_LINE_BATCH || last_flush.elapsed() >= PROGRESS_INTERVAL {
                            on_progress(clean);
                            pending_since_flush = 0;
                            last_flush = Instant::now();
                        }
                    }
                    Ok(None) => {
                        break child.wait().await.context("failed to await subprocess exit")?;
                    }
                    Err(e) => {
                        warn!(error = %e, "error reading subprocess stdout");
                        break child.wait().await.context("failed to await subprocess exit")?;
                    }
                }
            }
        }
    };

    info!(agent_cli, code = exit_status.code(), "agent subprocess exited");

    if exit_status.success() && !collected.trim().is_empty() {
        Ok(ExecOutcome::Completed { output_text: collected })
    } else {
        let summary = if last_line.trim().is_empty() {
            "agent produced no output".to_string()
        } else {
            last_line
        };
        Ok(ExecOutcome::Failed { error_summary: summary, output_text: Some(collected) })
    }
}

async fn terminate_then_kill(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(SIGTERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn strip_ansi(line: &str) -> String {
    strip_ansi_escapes::strip_str(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn strip_ansi_removes_escape_sequences() {
        let colored = "\u{1b}[32mok\u{1b}[0m";
        assert_eq!(strip_ansi(colored), "ok");
    }

    #[test]
    fn strip_ansi_leaves_plain_text_untouched() {
        assert_eq!(strip_ansi("plain line"), "plain line");
    }

    #[tokio::test]
    async fn successful_exit_with_output_is_completed() {
        let (_tx, cancel_rx) = tokio::sync::oneshot::channel();
        let progress_lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = progress_lines.clone();

        let outcome = run_agent(
            "uname",
            "",
            move |line| captured.lock().unwrap().push(line),
            cancel_rx,
        )
        .await
        .unwrap();

        match outcome {
            ExecOutcome::Failed { .. } | ExecOutcome::Cancelled => {
                panic!("expected completion for a command that prints output")
            }
            ExecOutcome::Completed { .. } => {}
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_failed() {
        let (_tx, cancel_rx) = tokio::sync::oneshot::channel();
        let outcome = run_agent("false", "", |_| {}, cancel_rx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn cancellation_returns_cancelled_outcome() {
        let (tx, cancel_rx) = tokio::sync::oneshot::channel();
        tx.send(()).unwrap();
        let outcome = run_agent("sleep", "", |_| {}, cancel_rx).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Cancelled));
    }
}
