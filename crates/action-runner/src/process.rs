use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use crate::{ActionError, Result};

/// Marker prefix an action process prints on its single success line.
pub const RESULT_MARKER: &str = "RESULT:";

// ─── ActionProcess ────────────────────────────────────────────────────────

/// A running single-invocation action subprocess.
///
/// Stdout is read line by line and classified against the `RESULT:` marker;
/// everything else on stdout is diagnostic output. Stderr is captured in a
/// background task and surfaced on process exit errors.
pub(crate) struct ActionProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    /// Stderr output collected by a background reader task.
    stderr_buf: Arc<Mutex<String>>,
    /// Handle to the background stderr reader, joined before the buffer is
    /// read so all captured output is visible.
    stderr_task: Option<tokio::task::JoinHandle<()>>,
}

/// One classified line of subprocess stdout.
pub(crate) enum OutputLine {
    /// Payload following the `RESULT:` marker (marker stripped).
    Result(String),
    /// Any other non-empty stdout line.
    Diagnostic(String),
}

impl ActionProcess {
    /// Spawn the given command with piped stdio and start draining stderr.
    pub(crate) fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(ActionError::Io)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ActionError::Process("stdout not captured".into()))?;

        // Drain stderr into a buffer so it can be attached to exit errors.
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            })
        });

        let lines = BufReader::new(stdout).lines();
        Ok(Self {
            child,
            lines,
            stderr_buf,
            stderr_task,
        })
    }

    /// Read the next non-empty stdout line.
    ///
    /// Returns `Ok(None)` on EOF (process closed its stdout).
    pub(crate) async fn next_line(&mut self) -> Result<Option<OutputLine>> {
        loop {
            match self.lines.next_line().await {
                Err(e) => return Err(ActionError::Io(e)),
                Ok(None) => return Ok(None),
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(payload) = trimmed.strip_prefix(RESULT_MARKER) {
                        return Ok(Some(OutputLine::Result(payload.to_string())));
                    }
                    return Ok(Some(OutputLine::Diagnostic(line)));
                }
            }
        }
    }

    /// Wait for the child to exit and return an error if the exit code is
    /// non-zero or the process was killed by a signal, with captured stderr
    /// attached.
    pub(crate) async fn wait_exit_error(&mut self) -> Option<ActionError> {
        let status = match self.child.wait().await {
            Ok(s) => s,
            Err(e) => return Some(ActionError::Io(e)),
        };

        if status.success() {
            return None;
        }

        // Ensure the background reader has drained stderr before we read it.
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }

        let stderr = self
            .stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default();

        let msg = if let Some(code) = status.code() {
            if stderr.is_empty() {
                format!("action process exited with code {code}")
            } else {
                format!("action process exited with code {code}\nstderr: {stderr}")
            }
        } else {
            // Killed by signal (Unix)
            if stderr.is_empty() {
                "action process terminated by signal".to_string()
            } else {
                format!("action process terminated by signal\nstderr: {stderr}")
            }
        };

        Some(ActionError::Process(msg))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
