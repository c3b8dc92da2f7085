//! Agent process supervisor.
//!
//! Spawns the agent executable, relays its raw stdout bytes into a
//! [`StreamClient`], feeds the same bytes line-by-line to an
//! [`AgentParser`], mirrors stderr, and reconciles the process exit status
//! with the client's completion barrier: the program may only exit once
//! `wait()` has seen every outstanding network operation settle.
//!
//! Network failures never surface here -- the client resolves them
//! internally and the supervisor only observes `stop()`/`wait()`.

use anyhow::{Context, Result};
use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::agent::{AgentCommand, AgentParser};
use crate::client::StreamClient;

/// Exit code reported when the agent dies to a signal instead of exiting.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// Accumulates stdout bytes and yields complete non-blank lines.
///
/// A line torn across two read chunks is reassembled before it reaches the
/// parser; the unterminated tail is flushed with [`LineSplitter::finish`]
/// at stream end.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    /// Feed one chunk; returns every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        self.partial.extend_from_slice(rest);
        lines
    }

    /// Flush a trailing unterminated line.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        if line.trim().is_empty() { None } else { Some(line) }
    }
}

/// Run an agent process to completion.
///
/// Returns the exit code the host program should propagate: the process's
/// own code, the parser's override, or [`SIGNAL_EXIT_CODE`] when the
/// process was killed by a signal. Resolves only after the stream client
/// has fully drained.
pub async fn run_agent(
    command: &AgentCommand,
    parser: &mut dyn AgentParser,
    client: &dyn StreamClient,
) -> Result<i32> {
    let mut child = match Command::new(&command.exec)
        .args(&command.args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            client.stop(true, &format!("spawn error: {e}"));
            return Err(e).with_context(|| {
                format!(
                    "failed to spawn agent '{}' -- is it installed and on PATH?",
                    command.exec
                )
            });
        }
    };

    let mut stdout = child.stdout.take().context("agent stdout was not piped")?;
    let stderr = child.stderr.take().context("agent stderr was not piped")?;

    // Mirror the agent's stderr onto our own, untouched.
    let stderr_task = tokio::spawn(async move {
        let mut stderr = stderr;
        let mut out = tokio::io::stderr();
        let _ = tokio::io::copy(&mut stderr, &mut out).await;
    });

    let mut splitter = LineSplitter::default();
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        match stdout.read_buf(&mut buf).await {
            Ok(0) => {
                if let Some(line) = splitter.finish() {
                    parser.handle_line(&line);
                }
                client.stop(false, "stdout end");
                break;
            }
            Ok(_) => {
                let chunk = buf.split().freeze();
                client.put(chunk.clone());
                for line in splitter.push(&chunk) {
                    parser.handle_line(&line);
                }
            }
            Err(e) => {
                client.stop(true, &format!("stdout error: {e}"));
                break;
            }
        }
    }

    let status = child.wait().await.context("failed to await agent exit")?;
    let _ = stderr_task.await;

    let exit_code = match status.code() {
        Some(code) => {
            info!(code, "agent process closed");
            parser.handle_close(code).unwrap_or(code)
        }
        None => {
            warn!(status = %status, "agent process terminated by signal");
            SIGNAL_EXIT_CODE
        }
    };

    client.wait().await;

    Ok(exit_code)
}
