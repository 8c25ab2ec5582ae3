//! External tool invocation with bounded runtime
//!
//! Every ffmpeg/ffprobe call goes through [`ToolCommand`]: stdout and stderr
//! are captured, a nonzero exit is a failure, and a timeout kills the child.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

/// Captured result of a successful tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Why a tool run failed
#[derive(Debug, Clone)]
pub enum ToolFailure {
    /// The binary could not be started
    Spawn(String),
    /// Nonzero exit; carries the tail of stderr
    Exit { code: Option<i32>, stderr: String },
    /// Exceeded the deadline and was killed
    Timeout(Duration),
}

impl ToolFailure {
    /// Diagnostics suitable for error messages
    #[must_use]
    pub fn diagnostics(&self) -> String {
        match self {
            Self::Spawn(msg) => msg.clone(),
            Self::Exit { code, stderr } => match code {
                Some(c) if stderr.is_empty() => format!("exited with status {c}"),
                Some(c) => format!("exited with status {c}: {stderr}"),
                None => format!("terminated by signal: {stderr}"),
            },
            Self::Timeout(limit) => format!("timed out after {}s", limit.as_secs()),
        }
    }
}

/// Keep the last lines of stderr; ffmpeg puts the real error at the end
const STDERR_TAIL_LINES: usize = 20;

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// A prepared external command
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Run to completion, failing on nonzero exit or timeout
    pub async fn run(&self) -> Result<ToolOutput, ToolFailure> {
        debug!("{} args: {:?}", self.program, self.args);
        let start = Instant::now();

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolFailure::Spawn(format!("failed to start {}: {e}", self.program)))?;

        // Dropping the wait future on timeout kills the child via kill_on_drop
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolFailure::Spawn(format!("{} I/O error: {e}", self.program)))?,
            Err(_) => return Err(ToolFailure::Timeout(self.timeout)),
        };

        let stderr = stderr_tail(&output.stderr);
        if !output.status.success() {
            return Err(ToolFailure::Exit {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(ToolOutput {
            stdout: output.stdout,
            stderr,
            elapsed: start.elapsed(),
        })
    }

    /// Check that the binary answers `-version` within `timeout`
    pub async fn check_available(program: &str, timeout: Duration) -> bool {
        match Self::new(program, timeout).args(["-version"]).run().await {
            Ok(_) => true,
            Err(failure) => {
                debug!("{program} unavailable: {}", failure.diagnostics());
                false
            }
        }
    }
}
