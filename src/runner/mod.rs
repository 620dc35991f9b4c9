//! Launches external tools, streams their output line by line and resolves to an exit status.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::errors::{EngineError, StepFailure};
use crate::model::{ArtifactKind, StepResult};
use crate::progress::{LogLevel, Observer};
use crate::utils::find_executable;

/// One external invocation: program, arguments and extra environment.
#[derive(Clone, PartialEq, Eq)]
pub struct StepCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl StepCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Value following `flag` in the argument list, e.g. the `-f` output file.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

// Environment values carry credentials; only their names are shown.
impl fmt::Debug for StepCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("StepCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .finish()
    }
}

impl fmt::Display for StepCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured output of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl StepOutput {
    fn from_status(status: ExitStatus, stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: status.code(),
            success: status.success(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' was terminated")]
    Killed { program: String },
}

/// Folds a run outcome into the step result for `kind`.
pub fn step_result(kind: ArtifactKind, outcome: Result<StepOutput, RunError>) -> StepResult {
    match outcome {
        Ok(out) => StepResult {
            kind,
            failure: (!out.success).then_some(StepFailure::NonZeroExit),
            stdout: out.stdout,
            stderr: out.stderr,
            exit_code: out.exit_code,
        },
        Err(RunError::Spawn { source, .. }) => StepResult {
            kind,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            failure: Some(StepFailure::Spawn(source.to_string())),
        },
        Err(RunError::Killed { .. }) => StepResult {
            kind,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            failure: Some(StepFailure::Killed),
        },
        Err(e @ RunError::Io { .. }) => StepResult {
            kind,
            stdout: String::new(),
            stderr: e.to_string(),
            exit_code: None,
            failure: Some(StepFailure::NonZeroExit),
        },
    }
}

/// Receives output lines as they arrive.
pub trait LineSink: Send + Sync {
    fn stdout_line(&self, line: &str);
    fn stderr_line(&self, line: &str);
}

pub struct NullSink;

impl LineSink for NullSink {
    fn stdout_line(&self, _line: &str) {}
    fn stderr_line(&self, _line: &str) {}
}

/// Forwards lines to an observer's log channel: stdout as info, stderr classified.
pub struct ObserverSink<'a>(pub &'a dyn Observer);

impl LineSink for ObserverSink<'_> {
    fn stdout_line(&self, line: &str) {
        self.0.log(line, LogLevel::Info);
    }

    fn stderr_line(&self, line: &str) {
        self.0.log(line, LogLevel::for_stderr(line));
    }
}

#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Pre-flight probe for a required program.
    fn locate(&self, program: &str) -> Result<PathBuf, EngineError>;

    /// Runs `command`, feeding `sink` incrementally. Cancelling `kill` terminates the process.
    async fn run_streaming(
        &self,
        command: &StepCommand,
        sink: &dyn LineSink,
        kill: &CancellationToken,
    ) -> Result<StepOutput, RunError>;

    async fn run(&self, command: &StepCommand) -> Result<StepOutput, RunError> {
        self.run_streaming(command, &NullSink, &CancellationToken::new())
            .await
    }
}

/// Runs real processes. No timeout is applied.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kill_grace: Duration,
}

impl ProcessRunner {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Starts `command` and hands back the live process.
    pub fn spawn(&self, command: &StepCommand) -> Result<RunningStep, RunError> {
        tracing::debug!(command = %command, "spawning step");
        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        Ok(RunningStep {
            program: command.program.clone(),
            child,
        })
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl StepRunner for ProcessRunner {
    fn locate(&self, program: &str) -> Result<PathBuf, EngineError> {
        find_executable(program)
    }

    async fn run_streaming(
        &self,
        command: &StepCommand,
        sink: &dyn LineSink,
        kill: &CancellationToken,
    ) -> Result<StepOutput, RunError> {
        let mut step = self.spawn(command)?;

        let outcome = tokio::select! {
            result = step.wait_with_sink(sink) => Some(result),
            () = kill.cancelled() => None,
        };

        match outcome {
            Some(result) => result,
            None => {
                tracing::warn!(program = %step.program, "terminating step");
                step.terminate(self.kill_grace).await;
                Err(RunError::Killed {
                    program: step.program,
                })
            }
        }
    }
}

/// Handle to a spawned step.
#[derive(Debug)]
pub struct RunningStep {
    program: String,
    child: Child,
}

impl RunningStep {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Pumps both output streams into `sink` until they close, then waits for exit.
    pub async fn wait_with_sink(&mut self, sink: &dyn LineSink) -> Result<StepOutput, RunError> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let (out, err) = tokio::join!(
            pump(stdout, |line| sink.stdout_line(line)),
            pump(stderr, |line| sink.stderr_line(line)),
        );
        let io_err = |source| RunError::Io {
            program: self.program.clone(),
            source,
        };
        let stdout = out.map_err(io_err)?;
        let stderr = err.map_err(io_err)?;

        let status = self.child.wait().await.map_err(io_err)?;
        tracing::debug!(program = %self.program, %status, "step exited");
        Ok(StepOutput::from_status(status, stdout, stderr))
    }

    /// Sends SIGTERM, then SIGKILL if the process outlives `grace`.
    pub async fn terminate(&mut self, grace: Duration) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: kill(2) on a pid we spawned and have not yet reaped.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            tracing::warn!(program = %self.program, "step ignored SIGTERM, killing");
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}

// Reads `reader` to the end, calling `on_line` for each non-blank line and returning the
// accumulated text. Invalid UTF-8 is replaced rather than treated as an error.
async fn pump<R, F>(reader: Option<R>, on_line: F) -> io::Result<String>
where
    R: AsyncRead + Unpin,
    F: Fn(&str),
{
    let mut collected = String::new();
    let Some(reader) = reader else {
        return Ok(collected);
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if !trimmed.trim().is_empty() {
            on_line(trimmed);
        }
        collected.push_str(trimmed);
        collected.push('\n');
    }
    Ok(collected)
}
