//! Scripted collaborators for orchestration tests.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

use crate::discovery::InstanceDiscovery;
use crate::errors::EngineError;
use crate::model::ConnectionDescriptor;
use crate::progress::{LogLevel, Observer};
use crate::runner::{LineSink, RunError, StepCommand, StepOutput, StepRunner};

pub(crate) const SIMULATED_ERROR: &str = "ERROR: simulated failure";

pub(crate) fn running_local() -> ConnectionDescriptor {
    ConnectionDescriptor {
        host: "127.0.0.1".into(),
        port: 54322,
        user: "postgres".into(),
        password: "postgres".into(),
        database: "postgres".into(),
        is_running: true,
    }
}

struct Gate {
    open: watch::Sender<bool>,
    started: Notify,
}

/// Records every command instead of running it. Successful steps touch their `-f` file.
#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: Mutex<Vec<StepCommand>>,
    failures: Vec<(String, String)>,
    missing_tools: Vec<String>,
    gate: Option<Gate>,
}

impl FakeRunner {
    /// Steps of `program` whose `-f` file is named `file` exit 1 with an `ERROR` line.
    pub(crate) fn failing(mut self, program: &str, file: &str) -> Self {
        self.failures.push((program.to_string(), file.to_string()));
        self
    }

    pub(crate) fn without_tool(mut self, program: &str) -> Self {
        self.missing_tools.push(program.to_string());
        self
    }

    /// Every step blocks until [`open_gate`](Self::open_gate) or the kill token fires.
    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Gate {
            open: watch::channel(false).0,
            started: Notify::new(),
        });
        self
    }

    pub(crate) async fn wait_started(&self) {
        if let Some(gate) = &self.gate {
            gate.started.notified().await;
        }
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.open.send_replace(true);
        }
    }

    pub(crate) fn calls(&self) -> Vec<StepCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepRunner for FakeRunner {
    fn locate(&self, program: &str) -> Result<PathBuf, EngineError> {
        if self.missing_tools.iter().any(|t| t == program) {
            return Err(EngineError::ToolMissing {
                tool: program.to_string(),
            });
        }
        Ok(Path::new("/usr/bin").join(program))
    }

    async fn run_streaming(
        &self,
        command: &StepCommand,
        sink: &dyn LineSink,
        kill: &CancellationToken,
    ) -> Result<StepOutput, RunError> {
        self.calls.lock().unwrap().push(command.clone());

        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            let mut open = gate.open.subscribe();
            tokio::select! {
                _ = open.wait_for(|open| *open) => {}
                () = kill.cancelled() => {
                    return Err(RunError::Killed {
                        program: command.program.clone(),
                    });
                }
            }
        }

        let file = command.arg_after("-f").map(PathBuf::from);
        let file_name = file
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let fails = self
            .failures
            .iter()
            .any(|(program, name)| *program == command.program && *name == file_name);
        if fails {
            sink.stderr_line(SIMULATED_ERROR);
            return Ok(StepOutput {
                stdout: String::new(),
                stderr: format!("{}\n", SIMULATED_ERROR),
                exit_code: Some(1),
                success: false,
            });
        }

        if let Some(path) = &file {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| RunError::Io {
                    program: command.program.clone(),
                    source,
                })?;
        }
        let line = format!("processed {}", file_name);
        sink.stdout_line(&line);
        Ok(StepOutput {
            stdout: format!("{}\n", line),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        })
    }
}

pub(crate) struct FixedDiscovery {
    descriptor: ConnectionDescriptor,
    calls: AtomicUsize,
}

impl FixedDiscovery {
    pub(crate) fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceDiscovery for FixedDiscovery {
    async fn discover(&self) -> ConnectionDescriptor {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.descriptor.clone()
    }
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    progress_events: Mutex<Vec<(f64, String)>>,
    log_lines: Mutex<Vec<(String, LogLevel)>>,
}

impl RecordingObserver {
    pub(crate) fn progress(&self) -> Vec<(f64, String)> {
        self.progress_events.lock().unwrap().clone()
    }

    pub(crate) fn logs(&self) -> Vec<(String, LogLevel)> {
        self.log_lines.lock().unwrap().clone()
    }

    pub(crate) fn has_log(&self, level: LogLevel, needle: &str) -> bool {
        self.logs()
            .iter()
            .any(|(line, l)| *l == level && line.contains(needle))
    }
}

impl Observer for RecordingObserver {
    fn progress(&self, percent: f64, label: &str) {
        self.progress_events
            .lock()
            .unwrap()
            .push((percent, label.to_string()));
    }

    fn log(&self, line: &str, level: LogLevel) {
        self.log_lines
            .lock()
            .unwrap()
            .push((line.to_string(), level));
    }
}
