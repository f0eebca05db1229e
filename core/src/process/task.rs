use std::path::PathBuf;
use std::process::Stdio;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::mpsc;

use super::environment::ProcessEnvironment;
use super::io_pump::{pump_stderr, pump_stdout, LineStream, LineTap};
use super::processor::OutputProcessor;
use crate::error::TaskError;
use crate::task::{Task, TaskAffinity, TaskContext};
use crate::util::RingBytes;

const DEFAULT_STDERR_CAPACITY: usize = 64 * 1024;
const LINE_CHANNEL_CAPACITY: usize = 256;

lazy_static! {
    /// `Receiving objects:  45% (450/1000), 1.2 MiB | 3 MiB/s`
    static ref PROGRESS_RE: Regex =
        Regex::new(r"^(?:remote:\s*)?([^:]*?):?\s+(\d{1,3})%\s+\((\d+)/(\d+)\)")
            .expect("PROGRESS_RE is valid");
}

/// One git-style progress line from stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressLine {
    pub message: String,
    pub value: u64,
    pub total: u64,
}

pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let caps = PROGRESS_RE.captures(line.trim())?;
    Some(ProgressLine {
        message: caps[1].trim().to_string(),
        value: caps[3].parse().ok()?,
        total: caps[4].parse().ok()?,
    })
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub environment: ProcessEnvironment,
    /// Bytes of stderr kept for the failure message.
    pub stderr_capacity: usize,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            environment: ProcessEnvironment::default(),
            stderr_capacity: DEFAULT_STDERR_CAPACITY,
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn environment(mut self, environment: ProcessEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .to_string()
    }

    /// Human-readable command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program_name())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

enum Exit {
    Canceled,
    Status(std::io::Result<std::process::ExitStatus>),
}

/// A task that runs one external process and parses its stdout.
pub struct ProcessTask<P: OutputProcessor> {
    spec: ProcessSpec,
    processor: P,
}

impl<P: OutputProcessor> ProcessTask<P> {
    pub fn new(spec: ProcessSpec, processor: P) -> Self {
        Self { spec, processor }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn into_task(self, name: impl Into<String>, affinity: TaskAffinity) -> Task<P::Output> {
        Task::new(name, affinity, move |ctx| self.run(ctx))
    }

    /// Spawn, stream and classify.
    ///
    /// Success needs exit code 0 and no parse error. A non-zero exit maps to
    /// [`TaskError::Process`] carrying stderr; a parse error (with exit 0) to
    /// [`TaskError::Parse`]; a cancelled token kills the child and maps to
    /// [`TaskError::Canceled`]. The child is killed on every early return.
    pub async fn run(self, ctx: TaskContext) -> Result<P::Output, TaskError> {
        let Self {
            spec,
            mut processor,
        } = self;
        ctx.check_cancelled()?;

        let program = spec.program_name();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = spec.working_dir.as_ref() {
            cmd.current_dir(dir);
        }
        spec.environment.apply(&mut cmd);

        tracing::debug!(target: "gitkeeper.process", task = ctx.name(), command = %spec.command_line(), "spawning process");
        let mut child = cmd.spawn().map_err(|e| TaskError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(TaskError::Spawn {
                program,
                message: "stdio pipes unavailable".to_string(),
            });
        };

        let ring = RingBytes::new(spec.stderr_capacity.max(1));
        let (line_tx, mut line_rx) = mpsc::channel::<LineTap>(LINE_CHANNEL_CAPACITY);
        let out_pump = pump_stdout(stdout, line_tx.clone());
        let err_pump = pump_stderr(stderr, ring.clone(), line_tx);

        let token = ctx.token().clone();
        let mut parse_error = None;
        let mut lines_open = true;
        let mut stdout_lines = 0u64;

        let exit = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break Exit::Canceled,
                tap = line_rx.recv(), if lines_open => match tap {
                    Some(LineTap { line, stream: LineStream::Stdout }) => {
                        stdout_lines += 1;
                        if parse_error.is_none() {
                            if let Err(e) = processor.line_received(&line) {
                                tracing::debug!(target: "gitkeeper.process", %program, line = stdout_lines, error = %e, "output parse failed");
                                parse_error = Some(e);
                            }
                        }
                    }
                    Some(LineTap { line, stream: LineStream::Stderr }) => {
                        if let Some(p) = parse_progress_line(&line) {
                            ctx.report_progress(p.value, p.total, Some(&p.message));
                        }
                    }
                    None => lines_open = false,
                },
                status = child.wait(), if !lines_open => break Exit::Status(status),
            }
        };

        match exit {
            Exit::Canceled => {
                let _ = child.kill().await;
                out_pump.abort();
                err_pump.abort();
                tracing::debug!(target: "gitkeeper.process", %program, "process canceled");
                Err(TaskError::Canceled)
            }
            Exit::Status(Err(e)) => Err(TaskError::faulted(format!(
                "waiting for `{program}` failed: {e}"
            ))),
            Exit::Status(Ok(status)) => {
                let _ = out_pump.await;
                let _ = err_pump.await;
                let exit_code = status.code().unwrap_or(-1);
                tracing::debug!(target: "gitkeeper.process", %program, exit_code, stdout_lines, "process exited");

                if !status.success() {
                    return Err(TaskError::Process {
                        program,
                        exit_code,
                        stderr: ring.to_text(),
                    });
                }
                if let Some(e) = parse_error {
                    return Err(e.into());
                }
                Ok(processor.finish()?)
            }
        }
    }
}
