//! Worker task: one spawn-and-wait cycle for a single command attempt.
//!
//! The child process is spawned on the caller's thread so spawn failure
//! propagates distinctly and the pid is known immediately; a worker
//! thread then owns the `Child`, blocks until it exits, and decodes the
//! captured output. The controller joins the worker bounded by the
//! deadline and only ever touches the recorded pid afterwards.

use crate::command::{OutputSink, Program};
use crate::error::{ExecError, Result};
use crate::runner::result::{ExecutionResult, TIMEOUT_EXIT_CODE};
use std::fs::OpenOptions;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// A fully resolved command attempt: spec fields with all runner
/// defaults and continuity state already applied.
#[derive(Debug, Clone)]
pub(crate) struct PreparedCommand {
    pub program: Program,
    pub cwd: Option<PathBuf>,
    /// Replace the inherited environment entirely before applying `env`
    /// (continuity mode restores the managed shell's full environment).
    pub env_clear: bool,
    pub env: Vec<(String, String)>,
    pub merge_stderr: bool,
    pub sink: OutputSink,
}

/// How the worker recovers output once the child exits.
enum CaptureMode {
    /// stdout and stderr piped separately.
    Piped,
    /// Both streams feed one pipe; the reader drains it to EOF.
    Merged(std::io::PipeReader),
    /// Both streams append to a log file; nothing to read back.
    File,
}

/// A live attempt: the spawned child's pid plus the thread blocked on it.
pub(crate) struct Worker {
    pid: u32,
    thread: JoinHandle<ExecutionResult>,
    done_rx: Receiver<()>,
}

/// What the bounded wait produced. On timeout the worker is handed back
/// so the controller can re-join it after cleanup.
pub(crate) enum JoinResult {
    Completed(ExecutionResult),
    TimedOut(Worker),
}

impl Worker {
    /// Spawn the child and start the wait thread.
    ///
    /// This is the only failure point that propagates as an error:
    /// everything after a successful spawn resolves into an
    /// [`ExecutionResult`].
    pub fn spawn(prepared: PreparedCommand) -> Result<Worker> {
        let display_str = prepared.program.to_shell_string();
        let spawn_err = |source: std::io::Error| ExecError::Spawn {
            command: display_str.clone(),
            source,
        };

        let mut cmd = match &prepared.program {
            Program::Argv(args) => {
                let executable = args.first().ok_or_else(|| {
                    spawn_err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "empty argument vector",
                    ))
                })?;
                let mut cmd = Command::new(executable);
                cmd.args(&args[1..]);
                cmd
            }
            Program::Shell(command) => {
                let (shell, shell_arg) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
                let mut cmd = Command::new(shell);
                cmd.arg(shell_arg).arg(command);
                cmd
            }
        };

        if let Some(dir) = &prepared.cwd {
            cmd.current_dir(dir);
        }
        if prepared.env_clear {
            cmd.env_clear();
        }
        for (key, value) in &prepared.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());

        let capture = match (&prepared.sink, prepared.merge_stderr) {
            (OutputSink::File(path), _) => {
                // Append mode: repeated runs accumulate in one log. Both
                // streams share the handle, so merge is implicit here.
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .map_err(spawn_err)?;
                let err_file = file.try_clone().map_err(spawn_err)?;
                cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err_file));
                CaptureMode::File
            }
            (OutputSink::Memory, true) => {
                let (reader, writer) = std::io::pipe().map_err(spawn_err)?;
                let err_writer = writer.try_clone().map_err(spawn_err)?;
                cmd.stdout(Stdio::from(writer)).stderr(Stdio::from(err_writer));
                CaptureMode::Merged(reader)
            }
            (OutputSink::Memory, false) => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                CaptureMode::Piped
            }
        };

        let child = cmd.spawn().map_err(spawn_err)?;
        // Close the parent's copies of the pipe write ends, otherwise the
        // merged reader never sees EOF.
        drop(cmd);
        let pid = child.id();
        debug!("spawned '{}' as pid {}", display_str, pid);

        if let OutputSink::File(path) = &prepared.sink {
            maybe_spawn_viewer(&display_str, path);
        }

        let (done_tx, done_rx) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            let result = wait_and_capture(child, capture);
            let _ = done_tx.send(());
            result
        });

        Ok(Worker { pid, thread, done_rx })
    }

    /// The child's OS pid, recorded at spawn time so the controller can
    /// act on it even if this wait is later abandoned.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the attempt, bounded by `timeout` (`None` waits forever).
    pub fn join(self, timeout: Option<Duration>) -> JoinResult {
        match timeout {
            None => JoinResult::Completed(self.join_finished()),
            Some(limit) => match self.done_rx.recv_timeout(limit) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    JoinResult::Completed(self.join_finished())
                }
                Err(RecvTimeoutError::Timeout) => JoinResult::TimedOut(self),
            },
        }
    }

    /// Re-join after forced cleanup to flush whatever partial output the
    /// worker captured. If the worker is still blocked once `grace`
    /// expires it is abandoned and a bare timeout result is synthesized.
    pub fn rejoin(self, grace: Duration) -> ExecutionResult {
        match self.done_rx.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.join_finished(),
            Err(RecvTimeoutError::Timeout) => {
                warn!("worker for pid {} still blocked after cleanup; abandoning it", self.pid);
                ExecutionResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    code: TIMEOUT_EXIT_CODE,
                }
            }
        }
    }

    fn join_finished(self) -> ExecutionResult {
        self.thread.join().unwrap_or_else(|_| {
            warn!("worker thread for pid {} panicked", self.pid);
            ExecutionResult {
                stdout: String::new(),
                stderr: String::new(),
                code: 1,
            }
        })
    }
}

/// Block until the child exits, then decode output and exit code. Runs on
/// the worker thread; never fails, wait errors degrade to code 1.
fn wait_and_capture(mut child: Child, capture: CaptureMode) -> ExecutionResult {
    match capture {
        CaptureMode::Piped => match child.wait_with_output() {
            Ok(output) => ExecutionResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                code: exit_code(output.status),
            },
            Err(err) => {
                warn!("waiting on child failed: {}", err);
                failed_wait()
            }
        },
        CaptureMode::Merged(mut reader) => {
            // Drain to EOF before reaping; EOF arrives once the child and
            // any inheritors of the write end are gone.
            let mut buf = Vec::new();
            if let Err(err) = reader.read_to_end(&mut buf) {
                warn!("reading merged output failed: {}", err);
            }
            let code = match child.wait() {
                Ok(status) => exit_code(status),
                Err(err) => {
                    warn!("waiting on child failed: {}", err);
                    return failed_wait();
                }
            };
            ExecutionResult {
                stdout: String::from_utf8_lossy(&buf).into_owned(),
                stderr: String::new(),
                code,
            }
        }
        CaptureMode::File => {
            let code = match child.wait() {
                Ok(status) => exit_code(status),
                Err(err) => {
                    warn!("waiting on child failed: {}", err);
                    return failed_wait();
                }
            };
            ExecutionResult {
                stdout: String::new(),
                stderr: String::new(),
                code,
            }
        }
    }
}

fn failed_wait() -> ExecutionResult {
    ExecutionResult {
        stdout: String::new(),
        stderr: String::new(),
        code: 1,
    }
}

/// Numeric exit code: the real code, or the negative signal number when
/// the child was signal-terminated (matching what the cleanup path
/// expects to distinguish from a clean 0).
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    1
}

/// Truthy check for the `WATCH_LOGS` viewer toggle.
fn watch_logs_enabled() -> bool {
    match std::env::var("WATCH_LOGS") {
        Ok(value) => {
            let value = value.trim().to_ascii_lowercase();
            value == "1" || value == "true" || value == "yes"
        }
        Err(_) => false,
    }
}

/// Best-effort live-tail viewer for interactive debugging. Fire and
/// forget: the viewer is untracked and never participates in cleanup;
/// leaking it on abnormal termination is accepted.
#[cfg(unix)]
fn maybe_spawn_viewer(title: &str, log_file: &std::path::Path) {
    if !watch_logs_enabled() {
        return;
    }
    let viewer = Command::new("xterm")
        .args(["-T", title, "-e", "tail", "-f"])
        .arg(log_file)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match viewer {
        Ok(child) => debug!("spawned log viewer pid {}", child.id()),
        Err(err) => debug!("log viewer unavailable: {}", err),
    }
}

#[cfg(not(unix))]
fn maybe_spawn_viewer(_title: &str, _log_file: &std::path::Path) {}
