//! Command specifications: what to run and how to capture its output.
//!
//! A [`CommandSpec`] describes one command independently of the policy
//! used to run it (timeout, retries); those live on the
//! [`Runner`](crate::Runner). Fields left unset fall back to the runner's
//! per-instance defaults.

use std::collections::HashMap;
use std::path::PathBuf;

/// The program to execute, in exactly one of two modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// Argument vector executed directly, with no shell interpretation.
    /// The first element is the executable.
    Argv(Vec<String>),
    /// A single command string interpreted by the platform shell
    /// (`sh -c` on unix, `cmd /C` on Windows).
    Shell(String),
}

impl Program {
    /// Render as a single shell-ready string. Argument vectors are joined
    /// with quoting so the result round-trips through a shell.
    pub fn to_shell_string(&self) -> String {
        match self {
            Program::Argv(args) => shell_words::join(args),
            Program::Shell(command) => command.clone(),
        }
    }
}

/// Where captured output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Hold stdout/stderr in memory and return them in the result.
    Memory,
    /// Append both streams to a log file; the returned result's captured
    /// strings are empty. The file is closed on every exit path,
    /// including forced timeout cleanup.
    File(PathBuf),
}

/// One command to execute: the program plus capture options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// What to run.
    pub program: Program,
    /// Working-directory override. `None` inherits the caller's cwd (or,
    /// in continuity mode, the managed shell's last known cwd).
    pub cwd: Option<PathBuf>,
    /// Environment overlay merged over the inherited environment.
    pub env: HashMap<String, String>,
    /// Redirect stderr into the stdout capture. `None` uses the runner's
    /// default.
    pub merge_stderr: Option<bool>,
    /// Output destination. `None` uses the runner's default sink.
    pub sink: Option<OutputSink>,
}

impl CommandSpec {
    /// A command given as an argument vector (no shell interpretation).
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_program(Program::Argv(args.into_iter().map(Into::into).collect()))
    }

    /// A command given as a shell string.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::from_program(Program::Shell(command.into()))
    }

    fn from_program(program: Program) -> Self {
        Self {
            program,
            cwd: None,
            env: HashMap::new(),
            merge_stderr: None,
            sink: None,
        }
    }

    /// Override the working directory for this command.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add one environment variable to the overlay.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Redirect stderr into the stdout capture.
    pub fn merge_stderr(mut self, merge: bool) -> Self {
        self.merge_stderr = Some(merge);
        self
    }

    /// Append output to a log file instead of capturing it in memory.
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = Some(OutputSink::File(path.into()));
        self
    }

    /// Capture output in memory, overriding any runner default log file.
    pub fn capture(mut self) -> Self {
        self.sink = Some(OutputSink::Memory);
        self
    }
}
