use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::{debug, info};
use which::which;

use crate::error::DeployError;

/// A program invocation: program, arguments, working directory and extra
/// environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
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

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command line as echoed to the operator.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Builds the std command with inherited standard streams.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        command
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` failed with exit code {code}")]
    Failed { command: String, code: i32 },
    #[error("`{command}` was terminated by signal {signal}")]
    Signaled { command: String, signal: i32 },
}

impl CommandError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Spawn { .. } => 1,
            CommandError::Failed { code, .. } => *code,
            CommandError::Signaled { signal, .. } => 128 + signal,
        }
    }
}

/// Executes external programs on behalf of the provisioning steps.
pub trait Runner {
    /// Resolves a tool on the executable search path.
    fn find_tool(&self, name: &str) -> Option<PathBuf>;

    /// Runs a command to completion with inherited output streams.
    fn run(&self, spec: &CommandSpec) -> Result<(), CommandError>;

    /// Runs a command to completion and returns its standard output.
    fn capture(&self, spec: &CommandSpec) -> Result<String, CommandError>;
}

/// Fails fast when a tool the next step depends on is not installed.
pub fn require_tool(runner: &dyn Runner, name: &str) -> Result<PathBuf, DeployError> {
    match runner.find_tool(name) {
        Some(path) => {
            debug!(tool = name, path = %path.display(), "found tool");
            Ok(path)
        }
        None => Err(DeployError::MissingTool(name.to_string())),
    }
}

/// Runner backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        which(name).ok()
    }

    fn run(&self, spec: &CommandSpec) -> Result<(), CommandError> {
        info!("[cmd] {}", spec.display());
        let status = spec
            .to_command()
            .status()
            .map_err(|source| CommandError::Spawn {
                command: spec.display(),
                source,
            })?;
        check_status(spec, status)
    }

    fn capture(&self, spec: &CommandSpec) -> Result<String, CommandError> {
        debug!("[cmd] {}", spec.display());
        let output = spec
            .to_command()
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|source| CommandError::Spawn {
                command: spec.display(),
                source,
            })?;
        check_status(spec, output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn check_status(spec: &CommandSpec, status: ExitStatus) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }

    match status.code() {
        Some(code) => Err(CommandError::Failed {
            command: spec.display(),
            code,
        }),
        None => Err(CommandError::Signaled {
            command: spec.display(),
            signal: terminating_signal(status),
        }),
    }
}

#[cfg(unix)]
fn terminating_signal(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(0)
}

#[cfg(not(unix))]
fn terminating_signal(_status: ExitStatus) -> i32 {
    0
}
