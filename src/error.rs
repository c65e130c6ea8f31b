use std::path::PathBuf;

use thiserror::Error;

use crate::command::CommandError;
use crate::env_file::EnvFileError;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("'{0}' is required but was not found in PATH")]
    MissingTool(String),
    #[error("{0}")]
    Usage(String),
    #[error("run this from the repository root (no .git found in {})", .0.display())]
    WrongDirectory(PathBuf),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    EnvFile(#[from] EnvFileError),
    #[error("rendering summary: {0}")]
    Summary(#[from] serde_json::Error),
    #[error("process supervision failed: {0:#}")]
    Supervisor(anyhow::Error),
}

impl DeployError {
    /// Exit status the whole tool terminates with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Command(err) => err.exit_code(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DeployError;
    use crate::command::CommandError;

    #[test]
    fn command_failures_keep_their_exit_code() {
        let err = DeployError::from(CommandError::Failed {
            command: "npm install".to_string(),
            code: 7,
        });
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn prerequisite_errors_exit_with_one() {
        assert_eq!(DeployError::MissingTool("docker".into()).exit_code(), 1);
        assert_eq!(DeployError::Usage("missing --db-uri".into()).exit_code(), 1);
        assert_eq!(DeployError::WrongDirectory("/tmp".into()).exit_code(), 1);
    }
}
