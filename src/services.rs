use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{CommandSpec, Runner, require_tool};
use crate::env_file::{EnvFileOutcome, EnvValues, write_env_file};
use crate::error::DeployError;

pub const PACKAGE_MANAGER: &str = "npm";
pub const INSECURE_JWT_SECRET: &str = "demo-secret-change-me";
pub const ACCESS_TOKEN_TTL_SECS: u64 = 3600;
pub const REFRESH_TOKEN_TTL_SECS: u64 = 604_800;

/// Where the two tiers live inside the repository.
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: PathBuf,
    pub backend: PathBuf,
    pub frontend: PathBuf,
}

impl Layout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            backend: root.join("backend"),
            frontend: root.join("frontend"),
            root,
        }
    }

    /// Requires the root to be a checkout, i.e. to contain `.git`.
    pub fn ensure_repo_root(&self) -> Result<(), DeployError> {
        if self.root.join(".git").exists() {
            Ok(())
        } else {
            Err(DeployError::WrongDirectory(self.root.clone()))
        }
    }
}

/// Settings written into the backend's environment file.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub port: u16,
    pub db_uri: String,
    pub jwt_secret: String,
    pub admin_email: String,
    pub admin_password: String,
}

impl BackendSettings {
    pub fn env_values(&self) -> EnvValues {
        EnvValues::new()
            .with("PORT", self.port.to_string())
            .with("MONGO_URI", self.db_uri.as_str())
            .with("JWT_SECRET", self.jwt_secret.as_str())
            .with("ACCESS_TOKEN_TTL", ACCESS_TOKEN_TTL_SECS.to_string())
            .with("REFRESH_TOKEN_TTL", REFRESH_TOKEN_TTL_SECS.to_string())
            .with("ADMIN_EMAIL", self.admin_email.as_str())
            .with("ADMIN_PASSWORD", self.admin_password.as_str())
    }
}

pub fn frontend_env_values(backend_port: u16) -> EnvValues {
    EnvValues::new().with(
        "VITE_API_BASE_URL",
        format!("http://localhost:{backend_port}/api"),
    )
}

pub fn prepare_backend(
    runner: &dyn Runner,
    layout: &Layout,
    settings: &BackendSettings,
) -> Result<EnvFileOutcome, DeployError> {
    info!("=== Preparing backend ===");
    prepare_tier(runner, &layout.backend, &settings.env_values())
}

pub fn prepare_frontend(
    runner: &dyn Runner,
    layout: &Layout,
    backend_port: u16,
) -> Result<EnvFileOutcome, DeployError> {
    info!("=== Preparing frontend ===");
    prepare_tier(runner, &layout.frontend, &frontend_env_values(backend_port))
}

fn prepare_tier(
    runner: &dyn Runner,
    dir: &Path,
    values: &EnvValues,
) -> Result<EnvFileOutcome, DeployError> {
    require_tool(runner, PACKAGE_MANAGER)?;
    let outcome = write_env_file(&dir.join(".env"), values)?;
    runner.run(&CommandSpec::new(PACKAGE_MANAGER).arg("install").current_dir(dir))?;
    Ok(outcome)
}

pub fn build_frontend(runner: &dyn Runner, layout: &Layout) -> Result<(), DeployError> {
    runner.run(
        &CommandSpec::new(PACKAGE_MANAGER)
            .args(["run", "build"])
            .current_dir(&layout.frontend),
    )?;
    Ok(())
}

pub fn backend_start_command(layout: &Layout) -> CommandSpec {
    CommandSpec::new(PACKAGE_MANAGER)
        .arg("start")
        .current_dir(&layout.backend)
}

pub fn frontend_preview_command(layout: &Layout, port: u16) -> CommandSpec {
    CommandSpec::new(PACKAGE_MANAGER)
        .args(["run", "preview", "--", "--host", "0.0.0.0", "--port"])
        .arg(port.to_string())
        .current_dir(&layout.frontend)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        BackendSettings, Layout, build_frontend, frontend_preview_command, prepare_backend,
        prepare_frontend,
    };
    use crate::command::testing::RecordingRunner;
    use crate::env_file::EnvFileOutcome;
    use crate::error::DeployError;

    fn layout() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let layout = Layout::new(dir.path());
        fs::create_dir_all(&layout.backend).unwrap();
        fs::create_dir_all(&layout.frontend).unwrap();
        (dir, layout)
    }

    fn settings() -> BackendSettings {
        BackendSettings {
            port: 3000,
            db_uri: "mongodb://db".into(),
            jwt_secret: "s3cret".into(),
            admin_email: "admin@example.com".into(),
            admin_password: "ChangeMe123!".into(),
        }
    }

    #[test]
    fn repo_root_requires_git_directory() {
        let (dir, layout) = layout();
        assert!(matches!(
            layout.ensure_repo_root(),
            Err(DeployError::WrongDirectory(_))
        ));
        fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(layout.ensure_repo_root().is_ok());
    }

    #[test]
    fn backend_env_file_and_install() {
        let (_dir, layout) = layout();
        let runner = RecordingRunner::with_tools(&["npm"]);

        let outcome = prepare_backend(&runner, &layout, &settings()).unwrap();

        assert_eq!(outcome, EnvFileOutcome::Created);
        assert_eq!(
            fs::read_to_string(layout.backend.join(".env")).unwrap(),
            "PORT=3000\nMONGO_URI=mongodb://db\nJWT_SECRET=s3cret\nACCESS_TOKEN_TTL=3600\n\
             REFRESH_TOKEN_TTL=604800\nADMIN_EMAIL=admin@example.com\nADMIN_PASSWORD=ChangeMe123!\n"
        );
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].display(), "npm install");
        assert_eq!(calls[0].cwd.as_deref(), Some(layout.backend.as_path()));
    }

    #[test]
    fn frontend_points_at_backend_port() {
        let (_dir, layout) = layout();
        let runner = RecordingRunner::with_tools(&["npm"]);

        prepare_frontend(&runner, &layout, 3100).unwrap();
        build_frontend(&runner, &layout).unwrap();

        assert_eq!(
            fs::read_to_string(layout.frontend.join(".env")).unwrap(),
            "VITE_API_BASE_URL=http://localhost:3100/api\n"
        );
        assert_eq!(runner.command_lines(), vec!["npm install", "npm run build"]);
    }

    #[test]
    fn missing_package_manager_writes_nothing() {
        let (_dir, layout) = layout();
        let runner = RecordingRunner::with_tools(&["node"]);

        let err = prepare_backend(&runner, &layout, &settings()).expect_err("npm is missing");

        assert!(matches!(err, DeployError::MissingTool(ref tool) if tool == "npm"));
        assert!(!layout.backend.join(".env").exists());
        assert!(runner.command_lines().is_empty());
    }

    #[test]
    fn preview_binds_all_interfaces() {
        let (_dir, layout) = layout();
        let spec = frontend_preview_command(&layout, 4173);
        assert_eq!(
            spec.display(),
            "npm run preview -- --host 0.0.0.0 --port 4173"
        );
        assert_eq!(spec.cwd.as_deref(), Some(layout.frontend.as_path()));
    }
}
