use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::command::{Runner, SystemRunner, require_tool};
use crate::database::{DatabaseDefaults, DbMode, provision};
use crate::env_file::EnvFileOutcome;
use crate::error::DeployError;
use crate::services::{
    BackendSettings, INSECURE_JWT_SECRET, Layout, backend_start_command, build_frontend,
    frontend_preview_command, prepare_backend, prepare_frontend,
};
use crate::supervisor::{Supervisor, SupervisorOutcome, install_signal_handler};

#[derive(Debug, Parser)]
#[command(
    name = "demo-deployer",
    version,
    about = "Prepare and launch the backend and frontend for a local demo"
)]
pub struct Cli {
    /// How to get a database: create/start a container, use --db-uri, or assume one is running
    #[arg(long, alias = "mongo-mode", value_enum, default_value_t = DbMode::Docker)]
    pub db_mode: DbMode,

    /// Database connection string for --db-mode uri or skip
    #[arg(long, alias = "mongo-uri")]
    pub db_uri: Option<String>,

    /// Port the backend listens on
    #[arg(long, default_value_t = 3000)]
    pub backend_port: u16,

    /// Port for the frontend preview server
    #[arg(long, default_value_t = 4173)]
    pub frontend_port: u16,

    /// Email of the initial admin user
    #[arg(long, default_value = "admin@example.com")]
    pub admin_email: String,

    /// Password of the initial admin user
    #[arg(long, default_value = "ChangeMe123!")]
    pub admin_password: String,

    /// Secret used by the backend to sign tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true, default_value = INSECURE_JWT_SECRET)]
    pub jwt_secret: String,

    /// Do not run the frontend production build
    #[arg(long)]
    pub skip_build: bool,

    /// Prepare everything but do not start the services
    #[arg(long)]
    pub no_start: bool,

    /// Repository root containing backend/ and frontend/
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Print the preparation summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
pub struct PreparationSummary {
    pub db_mode: DbMode,
    pub db_uri: String,
    pub backend_port: u16,
    pub frontend_port: u16,
    pub backend_env: EnvFileOutcome,
    pub frontend_env: EnvFileOutcome,
    pub built_frontend: bool,
}

/// Parse arguments, run the deployment and return the process exit code.
pub fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() { 1 } else { 0 };
        }
    };

    init_tracing(cli.verbose);

    match execute(&cli, &SystemRunner) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

fn init_tracing(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("info")
            }
        }))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute(cli: &Cli, runner: &dyn Runner) -> Result<(), DeployError> {
    let layout = Layout::new(&cli.root);
    layout.ensure_repo_root()?;
    require_tool(runner, "node")?;

    let summary = prepare(cli, runner, &layout, &DatabaseDefaults::default())?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if cli.no_start {
        info!("Preparation complete. Start the services manually whenever you like.");
        return Ok(());
    }

    start_services(cli, &layout)
}

/// Everything up to launching the services.
pub fn prepare(
    cli: &Cli,
    runner: &dyn Runner,
    layout: &Layout,
    defaults: &DatabaseDefaults,
) -> Result<PreparationSummary, DeployError> {
    let db_uri = provision(runner, cli.db_mode, cli.db_uri.as_deref(), defaults)?;

    let backend_env = prepare_backend(
        runner,
        layout,
        &BackendSettings {
            port: cli.backend_port,
            db_uri: db_uri.clone(),
            jwt_secret: cli.jwt_secret.clone(),
            admin_email: cli.admin_email.clone(),
            admin_password: cli.admin_password.clone(),
        },
    )?;
    let frontend_env = prepare_frontend(runner, layout, cli.backend_port)?;

    if !cli.skip_build {
        build_frontend(runner, layout)?;
    }

    Ok(PreparationSummary {
        db_mode: cli.db_mode,
        db_uri,
        backend_port: cli.backend_port,
        frontend_port: cli.frontend_port,
        backend_env,
        frontend_env,
        built_frontend: !cli.skip_build,
    })
}

fn start_services(cli: &Cli, layout: &Layout) -> Result<(), DeployError> {
    let shutdown = install_signal_handler().map_err(DeployError::Supervisor)?;
    let supervisor = Supervisor::launch(
        &backend_start_command(layout),
        &frontend_preview_command(layout, cli.frontend_port),
    )
    .map_err(DeployError::Supervisor)?;
    info!("Processes started. Press Ctrl+C to stop them.");

    let outcome = supervisor
        .supervise(&shutdown)
        .map_err(DeployError::Supervisor)?;
    match outcome {
        SupervisorOutcome::Completed(_) => info!("Backend and frontend have exited"),
        SupervisorOutcome::ShutDown(reports) => {
            for report in reports {
                info!(
                    "{} stopped ({}{})",
                    report.name,
                    report.status,
                    if report.forced { ", killed" } else { "" }
                );
            }
        }
    }
    Ok(())
}
