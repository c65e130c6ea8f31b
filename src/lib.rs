pub mod cli;
pub mod command;
pub mod database;
pub mod env_file;
pub mod error;
pub mod services;
pub mod supervisor;

/// Run the command line interface and return an exit code.
pub fn run_cli() -> i32 {
    cli::run()
}
