//! CLI command definitions and dispatch.

pub mod action;
pub mod bootstrap;
pub mod create;

use clap::{Parser, Subcommand};
use vessel_common::config::SystemConfig;
use vessel_common::error::Result;
use vessel_core::privilege::PrivilegeSet;

use crate::action::ActionKind;

/// Vessel — privileged container setup runtime.
#[derive(Parser, Debug)]
#[command(name = "vessel", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Spawn an interactive shell inside a container.
    Shell(action::ActionArgs),
    /// Execute a command inside a container.
    Exec(action::ActionArgs),
    /// Run a container's installed entry script.
    Run(action::ActionArgs),
    /// Run a container's installed test script.
    Test(action::ActionArgs),
    /// Create and format a new loop container image.
    Create(create::CreateArgs),
    /// Build a container root filesystem from a definition file.
    Bootstrap(bootstrap::BootstrapArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli, config: SystemConfig, privilege: PrivilegeSet) -> Result<()> {
    match cli.command {
        Command::Shell(args) => action::execute_args(ActionKind::Shell, args, config, privilege),
        Command::Exec(args) => action::execute_args(ActionKind::Exec, args, config, privilege),
        Command::Run(args) => action::execute_args(ActionKind::Run, args, config, privilege),
        Command::Test(args) => action::execute_args(ActionKind::Test, args, config, privilege),
        Command::Create(args) => create::execute(args, privilege),
        Command::Bootstrap(args) => bootstrap::execute(args, config, privilege),
    }
}
