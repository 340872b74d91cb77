//! # vessel — privileged container setup CLI
//!
//! Resolves a container image, establishes namespace and rootfs
//! isolation, and hands off to an in-container action or a bootstrap
//! build. Privileges are checked and dropped before anything else runs.

mod action;
mod commands;

use std::path::Path;

use clap::Parser;
use vessel_common::config::SystemConfig;
use vessel_common::constants;
use vessel_common::error::VesselError;
use vessel_core::privilege::PrivilegeSet;

use crate::commands::Cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        let status = err
            .downcast_ref::<VesselError>()
            .map_or(255, VesselError::exit_status);
        eprintln!("{}: {err:#}", constants::BIN_NAME);
        std::process::exit(status);
    }
}

fn run() -> anyhow::Result<()> {
    // Before anything else: check privileges and drop permission. No
    // user-influenced code may run before the drop.
    let config_path = Path::new(constants::SYSTEM_CONFIG_PATH);
    let (config, trusted_path) = if config_path.is_file() {
        (SystemConfig::load(config_path)?, Some(config_path))
    } else {
        tracing::debug!(config = %config_path.display(), "no system config, using defaults");
        (SystemConfig::default(), None)
    };
    let mut privilege = PrivilegeSet::init(&config, trusted_path)?;
    privilege.drop_privileges()?;

    // The wire contract lets a wrapper select the action workflow through
    // the environment instead of a subcommand.
    if let Some(kind) = action::kind_from_env() {
        let image = std::env::var_os(constants::env::IMAGE).ok_or_else(|| {
            VesselError::Config {
                message: format!("{} not defined", constants::env::IMAGE),
            }
        })?;
        let args: Vec<String> = std::env::args().skip(1).collect();
        return commands::action::execute(kind, image.into(), args, config, privilege)
            .map_err(Into::into);
    }

    let cli = Cli::parse();
    commands::execute(cli, config, privilege).map_err(Into::into)
}
