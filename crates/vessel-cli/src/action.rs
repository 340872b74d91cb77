//! Action dispatcher entry point.
//!
//! Called only after chroot. On success the exec-style handoff replaces
//! the process image and never returns; errors surface only when the
//! replacement itself fails. Internal action behavior beyond this entry
//! point lives in the installed container scripts.

use std::convert::Infallible;

use vessel_common::constants;
use vessel_common::error::{Result, VesselError};
use vessel_core::exec;
use vessel_core::privilege::PrivilegeSet;

/// The in-container action requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Interactive shell inside the container.
    Shell,
    /// Execute an arbitrary user command.
    Exec,
    /// Run the container's installed `/singularity` entry script.
    Run,
    /// Run the container's installed `/.test` script.
    Test,
}

impl ActionKind {
    /// Parses a workflow-selection value.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "shell" => Some(Self::Shell),
            "exec" => Some(Self::Exec),
            "run" => Some(Self::Run),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

/// Reads the workflow-selection environment variable.
///
/// Unrecognized values are ignored with a warning so a stale wrapper
/// cannot hijack argument parsing.
#[must_use]
pub fn kind_from_env() -> Option<ActionKind> {
    let value = std::env::var(constants::env::COMMAND).ok()?;
    let kind = ActionKind::from_name(&value);
    if kind.is_none() {
        tracing::warn!(value, "ignoring unrecognized workflow selection");
    }
    kind
}

/// Pre-setup hook for the action workflow.
///
/// # Errors
///
/// Currently infallible; kept fallible for parity with the other
/// workflow entry points.
pub fn init() -> Result<()> {
    tracing::debug!("action workflow initialized");
    Ok(())
}

/// Executes the requested action inside the chrooted environment.
///
/// Replaces the process image; does not return on success.
///
/// # Errors
///
/// Returns an error if `exec` was requested without a command or the
/// process replacement fails.
pub fn action_do(
    kind: ActionKind,
    args: Vec<String>,
    privilege: &PrivilegeSet,
    env: &[(String, String)],
) -> Result<Infallible> {
    privilege.assert_user_context();

    let mut argv = match kind {
        ActionKind::Shell => vec!["/bin/sh".to_string()],
        ActionKind::Run => vec!["/singularity".to_string()],
        ActionKind::Test => vec!["/bin/sh".to_string(), "/.test".to_string()],
        ActionKind::Exec => {
            if args.is_empty() {
                return Err(VesselError::Config {
                    message: "exec action requires a command".into(),
                });
            }
            Vec::new()
        }
    };
    argv.extend(args);

    tracing::info!(?kind, command = %argv[0], "handing off to container action");
    exec::exec_replace(argv, env)
}
