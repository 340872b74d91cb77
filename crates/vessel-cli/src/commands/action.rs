//! The container action workflow: isolate, mount, check, stage, chroot,
//! hand off.

use std::path::PathBuf;

use clap::Args;
use vessel_common::config::SystemConfig;
use vessel_common::error::Result;
use vessel_core::files;
use vessel_core::invocation::ContainerInvocation;
use vessel_core::privilege::PrivilegeSet;

use crate::action::{self, ActionKind};

/// Arguments shared by the shell/exec/run/test subcommands.
#[derive(Args, Debug)]
pub struct ActionArgs {
    /// Container image path (directory or loop image file).
    #[arg(env = "SINGULARITY_IMAGE")]
    pub image: PathBuf,

    /// Arguments passed to the in-container action.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Entry point for the clap subcommands.
///
/// # Errors
///
/// Returns an error if any setup stage fails; on success the action
/// replaces the process and this never returns.
pub fn execute_args(
    kind: ActionKind,
    args: ActionArgs,
    config: SystemConfig,
    privilege: PrivilegeSet,
) -> Result<()> {
    execute(kind, args.image, args.args, config, privilege)
}

/// Runs the full action workflow against `image`.
///
/// Order is load-bearing: every host-side staging step must complete
/// before chroot, after which the host filesystem is unreachable.
///
/// # Errors
///
/// Returns an error if isolation, mounting, structure checks, staging,
/// or the final handoff fails. All of these are fatal for the workflow.
pub fn execute(
    kind: ActionKind,
    image: PathBuf,
    args: Vec<String>,
    config: SystemConfig,
    privilege: PrivilegeSet,
) -> Result<()> {
    action::init()?;

    let mut invocation = ContainerInvocation::prepare(config, privilege, &image)?;
    invocation.isolate()?;
    invocation.mount_rootfs()?;
    invocation.rootfs.check()?;

    // Default file staging while the host is still reachable.
    let rootfs_dir = invocation.rootfs.dir().to_path_buf();
    files::stage_default_files(&rootfs_dir)?;
    files::copy_host_file(&rootfs_dir, "/etc/hosts")?;
    files::copy_host_file(&rootfs_dir, "/etc/resolv.conf")?;
    let binds = files::configured_bind_mounts(&invocation.config);
    files::apply_bind_mounts(
        &rootfs_dir,
        &binds,
        &invocation.namespaces,
        &mut invocation.privilege,
    )?;

    invocation.chroot()?;

    let env = invocation.wire_env(None);
    match action::action_do(kind, args, &invocation.privilege, &env) {
        Ok(never) => match never {},
        Err(e) => Err(e),
    }
}
