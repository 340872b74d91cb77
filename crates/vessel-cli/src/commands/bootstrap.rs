//! The bootstrap workflow: parse the definition, prepare isolation, and
//! hand the mounted rootfs to the execution engine.

use std::path::PathBuf;

use clap::Args;
use vessel_bootstrap::definition::BootstrapDefinition;
use vessel_bootstrap::engine::BootstrapEngine;
use vessel_common::config::SystemConfig;
use vessel_common::error::Result;
use vessel_core::invocation::ContainerInvocation;
use vessel_core::privilege::PrivilegeSet;

/// Arguments for `vessel bootstrap`.
#[derive(Args, Debug)]
pub struct BootstrapArgs {
    /// Container image to build into (directory or loop image file).
    pub image: PathBuf,

    /// Bootstrap definition file.
    pub definition: PathBuf,
}

/// Builds a container root filesystem from a definition file.
///
/// The definition is opened first as a sanity check; isolation and the
/// rootfs mount follow, and the engine drives everything after that.
///
/// # Errors
///
/// Returns an error if the definition cannot be read, isolation or
/// mounting fails, or the engine hits a fatal construction step.
pub fn execute(args: BootstrapArgs, config: SystemConfig, privilege: PrivilegeSet) -> Result<()> {
    tracing::info!(
        image = %args.image.display(),
        definition = %args.definition.display(),
        "preparing to bootstrap image"
    );
    let definition = BootstrapDefinition::open(&args.definition)?;

    let mut invocation = ContainerInvocation::prepare(config, privilege, &args.image)?;
    invocation.isolate()?;
    invocation.mount_rootfs()?;

    BootstrapEngine::new(&mut invocation, definition).run()
}
