//! System-wide constants, default paths, and the environment wire contract.

/// Default path of the system configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/vessel/vessel.conf";

/// Base directory for helper scripts and packaged defaults.
pub const LIBEXEC_DIR: &str = "/usr/libexec/vessel";

/// Legacy V1 bootstrap driver script, invoked for V1 definition files.
pub const DRIVER_V1_PATH: &str = "/usr/libexec/vessel/bootstrap/driver-v1.sh";

/// Directory holding per-module bootstrap helper scripts.
pub const MODULE_HELPER_DIR: &str = "/usr/libexec/vessel/bootstrap/modules";

/// Packaged default `/environment` file installed when a definition
/// declares none.
pub const DEFAULT_ENVIRONMENT_PATH: &str = "/usr/libexec/vessel/defaults/environment";

/// Default size of a newly created loop image, in MiB.
pub const DEFAULT_IMAGE_SIZE_MIB: u64 = 768;

/// Environment variables forming the wire contract with scripts and the
/// legacy V1 driver. The names are kept verbatim for compatibility with
/// existing definition files and drivers.
pub mod env {
    /// Resolved rootfs mount-point path.
    pub const ROOTFS: &str = "SINGULARITY_ROOTFS";
    /// Original container image path argument.
    pub const IMAGE: &str = "SINGULARITY_IMAGE";
    /// Path to the bootstrap definition file.
    pub const BUILDDEF: &str = "SINGULARITY_BUILDDEF";
    /// Workflow-selection signal consumed by the entry point.
    pub const COMMAND: &str = "SINGULARITY_COMMAND";
    /// User override requesting non-privileged operation.
    pub const NOSUID: &str = "SINGULARITY_NOSUID";
}

/// Definition-file section names interpreted by the bootstrap engine.
pub mod sections {
    /// Host-side script run before the base-OS module.
    pub const PRE: &str = "pre";
    /// Host-side script run after file staging, before chroot.
    pub const SETUP: &str = "setup";
    /// Script run inside the container after chroot.
    pub const POST: &str = "post";
    /// Test script installed into the container and run after `post`.
    pub const TEST: &str = "test";
    /// Container entry script installed at `/singularity`.
    pub const RUNSCRIPT: &str = "runscript";
    /// Environment file installed at `/environment`.
    pub const ENVIRONMENT: &str = "environment";
}

/// Header key selecting the bootstrap module; its absence marks a legacy
/// V1 definition.
pub const BOOTSTRAP_KEY: &str = "Bootstrap";

/// Application name used in CLI output and the mtab stub.
pub const APP_NAME: &str = "vessel";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "vessel";
