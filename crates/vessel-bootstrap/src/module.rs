//! Base-OS bootstrap modules.
//!
//! The `Bootstrap` header key selects exactly one module; each variant is
//! responsible for populating an otherwise-empty rootfs with a minimal OS
//! tree before the generic install steps run. The module set is a closed
//! enumeration: adding one means adding a variant, never another string
//! comparison at a call site. The backends themselves are external helper
//! scripts; this crate only dispatches to them.

use std::path::{Path, PathBuf};

use vessel_common::constants;
use vessel_common::error::{Result, VesselError};
use vessel_core::exec;

/// Base-OS acquisition strategy named by the `Bootstrap` header key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapModule {
    /// Import a Docker image as the base tree.
    Docker,
    /// Install a Red Hat-style base with yum.
    Yum,
    /// Install a Debian-style base with debootstrap.
    Debootstrap,
    /// Install an Arch base with pacstrap.
    Arch,
    /// Install a static busybox as the base tree.
    Busybox,
}

impl BootstrapModule {
    /// Resolves a `Bootstrap` header value to a module.
    ///
    /// Returns `None` for unrecognized names; the engine treats that as a
    /// fatal configuration error, distinct from an absent optional
    /// section.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "docker" => Some(Self::Docker),
            "yum" => Some(Self::Yum),
            "debootstrap" => Some(Self::Debootstrap),
            "arch" => Some(Self::Arch),
            "busybox" => Some(Self::Busybox),
            _ => None,
        }
    }

    /// Canonical lowercase name of the module.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Yum => "yum",
            Self::Debootstrap => "debootstrap",
            Self::Arch => "arch",
            Self::Busybox => "busybox",
        }
    }

    /// Path of the helper script implementing this module's backend.
    #[must_use]
    pub fn helper_path(self) -> PathBuf {
        Path::new(constants::MODULE_HELPER_DIR).join(format!("{}.sh", self.name()))
    }

    /// Populates the rootfs with a minimal base OS by delegating to the
    /// module's helper script, which receives the wire-contract
    /// environment.
    ///
    /// A missing helper is logged and skipped — the definition's `%setup`
    /// and `%post` sections may provide the tree instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the helper exists but cannot be spawned or
    /// exits non-zero.
    pub fn populate(self, env: &[(String, String)]) -> Result<()> {
        let helper = self.helper_path();
        if !helper.is_file() {
            tracing::warn!(
                module = self.name(),
                helper = %helper.display(),
                "module backend helper not installed, skipping base OS population"
            );
            return Ok(());
        }

        tracing::info!(module = self.name(), "running bootstrap module");
        let outcome = exec::run_command(
            vec!["/bin/sh".to_string(), helper.display().to_string()],
            env,
        )?;
        if outcome.success() {
            Ok(())
        } else {
            Err(VesselError::Exec {
                command: helper.display().to_string(),
                message: format!("module backend exited with status {}", outcome.exit_code),
            })
        }
    }
}
