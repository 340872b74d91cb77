//! Rootfs manager: mount, structure check, and the terminal chroot.
//!
//! The rootfs advances through a strictly forward stage machine:
//! `Initialized → Mounted → Checked → Chrooted`. No stage may be skipped;
//! `check` may repeat (idempotent repair). All mounts happen inside the
//! invocation's private mount namespace, so process exit unmounts them
//! and the host filesystem is never modified.

use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};

use crate::image::{ContainerImage, ImageKind};
use crate::namespace::NamespaceSet;
use crate::privilege::PrivilegeSet;
use crate::session::SessionDirectory;

/// Standard top-level rootfs directories and their permission modes.
///
/// Temp directories are world-writable with the sticky bit, `/root` is
/// restricted, everything else is world-readable.
pub const SKELETON_DIRS: &[(&str, u32)] = &[
    ("bin", 0o755),
    ("dev", 0o755),
    ("etc", 0o755),
    ("home", 0o755),
    ("proc", 0o755),
    ("root", 0o750),
    ("sys", 0o755),
    ("tmp", 0o1777),
    ("var/tmp", 0o1777),
];

/// Setup stage of the rootfs. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RootfsStage {
    /// Mount point resolved, nothing mounted.
    Initialized,
    /// Image mounted at the mount point.
    Mounted,
    /// Structure validated and repaired.
    Checked,
    /// Process root switched to the mount point; terminal.
    Chrooted,
}

/// Handle to the container root filesystem for one invocation.
#[derive(Debug)]
pub struct Rootfs {
    image: ContainerImage,
    mount_point: PathBuf,
    stage: RootfsStage,
}

impl Rootfs {
    /// Resolves `image` to a concrete mount point inside the session
    /// directory. Pure resolution; the only side effect is creating the
    /// empty mount-point directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount-point directory cannot be created.
    pub fn init(image: ContainerImage, session: &SessionDirectory) -> Result<Self> {
        let mount_point = session.rootfs_mount_point();
        std::fs::create_dir_all(&mount_point).map_err(|e| VesselError::Io {
            path: mount_point.clone(),
            source: e,
        })?;
        tracing::debug!(mount_point = %mount_point.display(), "rootfs initialized");
        Ok(Self {
            image,
            mount_point,
            stage: RootfsStage::Initialized,
        })
    }

    /// Resolved mount-point path.
    ///
    /// Exported to subprocesses as `SINGULARITY_ROOTFS`.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.mount_point
    }

    /// Current setup stage.
    #[must_use]
    pub const fn stage(&self) -> RootfsStage {
        self.stage
    }

    /// Mounts the image at the mount point.
    ///
    /// Requires an unshared mount namespace; refusing to mount in the
    /// host namespace is what keeps the host mount table clean. The
    /// privilege guard spans only the mount syscalls.
    ///
    /// # Errors
    ///
    /// Returns an error on a stage violation, a missing mount namespace,
    /// denied escalation, or a failed mount.
    pub fn mount(&mut self, ns: &NamespaceSet, privilege: &mut PrivilegeSet) -> Result<()> {
        self.require_stage(RootfsStage::Initialized, "mount")?;
        if !ns.mount_unshared() {
            return Err(VesselError::Rootfs {
                path: self.mount_point.clone(),
                message: "refusing to mount outside a private mount namespace".into(),
            });
        }

        match self.image.kind() {
            ImageKind::Directory => {
                let source = self.image.path().to_path_buf();
                self.privileged(ns, privilege, |rootfs| {
                    bind_mount_dir(&source, &rootfs.mount_point)
                })?;
            }
            ImageKind::LoopFile => {
                let device = crate::image::bind_loop_device(self.image.path(), privilege)?;
                self.privileged(ns, privilege, |rootfs| {
                    mount_loop_fs(&device, &rootfs.mount_point)
                })?;
            }
        }

        self.stage = RootfsStage::Mounted;
        tracing::info!(mount_point = %self.mount_point.display(), "rootfs mounted");
        Ok(())
    }

    /// Validates and repairs the mounted tree's minimum structure.
    ///
    /// Missing skeleton directories are created with their standard
    /// modes. Idempotent: repeated calls produce an identical state.
    ///
    /// # Errors
    ///
    /// Returns an error if called before `mount` or after `chroot`, or if
    /// a directory cannot be created or its mode set.
    pub fn check(&mut self) -> Result<()> {
        if self.stage < RootfsStage::Mounted || self.stage == RootfsStage::Chrooted {
            return Err(self.stage_error("check"));
        }
        install_skeleton_dirs(&self.mount_point)?;
        self.stage = RootfsStage::Checked;
        tracing::debug!(mount_point = %self.mount_point.display(), "rootfs structure checked");
        Ok(())
    }

    /// Switches the process root to the mount point. Terminal and
    /// irreversible for the invocation.
    ///
    /// Every host-side bind mount must already be in place: after this
    /// call the host filesystem namespace is no longer reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the rootfs has not been checked or the chroot
    /// syscall fails.
    pub fn chroot(&mut self, ns: &NamespaceSet, privilege: &mut PrivilegeSet) -> Result<()> {
        self.require_stage(RootfsStage::Checked, "chroot")?;
        self.privileged(ns, privilege, |rootfs| {
            chroot_syscall(&rootfs.mount_point)
        })?;
        self.stage = RootfsStage::Chrooted;
        tracing::info!("entered container root");
        Ok(())
    }

    /// Runs `op` with escalated identity unless the invocation is root
    /// inside its own user namespace, where escalation is unnecessary.
    fn privileged<F>(
        &self,
        ns: &NamespaceSet,
        privilege: &mut PrivilegeSet,
        op: F,
    ) -> Result<()>
    where
        F: FnOnce(&Self) -> Result<()>,
    {
        if ns.user_unshared() {
            op(self)
        } else {
            let guard = privilege.escalate()?;
            let result = op(self);
            drop(guard);
            result
        }
    }

    fn require_stage(&self, expected: RootfsStage, operation: &str) -> Result<()> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(self.stage_error(operation))
        }
    }

    fn stage_error(&self, operation: &str) -> VesselError {
        VesselError::Rootfs {
            path: self.mount_point.clone(),
            message: format!("{operation} not valid in stage {:?}", self.stage),
        }
    }

    /// Builds a handle at an arbitrary stage, bypassing the mount path.
    /// Support for state-machine tests; not part of the setup pipeline.
    #[doc(hidden)]
    #[must_use]
    pub fn at_stage(image: ContainerImage, mount_point: PathBuf, stage: RootfsStage) -> Self {
        Self {
            image,
            mount_point,
            stage,
        }
    }
}

/// Creates the skeleton directories under `root` with their modes.
///
/// Shared by `check` and the bootstrap engine's skeleton install.
///
/// # Errors
///
/// Returns an error if a directory cannot be created or chmodded.
pub fn install_skeleton_dirs(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for (name, mode) in SKELETON_DIRS {
        let path = root.join(name);
        std::fs::create_dir_all(&path).map_err(|e| VesselError::Io {
            path: path.clone(),
            source: e,
        })?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(*mode)).map_err(|e| {
            VesselError::Io {
                path: path.clone(),
                source: e,
            }
        })?;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn bind_mount_dir(source: &Path, target: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| VesselError::Rootfs {
        path: target.to_path_buf(),
        message: format!("bind mount of {} failed: {e}", source.display()),
    })
}

#[cfg(target_os = "linux")]
fn mount_loop_fs(device: &str, target: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        Some(device),
        target,
        Some("ext3"),
        MsFlags::MS_NOSUID,
        None::<&str>,
    )
    .map_err(|e| VesselError::Rootfs {
        path: target.to_path_buf(),
        message: format!("loop mount of {device} failed: {e}"),
    })
}

#[cfg(target_os = "linux")]
fn chroot_syscall(target: &Path) -> Result<()> {
    nix::unistd::chroot(target).map_err(|e| VesselError::Rootfs {
        path: target.to_path_buf(),
        message: format!("chroot failed: {e}"),
    })?;
    nix::unistd::chdir("/").map_err(|e| VesselError::Rootfs {
        path: PathBuf::from("/"),
        message: format!("chdir after chroot failed: {e}"),
    })
}

#[cfg(not(target_os = "linux"))]
fn bind_mount_dir(_source: &Path, target: &Path) -> Result<()> {
    Err(VesselError::Rootfs {
        path: target.to_path_buf(),
        message: "rootfs assembly requires Linux".into(),
    })
}

#[cfg(not(target_os = "linux"))]
fn mount_loop_fs(_device: &str, target: &Path) -> Result<()> {
    Err(VesselError::Rootfs {
        path: target.to_path_buf(),
        message: "rootfs assembly requires Linux".into(),
    })
}

#[cfg(not(target_os = "linux"))]
fn chroot_syscall(target: &Path) -> Result<()> {
    Err(VesselError::Rootfs {
        path: target.to_path_buf(),
        message: "rootfs assembly requires Linux".into(),
    })
}
