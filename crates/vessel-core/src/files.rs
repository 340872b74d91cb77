//! File staging and bind-mount collaborators.
//!
//! Everything here runs before the terminal chroot, while the host
//! filesystem is still reachable: copying host identity files into the
//! rootfs and applying configured host→container bind mounts.

use std::path::{Path, PathBuf};

use vessel_common::config::SystemConfig;
use vessel_common::constants;
use vessel_common::error::{Result, VesselError};

use crate::namespace::NamespaceSet;
use crate::privilege::PrivilegeSet;

/// Writes `contents` to `path` and forces its permission mode.
///
/// # Errors
///
/// Returns an error if the write or chmod fails.
pub fn install_file(path: &Path, contents: &str, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, contents).map_err(|e| VesselError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

/// Copies a host file into the rootfs at the same relative path.
///
/// # Errors
///
/// Returns an error if the copy fails.
pub fn copy_host_file(rootfs: &Path, host_path: &str) -> Result<()> {
    let dest = rootfs.join(host_path.trim_start_matches('/'));
    let _ = std::fs::copy(host_path, &dest).map_err(|e| VesselError::Io {
        path: dest.clone(),
        source: e,
    })?;
    tracing::debug!(source = host_path, dest = %dest.display(), "copied host file");
    Ok(())
}

/// Installs the network identity files and the mtab stub into the rootfs.
///
/// `/etc/hosts` and `/etc/resolv.conf` are copied from the host; any
/// existing `/etc/mtab` is replaced by a stub describing the container
/// root as an ext3-like mount.
///
/// # Errors
///
/// Returns an error if any copy or write fails. The bootstrap engine
/// treats that as fatal — an incompletely skeletoned rootfs cannot
/// safely continue.
pub fn install_identity_files(rootfs: &Path) -> Result<()> {
    copy_host_file(rootfs, "/etc/hosts")?;
    copy_host_file(rootfs, "/etc/resolv.conf")?;

    let mtab = rootfs.join("etc/mtab");
    if mtab.exists() {
        std::fs::remove_file(&mtab).map_err(|e| VesselError::Io {
            path: mtab.clone(),
            source: e,
        })?;
    }
    install_file(
        &mtab,
        &format!("{} / rootfs rw 0 0\n", constants::APP_NAME),
        0o644,
    )
}

/// Stages the remaining default host files into the rootfs.
///
/// User and group databases are needed by most build scripts; absence of
/// one on the host is a host configuration error.
///
/// # Errors
///
/// Returns an error if a copy fails.
pub fn stage_default_files(rootfs: &Path) -> Result<()> {
    copy_host_file(rootfs, "/etc/passwd")?;
    copy_host_file(rootfs, "/etc/group")?;
    Ok(())
}

/// A host→container bind mount request.
#[derive(Debug, Clone)]
pub struct BindMount {
    /// Source path on the host.
    pub source: PathBuf,
    /// Target path relative to the rootfs.
    pub target: PathBuf,
}

/// Builds the bind-mount list from the configuration's `bind path`
/// entries, in declaration order.
///
/// Each entry is `source` or `source:target`; with no explicit target the
/// host path is bound at the same location inside the container.
#[must_use]
pub fn configured_bind_mounts(config: &SystemConfig) -> Vec<BindMount> {
    config
        .bind_paths
        .iter()
        .map(|entry| {
            let (source, target) = entry
                .split_once(':')
                .map_or((entry.as_str(), entry.as_str()), |(s, t)| (s, t));
            BindMount {
                source: PathBuf::from(source),
                target: PathBuf::from(target),
            }
        })
        .collect()
}

/// Applies the configured bind mounts into the rootfs.
///
/// Must run before chroot; the privilege guard spans only the mount
/// syscalls.
///
/// # Errors
///
/// Returns an error if a target cannot be created or a mount fails.
pub fn apply_bind_mounts(
    rootfs: &Path,
    binds: &[BindMount],
    ns: &NamespaceSet,
    privilege: &mut PrivilegeSet,
) -> Result<()> {
    for bind in binds {
        let target = rootfs.join(bind.target.strip_prefix("/").unwrap_or(&bind.target));
        std::fs::create_dir_all(&target).map_err(|e| VesselError::Io {
            path: target.clone(),
            source: e,
        })?;
        if ns.user_unshared() {
            bind_mount(&bind.source, &target)?;
        } else {
            let _guard = privilege.escalate()?;
            bind_mount(&bind.source, &target)?;
        }
        tracing::debug!(
            source = %bind.source.display(),
            target = %target.display(),
            "applied bind mount"
        );
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn bind_mount(source: &Path, target: &Path) -> Result<()> {
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

#[cfg(not(target_os = "linux"))]
fn bind_mount(_source: &Path, target: &Path) -> Result<()> {
    Err(VesselError::Rootfs {
        path: target.to_path_buf(),
        message: "bind mounts require Linux".into(),
    })
}
