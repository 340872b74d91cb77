//! User and mount namespace isolation.
//!
//! All mounts performed by the setup pipeline live inside a private mount
//! namespace, so process exit tears them down and the host mount table is
//! never modified. Ordering is strict: when both namespaces are requested
//! the user namespace must be unshared first, because mount-namespace
//! operations inside an unprivileged user namespace require the UID/GID
//! mapping established there.

use vessel_common::error::{Result, VesselError};

use crate::privilege::PrivilegeSet;

/// Tracks which namespaces this invocation has unshared.
#[derive(Debug, Default)]
pub struct NamespaceSet {
    user: bool,
    mount: bool,
}

impl NamespaceSet {
    /// Creates a tracker with no namespaces unshared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the mount namespace has been unshared.
    ///
    /// The rootfs manager refuses to mount until this returns true.
    #[must_use]
    pub const fn mount_unshared(&self) -> bool {
        self.mount
    }

    /// Whether the user namespace has been unshared.
    #[must_use]
    pub const fn user_unshared(&self) -> bool {
        self.user
    }

    /// Unshares the user namespace and maps the invoking user to root
    /// inside it.
    ///
    /// Skipped when the invoker is already root or escalation is
    /// available through the privileged install: those paths perform
    /// mounts with real capability and need no identity mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount namespace was unshared first, or if
    /// the unshare syscall or the UID/GID map writes fail.
    pub fn unshare_user(&mut self, privilege: &PrivilegeSet) -> Result<()> {
        if self.mount {
            return Err(VesselError::Namespace {
                message: "user namespace must be unshared before the mount namespace".into(),
            });
        }
        if privilege.escalation_allowed() {
            tracing::debug!("skipping user namespace, invocation has escalation capability");
            return Ok(());
        }
        unshare_user_ns(privilege.real_uid().as_raw())?;
        self.user = true;
        tracing::debug!("user namespace created");
        Ok(())
    }

    /// Unshares the mount namespace and makes `/` recursively private.
    ///
    /// Outside a user namespace this requires escalation; failure to
    /// obtain it is fatal — the pipeline never falls back to operating in
    /// the host's mount namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if escalation is denied or a syscall fails.
    pub fn unshare_mount(&mut self, privilege: &mut PrivilegeSet) -> Result<()> {
        if self.mount {
            return Err(VesselError::Namespace {
                message: "mount namespace already unshared".into(),
            });
        }
        if self.user {
            // Root inside the user namespace; no escalation needed.
            unshare_mount_ns()?;
        } else {
            let _guard = privilege.escalate()?;
            unshare_mount_ns()?;
        }
        self.mount = true;
        tracing::debug!("mount namespace created, root made recursively private");
        Ok(())
    }

    /// Unshares both namespaces in the required order.
    ///
    /// # Errors
    ///
    /// Returns an error if either unshare fails.
    pub fn isolate(&mut self, privilege: &mut PrivilegeSet) -> Result<()> {
        self.unshare_user(privilege)?;
        self.unshare_mount(privilege)
    }
}

#[cfg(target_os = "linux")]
fn unshare_user_ns(host_uid: u32) -> Result<()> {
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWUSER).map_err(|e| VesselError::Namespace {
        message: format!("user namespace creation failed: {e}"),
    })?;
    write_id_maps(host_uid)
}

/// Maps root inside the namespace to the invoking host user.
///
/// `setgroups` must be denied before an unprivileged process may write
/// its own `gid_map`.
#[cfg(target_os = "linux")]
fn write_id_maps(host_uid: u32) -> Result<()> {
    use std::fs;
    use std::path::PathBuf;

    let write = |name: &str, contents: &str| -> Result<()> {
        let path = PathBuf::from("/proc/self").join(name);
        fs::write(&path, contents).map_err(|e| VesselError::Io { path, source: e })
    };

    write("setgroups", "deny")?;
    let map = format!("0 {host_uid} 1");
    write("uid_map", &map)?;
    write("gid_map", &map)?;
    tracing::debug!(host_uid, "wrote UID/GID map");
    Ok(())
}

#[cfg(target_os = "linux")]
fn unshare_mount_ns() -> Result<()> {
    use nix::mount::{MsFlags, mount};
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| VesselError::Namespace {
        message: format!("mount namespace creation failed: {e}"),
    })?;
    // Without this, a shared-propagation host root would leak container
    // mounts back to the host table.
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| VesselError::Namespace {
        message: format!("could not make / recursively private: {e}"),
    })
}

#[cfg(not(target_os = "linux"))]
fn unshare_user_ns(_host_uid: u32) -> Result<()> {
    Err(VesselError::Namespace {
        message: "namespace isolation requires Linux".into(),
    })
}

#[cfg(not(target_os = "linux"))]
fn unshare_mount_ns() -> Result<()> {
    Err(VesselError::Namespace {
        message: "namespace isolation requires Linux".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_set_has_nothing_unshared() {
        let ns = NamespaceSet::new();
        assert!(!ns.user_unshared());
        assert!(!ns.mount_unshared());
    }

    #[test]
    fn user_after_mount_is_rejected() {
        let mut ns = NamespaceSet {
            user: false,
            mount: true,
        };
        // Ordering violation must surface before any syscall, so the
        // privilege set is irrelevant here; build a minimal one.
        let config = vessel_common::config::SystemConfig::default();
        let privilege =
            crate::privilege::PrivilegeSet::init(&config, None).expect("init should pass");
        let err = ns.unshare_user(&privilege).expect_err("should fail");
        assert!(matches!(err, VesselError::Namespace { .. }));
    }

    #[test]
    fn double_mount_unshare_is_rejected() {
        let mut ns = NamespaceSet {
            user: true,
            mount: true,
        };
        let config = vessel_common::config::SystemConfig::default();
        let mut privilege =
            crate::privilege::PrivilegeSet::init(&config, None).expect("init should pass");
        let err = ns.unshare_mount(&mut privilege).expect_err("should fail");
        assert!(matches!(err, VesselError::Namespace { .. }));
    }
}
