//! The per-invocation context object.
//!
//! One [`ContainerInvocation`] is constructed at startup and passed
//! explicitly to every component; there is no process-wide mutable state.

use std::path::Path;

use vessel_common::config::SystemConfig;
use vessel_common::constants;
use vessel_common::error::Result;

use crate::image::ContainerImage;
use crate::namespace::NamespaceSet;
use crate::privilege::PrivilegeSet;
use crate::rootfs::Rootfs;
use crate::session::SessionDirectory;

/// Everything one invocation owns: privilege state, resolved image,
/// session directory, namespace tracker, and the rootfs handle.
#[derive(Debug)]
pub struct ContainerInvocation {
    /// System configuration loaded at startup.
    pub config: SystemConfig,
    /// Process privilege state.
    pub privilege: PrivilegeSet,
    /// Resolved container image.
    pub image: ContainerImage,
    /// Per-invocation scratch directory.
    pub session: SessionDirectory,
    /// Namespace unshare tracker.
    pub namespaces: NamespaceSet,
    /// Rootfs stage machine.
    pub rootfs: Rootfs,
}

impl ContainerInvocation {
    /// Resolves the image and allocates the session directory and rootfs
    /// mount point for this invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the image does not exist or the session
    /// directory cannot be created.
    pub fn prepare(
        config: SystemConfig,
        privilege: PrivilegeSet,
        image_path: &Path,
    ) -> Result<Self> {
        let image = ContainerImage::resolve(image_path)?;
        let session = SessionDirectory::init(&image, privilege.real_uid().as_raw())?;
        let rootfs = Rootfs::init(image.clone(), &session)?;
        Ok(Self {
            config,
            privilege,
            image,
            session,
            namespaces: NamespaceSet::new(),
            rootfs,
        })
    }

    /// Unshares the user and mount namespaces in the required order.
    ///
    /// # Errors
    ///
    /// Returns an error if an unshare fails; callers treat this as fatal.
    pub fn isolate(&mut self) -> Result<()> {
        self.namespaces.isolate(&mut self.privilege)
    }

    /// Mounts the image at the session rootfs mount point.
    ///
    /// # Errors
    ///
    /// Returns an error on stage or mount failure.
    pub fn mount_rootfs(&mut self) -> Result<()> {
        self.rootfs.mount(&self.namespaces, &mut self.privilege)
    }

    /// Performs the terminal chroot.
    ///
    /// # Errors
    ///
    /// Returns an error on stage or chroot failure.
    pub fn chroot(&mut self) -> Result<()> {
        self.rootfs.chroot(&self.namespaces, &mut self.privilege)
    }

    /// Environment variables forming the wire contract with scripts and
    /// the legacy driver, applied to every subprocess spawned afterward.
    #[must_use]
    pub fn wire_env(&self, builddef: Option<&Path>) -> Vec<(String, String)> {
        let mut env = vec![
            (
                constants::env::ROOTFS.to_string(),
                self.rootfs.dir().display().to_string(),
            ),
            (
                constants::env::IMAGE.to_string(),
                self.image.path().display().to_string(),
            ),
        ];
        if let Some(path) = builddef {
            env.push((
                constants::env::BUILDDEF.to_string(),
                path.display().to_string(),
            ));
        }
        env
    }
}
