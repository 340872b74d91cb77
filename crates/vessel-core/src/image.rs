//! Container image resolution and loop-image creation.
//!
//! An image is either a plain directory tree or a loop-backed filesystem
//! file. Resolution is pure: it validates the path and classifies the
//! kind, with no side effects. The on-disk loop container format itself
//! is external; creation here only allocates, binds, and formats.

use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};

use crate::exec;
use crate::privilege::PrivilegeSet;

/// How a container image is backed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// A plain directory tree used via bind mount.
    Directory,
    /// A filesystem image file used via loop mount.
    LoopFile,
}

/// A resolved container image. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct ContainerImage {
    path: PathBuf,
    kind: ImageKind,
}

impl ContainerImage {
    /// Resolves `path` to an image, classifying directory vs loop file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or is neither a
    /// directory nor a regular file.
    pub fn resolve(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|_| VesselError::NotFound {
            kind: "container image",
            id: path.display().to_string(),
        })?;
        let kind = if meta.is_dir() {
            ImageKind::Directory
        } else if meta.is_file() {
            ImageKind::LoopFile
        } else {
            return Err(VesselError::Config {
                message: format!("{} is not a directory or image file", path.display()),
            });
        };
        tracing::debug!(image = %path.display(), ?kind, "container image resolved");
        Ok(Self {
            path: path.to_path_buf(),
            kind,
        })
    }

    /// Image path as given at resolution.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backing kind of the image.
    #[must_use]
    pub const fn kind(&self) -> ImageKind {
        self.kind
    }
}

/// Allocates a new sparse loop image of `size_mib` MiB at `path` and
/// formats it with ext3.
///
/// Escalation spans only the loop binding and the format invocation.
///
/// # Errors
///
/// Returns an error if the path already exists, allocation fails, the
/// loop binding fails, or the filesystem format exits non-zero.
pub fn create_loop_image(
    path: &Path,
    size_mib: u64,
    privilege: &mut PrivilegeSet,
) -> Result<ContainerImage> {
    if path.exists() {
        return Err(VesselError::Config {
            message: format!("image {} already exists", path.display()),
        });
    }

    tracing::info!(image = %path.display(), size_mib, "creating image");
    let file = std::fs::File::create(path).map_err(|e| VesselError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    file.set_len(size_mib * 1024 * 1024)
        .map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    drop(file);

    let loop_device = bind_loop_device(path, privilege)?;

    let mkfs = locate_tool("mkfs.ext3")?;
    tracing::info!(device = %loop_device, "formatting image with filesystem");
    let outcome = {
        let _guard = privilege.escalate()?;
        exec::run_command(vec![mkfs, "-q".into(), loop_device.clone()], &[])?
    };
    if !outcome.success() {
        return Err(VesselError::Exec {
            command: "mkfs.ext3".into(),
            message: format!("exited with status {}", outcome.exit_code),
        });
    }

    ContainerImage::resolve(path)
}

/// Binds `path` to a free loop device and returns the device path.
///
/// # Errors
///
/// Returns an error if escalation is denied or `losetup` fails.
pub fn bind_loop_device(path: &Path, privilege: &mut PrivilegeSet) -> Result<String> {
    let losetup = locate_tool("losetup")?;
    let outcome = {
        let _guard = privilege.escalate()?;
        exec::run_command_capture(
            vec![
                losetup,
                "--find".into(),
                "--show".into(),
                path.display().to_string(),
            ],
            &[],
        )?
    };
    if !outcome.success() {
        return Err(VesselError::Exec {
            command: "losetup".into(),
            message: format!("exited with status {}", outcome.exit_code),
        });
    }
    let device = outcome.stdout.unwrap_or_default().trim().to_string();
    if device.is_empty() {
        return Err(VesselError::Exec {
            command: "losetup".into(),
            message: "did not report a loop device".into(),
        });
    }
    tracing::debug!(image = %path.display(), device = %device, "bound loop device");
    Ok(device)
}

fn locate_tool(name: &str) -> Result<String> {
    which::which(name)
        .map(|p| p.display().to_string())
        .map_err(|_| VesselError::NotFound {
            kind: "system tool",
            id: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_directory_image() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let image = ContainerImage::resolve(tmp.path()).expect("should resolve");
        assert_eq!(image.kind(), ImageKind::Directory);
        assert_eq!(image.path(), tmp.path());
    }

    #[test]
    fn resolve_file_image() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("container.img");
        std::fs::write(&path, b"").expect("write");
        let image = ContainerImage::resolve(&path).expect("should resolve");
        assert_eq!(image.kind(), ImageKind::LoopFile);
    }

    #[test]
    fn resolve_missing_path_is_not_found() {
        let err =
            ContainerImage::resolve(Path::new("/nonexistent/image")).expect_err("should fail");
        assert!(matches!(err, VesselError::NotFound { .. }));
    }

    #[test]
    fn create_rejects_existing_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("container.img");
        std::fs::write(&path, b"").expect("write");
        let config = vessel_common::config::SystemConfig::default();
        let mut privilege =
            crate::privilege::PrivilegeSet::init(&config, None).expect("init should pass");
        let err = create_loop_image(&path, 16, &mut privilege).expect_err("should fail");
        assert!(matches!(err, VesselError::Config { .. }));
    }
}
