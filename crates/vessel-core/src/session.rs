//! Per-invocation session directory.
//!
//! A process-private scratch directory keyed by the image path and the
//! invoking uid, used to stage the rootfs mount point during setup. Its
//! lifetime is one invocation; removal on drop is best-effort because
//! mounts established under it disappear with the private mount namespace
//! at process exit anyway.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use vessel_common::error::{Result, VesselError};

use crate::image::ContainerImage;

/// Per-invocation scratch directory.
#[derive(Debug)]
pub struct SessionDirectory {
    root: PathBuf,
}

impl SessionDirectory {
    /// Allocates the session directory for `image`, creating it with mode
    /// `0700` under the base temp directory.
    ///
    /// The name is derived deterministically from the image path and the
    /// invoking uid, so two invocations on the same image by the same user
    /// share a path — callers must serialize such invocations externally.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or if a
    /// pre-existing directory at the path is not owned by the current
    /// effective user with mode `0700`.
    pub fn init(image: &ContainerImage, uid: u32) -> Result<Self> {
        let base = std::env::var_os("TMPDIR").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self::init_in(&base, image, uid)
    }

    /// Like [`init`](Self::init) with an explicit base directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn init_in(base: &Path, image: &ContainerImage, uid: u32) -> Result<Self> {
        let root = base.join(session_name(image.path(), uid));
        create_private_dir(&root)?;
        tracing::debug!(session = %root.display(), "session directory initialized");
        Ok(Self { root })
    }

    /// Root path of the session directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path of the rootfs mount point inside the session directory.
    #[must_use]
    pub fn rootfs_mount_point(&self) -> PathBuf {
        self.root.join("rootfs")
    }
}

impl Drop for SessionDirectory {
    fn drop(&mut self) {
        // Fails while mounts are still attached in our namespace; the
        // namespace teardown at process exit handles those.
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            tracing::debug!(session = %self.root.display(), error = %e, "session cleanup skipped");
        }
    }
}

fn session_name(image_path: &Path, uid: u32) -> String {
    let mut hasher = DefaultHasher::new();
    image_path.hash(&mut hasher);
    format!("vessel-session-{uid}-{:016x}", hasher.finish())
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::{DirBuilderExt, MetadataExt};

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|e| VesselError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

    // The name is predictable and the base directory is typically
    // world-writable, so a directory that already existed is trusted
    // only when it belongs to us and carries the private mode.
    let meta = std::fs::metadata(path).map_err(|e| VesselError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if meta.uid() != nix::unistd::geteuid().as_raw() || meta.mode() & 0o777 != 0o700 {
        return Err(VesselError::Privilege {
            message: format!(
                "session directory {} is not a mode-0700 directory owned by the invoking user",
                path.display()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ContainerImage;

    fn directory_image(dir: &Path) -> ContainerImage {
        let image_dir = dir.join("image");
        std::fs::create_dir(&image_dir).expect("create image dir");
        ContainerImage::resolve(&image_dir).expect("resolve")
    }

    #[test]
    fn same_image_and_uid_yield_same_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let image = directory_image(tmp.path());
        let a = SessionDirectory::init_in(tmp.path(), &image, 1000).expect("init");
        let path_a = a.path().to_path_buf();
        drop(a);
        let b = SessionDirectory::init_in(tmp.path(), &image, 1000).expect("init");
        assert_eq!(path_a, b.path());
    }

    #[test]
    fn different_uid_yields_different_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let image = directory_image(tmp.path());
        let a = SessionDirectory::init_in(tmp.path(), &image, 1000).expect("init");
        let b = SessionDirectory::init_in(tmp.path(), &image, 1001).expect("init");
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn rootfs_mount_point_is_inside_session() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let image = directory_image(tmp.path());
        let session = SessionDirectory::init_in(tmp.path(), &image, 1000).expect("init");
        assert!(session.rootfs_mount_point().starts_with(session.path()));
    }

    #[test]
    fn preexisting_open_mode_session_dir_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().expect("tempdir");
        let image = directory_image(tmp.path());
        // Squat on the predictable session path with a permissive mode.
        let path = tmp.path().join(session_name(image.path(), 1000));
        std::fs::create_dir(&path).expect("mkdir");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777)).expect("chmod");

        let err = SessionDirectory::init_in(tmp.path(), &image, 1000).expect_err("should fail");
        assert!(matches!(err, VesselError::Privilege { .. }));
    }

    #[test]
    fn preexisting_private_owned_session_dir_is_reused() {
        use std::os::unix::fs::DirBuilderExt;

        let tmp = tempfile::tempdir().expect("tempdir");
        let image = directory_image(tmp.path());
        let path = tmp.path().join(session_name(image.path(), 1000));
        std::fs::DirBuilder::new()
            .mode(0o700)
            .create(&path)
            .expect("mkdir");

        let session = SessionDirectory::init_in(tmp.path(), &image, 1000).expect("init");
        assert_eq!(session.path(), path);
    }

    #[test]
    fn drop_removes_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let image = directory_image(tmp.path());
        let session = SessionDirectory::init_in(tmp.path(), &image, 1000).expect("init");
        let path = session.path().to_path_buf();
        assert!(path.is_dir());
        drop(session);
        assert!(!path.exists());
    }
}
