//! Bootstrap execution engine.
//!
//! Orchestrates definition-driven rootfs construction once the rootfs is
//! mounted: host-side sections, base-OS module, skeleton install, script
//! installs, file staging, chroot, and container-side sections.
//!
//! Fatality is decided here, never in the primitives: skeleton install,
//! file staging, mounts, and chroot abort the bootstrap; absent optional
//! sections and failing user scripts are logged and skipped — user build
//! scripts are expected to sometimes fail without invalidating the image.

use std::path::Path;

use vessel_common::constants;
use vessel_common::error::{Result, VesselError};
use vessel_core::exec;
use vessel_core::files;
use vessel_core::invocation::ContainerInvocation;
use vessel_core::privilege::PrivilegeSet;

use crate::definition::{BootstrapDefinition, DefinitionVersion};
use crate::module::BootstrapModule;

/// Drives one bootstrap run against a prepared invocation.
///
/// The invocation's rootfs must already be mounted; the engine takes it
/// through check, install, and chroot.
#[derive(Debug)]
pub struct BootstrapEngine<'a> {
    invocation: &'a mut ContainerInvocation,
    definition: BootstrapDefinition,
}

impl<'a> BootstrapEngine<'a> {
    /// Pairs a parsed definition with the invocation it will build.
    #[must_use]
    pub fn new(invocation: &'a mut ContainerInvocation, definition: BootstrapDefinition) -> Self {
        Self {
            invocation,
            definition,
        }
    }

    /// Runs the bootstrap to completion.
    ///
    /// V1 definitions are closed and handed to the external legacy
    /// driver; V2 definitions run the full construction sequence.
    ///
    /// # Errors
    ///
    /// Returns an error for the fatal steps: an unrecognized module,
    /// rootfs check or skeleton-install failure, file staging failure, or
    /// a failed chroot.
    pub fn run(self) -> Result<()> {
        let env = self
            .invocation
            .wire_env(Some(self.definition.path()));

        match self.definition.version() {
            DefinitionVersion::V1 => Self::run_legacy(self.definition, &env),
            DefinitionVersion::V2 => self.run_v2(&env),
        }
    }

    /// Hands a V1 definition to the external legacy driver.
    fn run_legacy(definition: BootstrapDefinition, env: &[(String, String)]) -> Result<()> {
        tracing::info!("legacy V1 definition, invoking external driver");
        definition.close();
        let outcome = exec::run_command(vec![constants::DRIVER_V1_PATH.to_string()], env)?;
        if outcome.success() {
            Ok(())
        } else {
            Err(VesselError::Exec {
                command: constants::DRIVER_V1_PATH.into(),
                message: format!("legacy driver exited with status {}", outcome.exit_code),
            })
        }
    }

    fn run_v2(mut self, env: &[(String, String)]) -> Result<()> {
        // 1. Host-side %pre, optional by design.
        run_section(
            &mut self.definition,
            constants::sections::PRE,
            env,
            &self.invocation.privilege,
        );

        // 2. Exactly one base-OS module, selected by the header.
        let module = select_module(&self.definition)?;
        if let Err(e) = module.populate(env) {
            tracing::warn!(module = module.name(), error = %e, "module backend failed");
        }

        // 3. Structure check and skeleton install; an incompletely
        //    skeletoned rootfs cannot safely continue.
        self.invocation.rootfs.check()?;
        files::install_identity_files(self.invocation.rootfs.dir())?;

        // 4. User-declared scripts into fixed destinations.
        install_definition_scripts(
            &mut self.definition,
            self.invocation.rootfs.dir(),
            Path::new(constants::DEFAULT_ENVIRONMENT_PATH),
        )?;

        // 5. Remaining default files and configured bind mounts.
        let rootfs_dir = self.invocation.rootfs.dir().to_path_buf();
        files::stage_default_files(&rootfs_dir)?;
        let binds = files::configured_bind_mounts(&self.invocation.config);
        files::apply_bind_mounts(
            &rootfs_dir,
            &binds,
            &self.invocation.namespaces,
            &mut self.invocation.privilege,
        )?;

        // 6. Host-side %setup, while host tools are still reachable.
        run_section(
            &mut self.definition,
            constants::sections::SETUP,
            env,
            &self.invocation.privilege,
        );

        // 7. Terminal chroot; the host filesystem is gone after this.
        self.invocation.chroot()?;

        // 8. Container-side %post, then the built-in test action.
        run_section(
            &mut self.definition,
            constants::sections::POST,
            env,
            &self.invocation.privilege,
        );
        run_container_test(env, &self.invocation.privilege);

        // 9. Done with the definition.
        self.definition.close();
        Ok(())
    }
}

/// Resolves the `Bootstrap` header value to a module.
///
/// # Errors
///
/// Returns an error when the key is missing or names no known module —
/// a fatal configuration error, unlike an absent optional section.
pub fn select_module(definition: &BootstrapDefinition) -> Result<BootstrapModule> {
    let Some(name) = definition.get_value(constants::BOOTSTRAP_KEY) else {
        return Err(VesselError::Config {
            message: format!(
                "definition file does not contain the required {}: key",
                constants::BOOTSTRAP_KEY
            ),
        });
    };
    BootstrapModule::from_name(name).ok_or_else(|| VesselError::Config {
        message: format!("unrecognized bootstrap module {name:?}"),
    })
}

/// Runs a definition section as a host or container shell script,
/// best-effort.
///
/// An absent section is skipped with an informational log. A non-zero
/// script exit logs a warning and continues.
pub fn run_section(
    definition: &mut BootstrapDefinition,
    name: &str,
    env: &[(String, String)],
    privilege: &PrivilegeSet,
) {
    definition.rewind();
    let Some(body) = definition.section_get(name).map(String::from) else {
        tracing::info!(section = name, "no section in definition, skipping");
        return;
    };

    privilege.assert_user_context();
    tracing::info!(section = name, "running section script");
    match exec::run_shell_script(&body, env) {
        Ok(outcome) if outcome.success() => {}
        Ok(outcome) => {
            tracing::warn!(
                section = name,
                exit_code = outcome.exit_code,
                "section script exited with non-zero status"
            );
        }
        Err(e) => {
            tracing::warn!(section = name, error = %e, "section script could not be run");
        }
    }
}

/// Installs the `runscript`, `test`, and `environment` sections into
/// their fixed rootfs destinations.
///
/// `runscript` and `test` install with mode `0755` and are skipped when
/// absent. When `environment` is absent the packaged default at
/// `default_environment` is installed instead; either way the final file
/// is forced to mode `0644` regardless of its source.
///
/// # Errors
///
/// Returns an error only if the environment fallback copy fails; script
/// install failures are logged and skipped.
pub fn install_definition_scripts(
    definition: &mut BootstrapDefinition,
    rootfs: &Path,
    default_environment: &Path,
) -> Result<()> {
    let _ = copy_section(definition, rootfs, constants::sections::RUNSCRIPT, "singularity", 0o755);
    let _ = copy_section(definition, rootfs, constants::sections::TEST, ".test", 0o755);

    if !copy_section(
        definition,
        rootfs,
        constants::sections::ENVIRONMENT,
        "environment",
        0o644,
    ) {
        tracing::info!("installing packaged default environment file");
        let text =
            std::fs::read_to_string(default_environment).map_err(|e| VesselError::Io {
                path: default_environment.to_path_buf(),
                source: e,
            })?;
        files::install_file(&rootfs.join("environment"), &text, 0o644)?;
    }
    Ok(())
}

/// Copies one section body into the rootfs; returns whether it was
/// installed.
fn copy_section(
    definition: &mut BootstrapDefinition,
    rootfs: &Path,
    name: &str,
    dest: &str,
    mode: u32,
) -> bool {
    definition.rewind();
    let Some(body) = definition.section_get(name).map(String::from) else {
        tracing::info!(section = name, "definition does not declare section, skipping install");
        return false;
    };
    let dest_path = rootfs.join(dest);
    match files::install_file(&dest_path, &body, mode) {
        Ok(()) => {
            tracing::debug!(section = name, dest = %dest_path.display(), "installed section");
            true
        }
        Err(e) => {
            tracing::warn!(section = name, error = %e, "could not install section, skipping");
            false
        }
    }
}

/// Runs the installed `/.test` script inside the chrooted container,
/// best-effort.
fn run_container_test(env: &[(String, String)], privilege: &PrivilegeSet) {
    if !Path::new("/.test").is_file() {
        tracing::info!("no /.test installed, skipping container test");
        return;
    }
    privilege.assert_user_context();
    match exec::run_shell_script("/bin/sh /.test", env) {
        Ok(outcome) if outcome.success() => {}
        Ok(outcome) => {
            tracing::warn!(exit_code = outcome.exit_code, "container test failed");
        }
        Err(e) => tracing::warn!(error = %e, "container test could not be run"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    use crate::definition::BootstrapDefinition;

    fn definition(text: &str) -> BootstrapDefinition {
        BootstrapDefinition::from_text(Path::new("/defs/box.def"), text)
    }

    fn mode_of(path: &Path) -> u32 {
        std::fs::metadata(path).expect("metadata").permissions().mode() & 0o7777
    }

    #[test]
    fn select_module_resolves_header_value() {
        let def = definition("Bootstrap: busybox\n%post\necho hi\n");
        assert_eq!(select_module(&def).expect("select"), BootstrapModule::Busybox);
    }

    #[test]
    fn select_module_missing_key_is_fatal_config() {
        let def = definition("%post\necho hi\n");
        let err = select_module(&def).expect_err("should fail");
        assert!(matches!(err, VesselError::Config { .. }));
    }

    #[test]
    fn select_module_unknown_name_is_fatal_config() {
        let def = definition("Bootstrap: portage\n");
        let err = select_module(&def).expect_err("should fail");
        assert!(matches!(err, VesselError::Config { .. }));
        assert_eq!(err.exit_status(), 255);
    }

    #[test]
    fn runscript_installed_verbatim_with_exec_mode() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let default_env = tmp.path().join("default-environment");
        std::fs::write(&default_env, "export PATH=/bin\n").expect("write");
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir(&rootfs).expect("mkdir");

        let mut def = definition(
            "Bootstrap: busybox\n%runscript\nexec /bin/sh \"$@\"\n%environment\nexport LANG=C\n",
        );
        install_definition_scripts(&mut def, &rootfs, &default_env).expect("install");

        let runscript = rootfs.join("singularity");
        assert_eq!(
            std::fs::read_to_string(&runscript).expect("read"),
            "exec /bin/sh \"$@\"\n"
        );
        assert_eq!(mode_of(&runscript), 0o755);
    }

    #[test]
    fn declared_environment_is_forced_to_0644() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let default_env = tmp.path().join("default-environment");
        std::fs::write(&default_env, "export PATH=/bin\n").expect("write");
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir(&rootfs).expect("mkdir");

        let mut def = definition("Bootstrap: busybox\n%environment\nexport LANG=C\n");
        install_definition_scripts(&mut def, &rootfs, &default_env).expect("install");

        let environment = rootfs.join("environment");
        assert_eq!(
            std::fs::read_to_string(&environment).expect("read"),
            "export LANG=C\n"
        );
        assert_eq!(mode_of(&environment), 0o644);
    }

    #[test]
    fn absent_environment_falls_back_to_packaged_default() {
        use std::fs::Permissions;

        let tmp = tempfile::tempdir().expect("tempdir");
        let default_env = tmp.path().join("default-environment");
        std::fs::write(&default_env, "export PATH=/usr/bin:/bin\n").expect("write");
        // The default's own mode must not leak into the installed file.
        std::fs::set_permissions(&default_env, Permissions::from_mode(0o600)).expect("chmod");
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir(&rootfs).expect("mkdir");

        let mut def = definition("Bootstrap: busybox\n%post\necho hi\n");
        install_definition_scripts(&mut def, &rootfs, &default_env).expect("install");

        let environment = rootfs.join("environment");
        assert_eq!(
            std::fs::read_to_string(&environment).expect("read"),
            "export PATH=/usr/bin:/bin\n"
        );
        assert_eq!(mode_of(&environment), 0o644);
    }

    #[test]
    fn absent_test_section_installs_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let default_env = tmp.path().join("default-environment");
        std::fs::write(&default_env, "").expect("write");
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir(&rootfs).expect("mkdir");

        let mut def = definition("Bootstrap: busybox\n%post\necho hi\n");
        install_definition_scripts(&mut def, &rootfs, &default_env).expect("install");
        assert!(!rootfs.join(".test").exists());
        assert!(!rootfs.join("singularity").exists());
    }

    #[test]
    fn missing_packaged_default_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir(&rootfs).expect("mkdir");

        let mut def = definition("Bootstrap: busybox\n");
        let err = install_definition_scripts(
            &mut def,
            &rootfs,
            Path::new("/nonexistent/environment"),
        )
        .expect_err("should fail");
        assert!(matches!(err, VesselError::Io { .. }));
    }

    #[test]
    fn failed_chroot_prevents_container_sections() {
        use vessel_core::invocation::ContainerInvocation;
        use vessel_core::rootfs::{Rootfs, RootfsStage};

        let tmp = tempfile::tempdir().expect("tempdir");
        let image_dir = tmp.path().join("image");
        std::fs::create_dir(&image_dir).expect("mkdir");
        let marker = tmp.path().join("post-ran");

        let config = vessel_common::config::SystemConfig::default();
        let privilege = PrivilegeSet::init(&config, None).expect("privilege init");
        let mut invocation =
            ContainerInvocation::prepare(config, privilege, &image_dir).expect("prepare");
        // Treat the empty mount point as already mounted so the run
        // reaches the chroot step without performing real mounts.
        invocation.rootfs = Rootfs::at_stage(
            invocation.image.clone(),
            invocation.rootfs.dir().to_path_buf(),
            RootfsStage::Mounted,
        );

        // %setup clobbers the mount point so the chroot step fails no
        // matter which identity the test runs under; %post leaves a
        // marker that must never appear.
        let text = format!(
            "Bootstrap: busybox\n\
             %environment\nexport LANG=C\n\
             %setup\nrm -rf \"$SINGULARITY_ROOTFS\" && touch \"$SINGULARITY_ROOTFS\"\n\
             %post\ntouch \"{}\"\n",
            marker.display()
        );
        let def = BootstrapDefinition::from_text(Path::new("/defs/box.def"), &text);

        let err = BootstrapEngine::new(&mut invocation, def)
            .run()
            .expect_err("chroot on a clobbered mount point must fail");
        assert!(matches!(
            err,
            VesselError::Rootfs { .. } | VesselError::Privilege { .. }
        ));
        assert!(!marker.exists());
    }

    #[test]
    fn run_section_skips_absent_section() {
        let mut def = definition("Bootstrap: busybox\n%post\necho hi\n");
        let config = vessel_common::config::SystemConfig::default();
        let privilege = PrivilegeSet::init(&config, None).expect("privilege init");
        // Absent %pre: must neither abort nor panic.
        run_section(&mut def, "pre", &[], &privilege);
    }

    #[test]
    fn run_section_tolerates_failing_script() {
        let mut def = definition("%pre\nexit 7\n");
        let config = vessel_common::config::SystemConfig::default();
        let privilege = PrivilegeSet::init(&config, None).expect("privilege init");
        run_section(&mut def, "pre", &[], &privilege);
    }
}
