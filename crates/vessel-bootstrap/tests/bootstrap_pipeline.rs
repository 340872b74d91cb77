//! End-to-end coverage of the definition-to-rootfs pipeline that does
//! not require mount privileges: parsing, module selection, and script
//! installation against a scratch rootfs.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use vessel_bootstrap::definition::{BootstrapDefinition, DefinitionVersion};
use vessel_bootstrap::engine::{install_definition_scripts, select_module};
use vessel_bootstrap::module::BootstrapModule;

const BUSYBOX_DEF: &str = "\
# build definition for a minimal busybox container
Bootstrap: busybox

%pre
echo preparing host side

%post
echo configuring container

%runscript
exec /bin/sh \"$@\"
";

fn mode_of(path: &Path) -> u32 {
    std::fs::metadata(path)
        .expect("metadata")
        .permissions()
        .mode()
        & 0o7777
}

#[test]
fn pipeline_busybox_definition_parses_and_selects_module() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let def_path = tmp.path().join("busybox.def");
    std::fs::write(&def_path, BUSYBOX_DEF).expect("write");

    let mut def = BootstrapDefinition::open(&def_path).expect("open");
    assert_eq!(def.version(), DefinitionVersion::V2);
    assert_eq!(select_module(&def).expect("select"), BootstrapModule::Busybox);

    assert_eq!(
        def.section_get("pre"),
        Some("echo preparing host side\n\n")
    );
    def.rewind();
    assert_eq!(
        def.section_get("post"),
        Some("echo configuring container\n\n")
    );
}

#[test]
fn pipeline_installs_runscript_and_default_environment() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let rootfs = tmp.path().join("rootfs");
    std::fs::create_dir(&rootfs).expect("mkdir");
    let default_env = tmp.path().join("environment.default");
    std::fs::write(&default_env, "export PATH=/usr/bin:/bin\n").expect("write");

    let mut def =
        BootstrapDefinition::from_text(Path::new("/defs/busybox.def"), BUSYBOX_DEF);
    install_definition_scripts(&mut def, &rootfs, &default_env).expect("install");

    let runscript = rootfs.join("singularity");
    assert_eq!(
        std::fs::read_to_string(&runscript).expect("read"),
        "exec /bin/sh \"$@\"\n"
    );
    assert_eq!(mode_of(&runscript), 0o755);

    // No %environment in the definition: the packaged default lands at
    // /environment with its mode forced.
    let environment = rootfs.join("environment");
    assert_eq!(
        std::fs::read_to_string(&environment).expect("read"),
        "export PATH=/usr/bin:/bin\n"
    );
    assert_eq!(mode_of(&environment), 0o644);
}

#[test]
fn pipeline_legacy_definition_reports_v1() {
    let def = BootstrapDefinition::from_text(
        Path::new("/defs/legacy.def"),
        "DISTRO=centos-6\nRELEASE=6.8\n",
    );
    assert_eq!(def.version(), DefinitionVersion::V1);
}
