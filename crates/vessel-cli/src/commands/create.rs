//! The image-creation workflow.

use std::path::PathBuf;

use clap::Args;
use vessel_common::constants;
use vessel_common::error::Result;
use vessel_core::image;
use vessel_core::privilege::PrivilegeSet;

/// Arguments for `vessel create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Path of the new container image file.
    pub image: PathBuf,

    /// Image size in MiB.
    #[arg(long, default_value_t = constants::DEFAULT_IMAGE_SIZE_MIB)]
    pub size: u64,
}

/// Allocates and formats a new loop container image.
///
/// # Errors
///
/// Returns an error if the path exists or allocation, loop binding, or
/// formatting fails.
pub fn execute(args: CreateArgs, mut privilege: PrivilegeSet) -> Result<()> {
    let created = image::create_loop_image(&args.image, args.size, &mut privilege)?;
    tracing::info!(image = %created.path().display(), size_mib = args.size, "image created");
    Ok(())
}
