//! Dynamic linker cache refresh.

use anyhow::{Context, Result};

use crate::context::BuildContext;

pub const LDCONFIG: &str = "sbin/ldconfig";

/// Run the image's `ldconfig` against the image root. Returns
/// `false` when the image has none.
pub fn refresh_linker_cache(ctx: &BuildContext) -> Result<bool> {
    let ldconfig = ctx.path(LDCONFIG);
    if !ldconfig.is_file() {
        tracing::debug!("no ldconfig in image, skipping linker cache");
        return Ok(false);
    }

    ctx.image_command(LDCONFIG)
        .arg("-r")
        .arg_path(&ctx.image_root())
        .error_msg("ldconfig failed to rebuild the linker cache")
        .run()
        .context("refreshing linker cache")?;
    tracing::info!("linker cache refreshed");
    Ok(true)
}
