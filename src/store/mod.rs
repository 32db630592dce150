//! State kept inside the image: persisted parameters, the completion marker,
//! the boot settings overlay, app lists and the audit log.
//!
//! All paths are relative to the image root so the same code works against
//! the mount point on the host and against a plain directory in tests.

pub mod applist;
pub mod audit;
pub mod bootset;
pub mod params;

pub use applist::AppList;
pub use bootset::BootSettings;
pub use params::Params;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub const SDM_DIR: &str = "etc/sdm";
pub const PARAMS_FILE: &str = "etc/sdm/cparams";
pub const MARKER_FILE: &str = "etc/sdm/custom.ran";
pub const HISTORY_FILE: &str = "etc/sdm/history";
pub const BASE_BOOTSET_FILE: &str = "etc/sdm/1piboot.conf";
pub const BOOTSET_OVERLAY_FILE: &str = "etc/sdm/auto-1piboot.conf";
pub const ASSETS_DIR: &str = "etc/sdm/assets";
pub const RUNTIME_DIR: &str = "usr/local/sdm";

/// Whether Phase 0 already ran against the image mounted at `root`.
pub fn is_customized(root: &Path) -> bool {
    root.join(MARKER_FILE).is_file()
}

/// Record that Phase 0 completed.
pub fn mark_customized(root: &Path, stamp: &str) -> Result<()> {
    let path = root.join(MARKER_FILE);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::write(&path, format!("{stamp}\n"))
        .with_context(|| format!("writing completion marker '{}'", path.display()))
}
