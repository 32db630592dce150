//! Preflight checks run before anything on disk is touched.
//!
//! Validates that the host has the tools a mode needs and that we run with
//! the privileges loop devices and mounts require.
//!
//! # Example
//!
//! ```rust
//! use sdmaker::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("losetup") {
//!     println!("util-linux not installed");
//! }
//!
//! let tools = &[("parted", "parted"), ("resize2fs", "e2fsprogs")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Context, Result};
use std::os::unix::fs::MetadataExt;

use crate::error::PipelineError;
use crate::options::ModeKind;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every mode that mounts an image needs. Each tuple is (command, package).
const MOUNT_TOOLS: &[(&str, &str)] = &[
    ("losetup", "util-linux"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
];

const EXTEND_TOOLS: &[(&str, &str)] = &[
    ("parted", "parted"),
    ("e2fsck", "e2fsprogs"),
    ("resize2fs", "e2fsprogs"),
];

const CONTAINER_TOOLS: &[(&str, &str)] = &[("systemd-nspawn", "systemd-container")];

const BURN_TOOLS: &[(&str, &str)] = &[("dd", "coreutils")];

/// Tools needed for `mode`.
pub fn required_tools(mode: ModeKind, extends: bool) -> Vec<(&'static str, &'static str)> {
    let mut tools: Vec<(&str, &str)> = MOUNT_TOOLS.to_vec();
    if extends || mode == ModeKind::ExtendOnly {
        tools.extend_from_slice(EXTEND_TOOLS);
    }
    match mode {
        ModeKind::Customize | ModeKind::Explore => tools.extend_from_slice(CONTAINER_TOOLS),
        ModeKind::Burn | ModeKind::BurnFile => tools.extend_from_slice(BURN_TOOLS),
        ModeKind::Mount | ModeKind::ExtendOnly => {}
    }
    tools
}

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and the package providing it.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(t, p)| format!("  {} (install: {})", t, p))
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }

    Ok(())
}

/// Effective UID of this process: `/proc/self` is owned by it.
pub fn effective_uid() -> Result<u32> {
    let meta = std::fs::metadata("/proc/self").context("reading '/proc/self'")?;
    Ok(meta.uid())
}

/// Loop devices and mounts need root.
pub fn require_root() -> Result<()> {
    if effective_uid()? != 0 {
        return Err(PipelineError::NotRoot("sdmaker".to_string()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_lists_all_missing() {
        let tools = &[
            ("nonexistent_command_xyz", "fake-package"),
            ("nonexistent_command_abc", "other-package"),
        ];
        let msg = check_required_tools(tools).unwrap_err().to_string();
        assert!(msg.contains("nonexistent_command_xyz"));
        assert!(msg.contains("other-package"));
    }

    #[test]
    fn burn_needs_dd_but_not_nspawn() {
        let tools = required_tools(ModeKind::Burn, false);
        assert!(tools.iter().any(|(t, _)| *t == "dd"));
        assert!(!tools.iter().any(|(t, _)| *t == "systemd-nspawn"));
    }

    #[test]
    fn extend_only_needs_parted() {
        let tools = required_tools(ModeKind::ExtendOnly, false);
        assert!(tools.iter().any(|(t, _)| *t == "parted"));
    }

    #[test]
    fn effective_uid_owns_new_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let owner = file.as_file().metadata().unwrap().uid();
        assert_eq!(effective_uid().unwrap(), owner);
    }
}
