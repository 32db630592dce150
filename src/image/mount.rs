//! Attaching and mounting an image, and tearing it all down again.
//!
//! [`acquire`] builds a [`MountHandle`] one resource at a time. Whatever has
//! been set up when a later step fails is released by the handle's `Drop`,
//! so a failed acquire never leaves a loop device or mount behind.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{partition_device, DiskImage, BOOT_PARTITION, ROOT_PARTITION};
use crate::error::PipelineError;
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountScope {
    /// Root and boot partitions.
    Full,
    /// Root partition only (post-burn edits).
    RootOnly,
}

/// Where the image is mounted on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountLayout {
    pub root: PathBuf,
}

impl MountLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Boot partition mount point: `boot/firmware` when the image has it.
    pub fn boot_target(&self) -> PathBuf {
        let firmware = self.root.join("boot/firmware");
        if firmware.is_dir() {
            firmware
        } else {
            self.root.join("boot")
        }
    }
}

/// Mounted image. Unmounts and detaches on [`release`](Self::release) or drop.
pub struct MountHandle<'a> {
    host: &'a dyn Host,
    root: PathBuf,
    loop_device: Option<String>,
    root_mounted: bool,
    boot_target: Option<PathBuf>,
}

impl<'a> MountHandle<'a> {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn loop_device(&self) -> Option<&str> {
        self.loop_device.as_deref()
    }

    pub fn boot_target(&self) -> Option<&Path> {
        self.boot_target.as_deref()
    }

    /// Unmount boot, then root, then detach the loop device.
    ///
    /// Every step is attempted; the first failure is returned.
    pub fn release(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let mut first_err: Option<anyhow::Error> = None;

        if let Some(boot) = self.boot_target.take() {
            if let Err(e) = self.host.unmount(&boot) {
                warn!("Failed to unmount {}: {:#}", boot.display(), e);
                first_err.get_or_insert(e);
            }
        }
        if self.root_mounted {
            self.root_mounted = false;
            if let Err(e) = self.host.unmount(&self.root) {
                warn!("Failed to unmount {}: {:#}", self.root.display(), e);
                first_err.get_or_insert(e);
            }
        }
        if let Some(device) = self.loop_device.take() {
            if let Err(e) = self.host.loop_detach(&device) {
                warn!("Failed to detach {}: {:#}", device, e);
                first_err.get_or_insert(e);
            } else {
                debug!("Detached {}", device);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for MountHandle<'_> {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

/// Attach `image` (if file-backed) and mount it under `layout.root`.
///
/// With `grow_root` the root filesystem is checked and grown to fill its
/// partition before it is mounted.
pub fn acquire<'a>(
    host: &'a dyn Host,
    image: &DiskImage,
    layout: &MountLayout,
    scope: MountScope,
    grow_root: bool,
) -> Result<MountHandle<'a>> {
    let table = host.mount_table()?;
    if let Some(busy) = busy_target(&table, &layout.root) {
        return Err(PipelineError::DeviceBusy { path: busy }.into());
    }

    let mut handle = MountHandle {
        host,
        root: layout.root.clone(),
        loop_device: None,
        root_mounted: false,
        boot_target: None,
    };

    let disk = if image.is_device() {
        image.path().display().to_string()
    } else {
        let device = host.loop_attach(image.path())?;
        info!("Attached {} to {}", image.display_name(), device);
        handle.loop_device = Some(device.clone());
        device
    };

    let root_dev = partition_device(&disk, ROOT_PARTITION);
    let boot_dev = partition_device(&disk, BOOT_PARTITION);
    for dev in [&root_dev, &boot_dev] {
        if !host.device_exists(dev) {
            return Err(PipelineError::AttachFailed {
                image: image.path().to_path_buf(),
                message: format!("partition device {dev} did not appear"),
            }
            .into());
        }
    }

    if grow_root {
        host.grow_filesystem(&root_dev)?;
    }

    fs::create_dir_all(&layout.root)
        .with_context(|| format!("creating mount point '{}'", layout.root.display()))?;
    host.mount(&root_dev, &layout.root)?;
    handle.root_mounted = true;

    if scope == MountScope::Full {
        let boot = layout.boot_target();
        fs::create_dir_all(&boot)
            .with_context(|| format!("creating boot mount point '{}'", boot.display()))?;
        host.mount(&boot_dev, &boot)?;
        handle.boot_target = Some(boot);
    }

    info!("Mounted {} on {}", image.display_name(), layout.root.display());
    Ok(handle)
}

/// First mount point in `table` at or below `root`.
fn busy_target(table: &str, root: &Path) -> Option<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_mount_field(field)))
        .find(|target| target.starts_with(root))
}

/// Decode the `\040`-style octal escapes used in `/proc/mounts`.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
