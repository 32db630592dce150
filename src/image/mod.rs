//! Disk images and the resources that hold them: loop devices, mounts,
//! partition resizing and the per-image run lock.

pub mod extend;
pub mod mount;
pub mod partitions;

pub use extend::{extend_and_resize, ExtendReport};
pub use mount::{acquire, MountHandle, MountLayout, MountScope};

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Partition numbers of a Raspberry Pi OS image.
pub const BOOT_PARTITION: u32 = 1;
pub const ROOT_PARTITION: u32 = 2;

/// An image file or a block device holding one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskImage {
    path: PathBuf,
    size_bytes: u64,
    device_backed: bool,
}

impl DiskImage {
    /// Inspect `path`. Fails with NotFound when it does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path)
            .map_err(|_| PipelineError::not_found("Image", path))?;
        let device_backed = meta.file_type().is_block_device();
        if !device_backed && !meta.is_file() {
            return Err(PipelineError::invalid(
                "image",
                format!("{} is neither a file nor a block device", path.display()),
            )
            .into());
        }
        let size_bytes = if device_backed {
            // Block devices report 0 in metadata; the end offset is the size.
            let mut file = File::open(path)
                .with_context(|| format!("opening device '{}'", path.display()))?;
            file.seek(SeekFrom::End(0))
                .with_context(|| format!("sizing device '{}'", path.display()))?
        } else {
            meta.len()
        };
        Ok(Self {
            path: path.to_path_buf(),
            size_bytes,
            device_backed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn is_device(&self) -> bool {
        self.device_backed
    }

    /// File name used in the audit log and parameters.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Device node for partition `number` of `disk`.
///
/// `/dev/sda` → `/dev/sda1`, `/dev/mmcblk0` or `/dev/loop3` → `...p1`.
pub fn partition_device(disk: &str, number: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{number}")
    } else {
        format!("{disk}{number}")
    }
}

/// Exclusive advisory lock on a file-backed image for the length of a run.
///
/// Released (and unlocked) on drop.
#[derive(Debug)]
pub struct ImageLock {
    file: File,
    path: PathBuf,
}

impl ImageLock {
    pub fn acquire(image: &DiskImage) -> Result<Option<Self>> {
        if image.is_device() {
            return Ok(None);
        }
        let file = OpenOptions::new()
            .read(true)
            .open(image.path())
            .with_context(|| format!("opening image '{}'", image.path().display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(PipelineError::ImageLocked {
                path: image.path().to_path_buf(),
            }
            .into());
        }
        Ok(Some(Self {
            file,
            path: image.path().to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ImageLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
