//! Growing a file image before it is mounted.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use tracing::info;

use super::partitions::PartitionTable;
use super::{DiskImage, ROOT_PARTITION};
use crate::error::PipelineError;
use crate::host::Host;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendReport {
    pub added_bytes: u64,
    pub disk_bytes: u64,
    pub previous_root_bytes: u64,
    pub root_bytes: u64,
}

/// Append `delta_mb` MiB of zeros to `image` and grow the root partition
/// to the new end of the disk.
///
/// The root filesystem itself is grown when the image is next acquired.
pub fn extend_and_resize(host: &dyn Host, image: &DiskImage, delta_mb: u64) -> Result<ExtendReport> {
    if image.is_device() {
        return Err(PipelineError::NotFileBacked {
            path: image.path().to_path_buf(),
        }
        .into());
    }
    if delta_mb == 0 {
        return Err(PipelineError::invalid("xmb", "extension size must be greater than 0").into());
    }

    let before = read_table(host, image)?;
    let previous_root_bytes = root_entry(&before)?.size;
    if before.partitions.iter().any(|p| p.number > ROOT_PARTITION) {
        return Err(PipelineError::PartitionTool(format!(
            "partition {} is not the last partition of {}",
            ROOT_PARTITION,
            image.path().display()
        ))
        .into());
    }

    let added_bytes = delta_mb
        .checked_mul(MIB)
        .ok_or_else(|| PipelineError::invalid("xmb", format!("{delta_mb} MiB is too large")))?;
    let file = OpenOptions::new()
        .write(true)
        .open(image.path())
        .with_context(|| format!("opening '{}' for extension", image.path().display()))?;
    let old_len = file
        .metadata()
        .with_context(|| format!("reading size of '{}'", image.path().display()))?
        .len();
    let new_len = old_len.checked_add(added_bytes).ok_or_else(|| {
        PipelineError::invalid("xmb", format!("{delta_mb} MiB is too large for this image"))
    })?;
    file.set_len(new_len)
        .with_context(|| format!("extending '{}' by {} MiB", image.path().display(), delta_mb))?;
    drop(file);

    let grown = read_table(host, image)?;
    if grown.disk_bytes != new_len {
        return Err(PipelineError::PartitionTool(format!(
            "expected disk size {} after extension, partition tool reports {}",
            new_len,
            grown.disk_bytes
        ))
        .into());
    }

    host.resize_partition(image.path(), ROOT_PARTITION)?;
    let resized = read_table(host, image)?;
    let root_bytes = root_entry(&resized)?.size;

    info!(
        "Extended {} by {} MiB; root partition {} -> {} bytes",
        image.display_name(),
        delta_mb,
        previous_root_bytes,
        root_bytes
    );

    Ok(ExtendReport {
        added_bytes,
        disk_bytes: resized.disk_bytes,
        previous_root_bytes,
        root_bytes,
    })
}

fn read_table(host: &dyn Host, image: &DiskImage) -> Result<PartitionTable> {
    let output = host.print_partitions(image.path())?;
    Ok(PartitionTable::parse(&output)?)
}

fn root_entry(table: &PartitionTable) -> Result<&super::partitions::PartitionEntry> {
    table.partition(ROOT_PARTITION).ok_or_else(|| {
        PipelineError::PartitionTool(format!("no partition {ROOT_PARTITION} in image")).into()
    })
}
