//! Host collaborators: loop devices, mounts, partition tool, container spawn,
//! block copy and interactive shells.
//!
//! The pipeline only talks to the host through [`Host`]. [`LinuxHost`] drives
//! the real tools; tests use an in-memory fake that records every call.

#[cfg(test)]
pub(crate) mod fake;
mod linux;

pub use linux::LinuxHost;

use anyhow::Result;
use std::path::Path;

/// Where an interactive shell is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellTarget {
    /// Inside the image root via the container-spawn tool.
    Container,
    /// On the host, with the mounted image as working directory.
    HostDir,
}

pub trait Host {
    /// Attach a file image to a free loop device with partition scanning.
    /// Returns the loop device path (e.g. `/dev/loop3`).
    fn loop_attach(&self, image: &Path) -> Result<String>;

    fn loop_detach(&self, device: &str) -> Result<()>;

    /// Whether a block device node is present.
    fn device_exists(&self, device: &str) -> bool;

    fn mount(&self, device: &str, target: &Path) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;

    /// Current mount table in `/proc/mounts` format.
    fn mount_table(&self) -> Result<String>;

    /// Machine-readable partition listing in bytes (`parted -ms ... unit B print`).
    fn print_partitions(&self, image: &Path) -> Result<String>;

    /// Grow partition `number` to the end of the disk.
    fn resize_partition(&self, image: &Path, number: u32) -> Result<()>;

    /// Check and grow the filesystem on `device` to fill its partition.
    fn grow_filesystem(&self, device: &str) -> Result<()>;

    /// Run a program on the host. Returns its exit code.
    fn run_hook(&self, program: &Path, args: &[String], env: &[(String, String)]) -> Result<i32>;

    /// Run `command` inside `root` via the container-spawn tool.
    /// Returns the exit code of the contained command.
    fn spawn_in_container(&self, root: &Path, command: &[String]) -> Result<i32>;

    /// Copy `source` byte for byte onto `target`.
    fn block_copy(&self, source: &Path, target: &Path, block_size: &str) -> Result<()>;

    /// Open an interactive shell and wait for the operator to leave it.
    fn interactive_shell(&self, root: &Path, target: ShellTarget) -> Result<i32>;
}
