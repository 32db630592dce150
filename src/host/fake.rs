//! In-memory [`Host`] for tests. Records every call and models a two
//! partition image (256 MiB boot, root filling the rest).

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Host, ShellTarget};
use crate::error::PipelineError;

const P1_START: u64 = 4 * 1024 * 1024;
const P1_END: u64 = 272_629_759;
const P2_START: u64 = 272_629_760;

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    mounts: Vec<(String, PathBuf)>,
    attached: Vec<String>,
    next_loop: u32,
    p2_end: HashMap<PathBuf, u64>,
    fail_mount: Option<PathBuf>,
    fail_attach: bool,
    hide_partitions: bool,
    foreign_mounts: Vec<(String, PathBuf)>,
    container_codes: HashMap<String, i32>,
    hook_code: i32,
    partition_output: Option<String>,
}

#[derive(Default)]
pub(crate) struct FakeHost {
    state: RefCell<FakeState>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub(crate) fn active_mounts(&self) -> Vec<PathBuf> {
        self.state
            .borrow()
            .mounts
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub(crate) fn attached_loops(&self) -> Vec<String> {
        self.state.borrow().attached.clone()
    }

    pub(crate) fn fail_mount_at(&self, target: &Path) {
        self.state.borrow_mut().fail_mount = Some(target.to_path_buf());
    }

    pub(crate) fn fail_attach(&self) {
        self.state.borrow_mut().fail_attach = true;
    }

    pub(crate) fn hide_partitions(&self) {
        self.state.borrow_mut().hide_partitions = true;
    }

    /// Pretend something outside this run already holds `target`.
    pub(crate) fn add_foreign_mount(&self, device: &str, target: &Path) {
        self.state
            .borrow_mut()
            .foreign_mounts
            .push((device.to_string(), target.to_path_buf()));
    }

    /// Exit code for container commands whose argv contains `needle`.
    pub(crate) fn set_container_exit(&self, needle: &str, code: i32) {
        self.state
            .borrow_mut()
            .container_codes
            .insert(needle.to_string(), code);
    }

    pub(crate) fn set_hook_exit(&self, code: i32) {
        self.state.borrow_mut().hook_code = code;
    }

    pub(crate) fn set_partition_output(&self, output: &str) {
        self.state.borrow_mut().partition_output = Some(output.to_string());
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Host for FakeHost {
    fn loop_attach(&self, image: &Path) -> Result<String> {
        self.record(format!("losetup-attach {}", image.display()));
        let mut state = self.state.borrow_mut();
        if state.fail_attach {
            return Err(PipelineError::AttachFailed {
                image: image.to_path_buf(),
                message: "no free loop device".into(),
            }
            .into());
        }
        let device = format!("/dev/loop{}", state.next_loop);
        state.next_loop += 1;
        state.attached.push(device.clone());
        Ok(device)
    }

    fn loop_detach(&self, device: &str) -> Result<()> {
        self.record(format!("losetup-detach {device}"));
        let mut state = self.state.borrow_mut();
        let before = state.attached.len();
        state.attached.retain(|d| d != device);
        if state.attached.len() == before {
            bail!("{device} is not attached");
        }
        Ok(())
    }

    fn device_exists(&self, device: &str) -> bool {
        let state = self.state.borrow();
        if state.hide_partitions && device.starts_with("/dev/loop") {
            return false;
        }
        true
    }

    fn mount(&self, device: &str, target: &Path) -> Result<()> {
        self.record(format!("mount {} {}", device, target.display()));
        let mut state = self.state.borrow_mut();
        if state.fail_mount.as_deref() == Some(target) {
            return Err(PipelineError::MountFailed {
                device: device.to_string(),
                target: target.to_path_buf(),
                message: "wrong fs type".into(),
            }
            .into());
        }
        state.mounts.push((device.to_string(), target.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.record(format!("umount {}", target.display()));
        let mut state = self.state.borrow_mut();
        let before = state.mounts.len();
        state.mounts.retain(|(_, t)| t != target);
        if state.mounts.len() == before {
            bail!("{} is not mounted", target.display());
        }
        Ok(())
    }

    fn mount_table(&self) -> Result<String> {
        let state = self.state.borrow();
        Ok(state
            .mounts
            .iter()
            .chain(state.foreign_mounts.iter())
            .map(|(dev, target)| format!("{} {} ext4 rw,relatime 0 0\n", dev, target.display()))
            .collect())
    }

    fn print_partitions(&self, image: &Path) -> Result<String> {
        self.record(format!("parted-print {}", image.display()));
        if let Some(output) = self.state.borrow().partition_output.clone() {
            return Ok(output);
        }
        let disk = fs::metadata(image)?.len();
        let p2_end = *self
            .state
            .borrow_mut()
            .p2_end
            .entry(image.to_path_buf())
            .or_insert(disk - 1);
        Ok(format!(
            "BYT;\n{img}:{disk}B:file:512:512:msdos::;\n\
             1:{p1s}B:{p1e}B:{p1z}B:fat32::lba;\n\
             2:{p2s}B:{p2e}B:{p2z}B:ext4::;\n",
            img = image.display(),
            p1s = P1_START,
            p1e = P1_END,
            p1z = P1_END - P1_START + 1,
            p2s = P2_START,
            p2e = p2_end,
            p2z = p2_end - P2_START + 1,
        ))
    }

    fn resize_partition(&self, image: &Path, number: u32) -> Result<()> {
        self.record(format!("parted-resize {} {}", image.display(), number));
        let disk = fs::metadata(image)?.len();
        self.state
            .borrow_mut()
            .p2_end
            .insert(image.to_path_buf(), disk - 1);
        Ok(())
    }

    fn grow_filesystem(&self, device: &str) -> Result<()> {
        self.record(format!("resize2fs {device}"));
        Ok(())
    }

    fn run_hook(&self, program: &Path, args: &[String], _env: &[(String, String)]) -> Result<i32> {
        self.record(format!("hook {} {}", program.display(), args.join(" ")));
        Ok(self.state.borrow().hook_code)
    }

    fn spawn_in_container(&self, root: &Path, command: &[String]) -> Result<i32> {
        let line = command.join(" ");
        self.record(format!("nspawn {} {}", root.display(), line));
        let state = self.state.borrow();
        Ok(state
            .container_codes
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0))
    }

    fn block_copy(&self, source: &Path, target: &Path, block_size: &str) -> Result<()> {
        self.record(format!(
            "dd {} {} {}",
            source.display(),
            target.display(),
            block_size
        ));
        fs::copy(source, target)?;
        Ok(())
    }

    fn interactive_shell(&self, root: &Path, target: ShellTarget) -> Result<i32> {
        self.record(format!("shell {:?} {}", target, root.display()));
        Ok(0)
    }
}
