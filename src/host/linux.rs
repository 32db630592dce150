use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::{Host, ShellTarget};
use crate::error::PipelineError;
use crate::process::Cmd;
use crate::settings::Settings;

/// [`Host`] backed by util-linux, parted, e2fsprogs, systemd-nspawn and dd.
#[derive(Debug, Clone)]
pub struct LinuxHost {
    container_tool: String,
    shell: String,
}

impl LinuxHost {
    pub fn new(settings: &Settings) -> Self {
        Self {
            container_tool: settings.container_tool.clone(),
            shell: settings.shell.clone(),
        }
    }

    fn udev_settle(&self) {
        // Best-effort: partition nodes of a fresh loop device show up asynchronously.
        let _ = Cmd::new("udevadm").arg("settle").allow_fail().run();
    }
}

impl Host for LinuxHost {
    fn loop_attach(&self, image: &Path) -> Result<String> {
        let out = Cmd::new("losetup")
            .args(["--show", "-f", "-P"])
            .arg_path(image)
            .allow_fail()
            .run()?;
        if !out.success() {
            return Err(PipelineError::AttachFailed {
                image: image.to_path_buf(),
                message: out.stderr.trim().to_string(),
            }
            .into());
        }
        let device = out.stdout.trim().to_string();
        if device.is_empty() {
            return Err(PipelineError::AttachFailed {
                image: image.to_path_buf(),
                message: "losetup did not report a loop device".to_string(),
            }
            .into());
        }
        self.udev_settle();
        debug!(%device, image = %image.display(), "loop device attached");
        Ok(device)
    }

    fn loop_detach(&self, device: &str) -> Result<()> {
        Cmd::new("losetup")
            .args(["-d", device])
            .error_msg(format!("detaching loop device {device}"))
            .run()?;
        Ok(())
    }

    fn device_exists(&self, device: &str) -> bool {
        Path::new(device).exists()
    }

    fn mount(&self, device: &str, target: &Path) -> Result<()> {
        let out = Cmd::new("mount")
            .arg(device)
            .arg_path(target)
            .allow_fail()
            .run()?;
        if !out.success() {
            return Err(PipelineError::MountFailed {
                device: device.to_string(),
                target: target.to_path_buf(),
                message: out.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        // Let pending writes land before the filesystem goes away.
        let _ = Cmd::new("sync").allow_fail().run();
        Cmd::new("umount")
            .arg_path(target)
            .error_msg(format!("unmounting {}", target.display()))
            .run()?;
        Ok(())
    }

    fn mount_table(&self) -> Result<String> {
        fs::read_to_string("/proc/mounts").context("reading /proc/mounts")
    }

    fn print_partitions(&self, image: &Path) -> Result<String> {
        let out = Cmd::new("parted")
            .args(["-ms"])
            .arg_path(image)
            .args(["unit", "B", "print"])
            .allow_fail()
            .run()?;
        if !out.success() {
            return Err(PipelineError::PartitionTool(format!(
                "parted print on {} failed: {}",
                image.display(),
                out.stderr.trim()
            ))
            .into());
        }
        Ok(out.stdout)
    }

    fn resize_partition(&self, image: &Path, number: u32) -> Result<()> {
        let out = Cmd::new("parted")
            .arg("-s")
            .arg_path(image)
            .args(["resizepart", &number.to_string(), "100%"])
            .allow_fail()
            .run()?;
        if !out.success() {
            return Err(PipelineError::PartitionTool(format!(
                "parted resizepart {} on {} failed: {}",
                number,
                image.display(),
                out.stderr.trim()
            ))
            .into());
        }
        Ok(())
    }

    fn grow_filesystem(&self, device: &str) -> Result<()> {
        // e2fsck exits 1 when it corrected errors, which is fine before a resize.
        let fsck = Cmd::new("e2fsck").args(["-fy", device]).allow_fail().run()?;
        if fsck.code > 1 {
            return Err(PipelineError::CommandFailed {
                command: format!("e2fsck -fy {device}"),
                status: fsck.code,
            }
            .into());
        }
        Cmd::new("resize2fs")
            .arg(device)
            .error_msg(format!("growing filesystem on {device}"))
            .run()?;
        Ok(())
    }

    fn run_hook(&self, program: &Path, args: &[String], env: &[(String, String)]) -> Result<i32> {
        let mut cmd = Cmd::new(program.display().to_string()).args(args).allow_fail();
        for (key, value) in env {
            cmd = cmd.env(key, value);
        }
        cmd.run_interactive()
    }

    fn spawn_in_container(&self, root: &Path, command: &[String]) -> Result<i32> {
        Cmd::new(&self.container_tool)
            .args(["-q", "-D"])
            .arg_path(root)
            .args(command)
            .allow_fail()
            .run_interactive()
    }

    fn block_copy(&self, source: &Path, target: &Path, block_size: &str) -> Result<()> {
        info!(
            "Copying {} to {} (bs={})",
            source.display(),
            target.display(),
            block_size
        );
        Cmd::new("dd")
            .arg(format!("if={}", source.display()))
            .arg(format!("of={}", target.display()))
            .arg(format!("bs={block_size}"))
            .args(["oflag=direct", "status=progress"])
            .error_msg("block copy failed")
            .run_interactive()?;
        let _ = Cmd::new("sync").allow_fail().run();
        Ok(())
    }

    fn interactive_shell(&self, root: &Path, target: ShellTarget) -> Result<i32> {
        match target {
            ShellTarget::Container => self.spawn_in_container(root, &[]),
            ShellTarget::HostDir => Cmd::new(&self.shell)
                .current_dir(root)
                .env("SDMPT", root)
                .allow_fail()
                .run_interactive(),
        }
    }
}
