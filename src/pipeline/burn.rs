//! Burn modes: copy a customized image to a device or a new file, then make
//! the per-device edits on the copy.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use tracing::{info, warn};

use super::inject::{copy_file, copy_tree, file_name, install_executable};
use super::{finish, Outcome, RunRequest};
use crate::error::PipelineError;
use crate::host::Host;
use crate::image::{self, DiskImage, MountLayout, MountScope};
use crate::options::ModeKind;
use crate::settings::Settings;
use crate::store::{audit, params, Params, RUNTIME_DIR};
use crate::store::params::MERGE_FORWARD_KEYS;

const HOSTS_FILE: &str = "etc/hosts";
const HOSTNAME_FILE: &str = "etc/hostname";
const LOOPBACK_HOST_ADDR: &str = "127.0.1.1";

pub fn run(
    host: &dyn Host,
    settings: &Settings,
    request: &RunRequest,
    image: &DiskImage,
) -> Result<Outcome> {
    let target = request
        .burn_target
        .as_deref()
        .ok_or_else(|| PipelineError::invalid("burn", "no target given"))?;
    check_target(host, request.mode, target)?;

    info!("Burning {} to {}", image.display_name(), target.display());
    host.block_copy(image.path(), target, &settings.burn_block_size)
        .with_context(|| format!("copying {} to {}", image.display_name(), target.display()))?;

    let burned = DiskImage::open(target)?;
    let layout = MountLayout::new(settings.mount_dir.clone());
    let handle = image::acquire(host, &burned, &layout, MountScope::RootOnly, false)?;
    let result = personalize(handle.root(), request, image, target);
    finish(handle, result)?;

    Ok(Outcome {
        burned_to: Some(target.to_path_buf()),
        ..Outcome::default()
    })
}

/// Refuse targets that would destroy something in use.
fn check_target(host: &dyn Host, mode: ModeKind, target: &Path) -> Result<()> {
    if mode == ModeKind::BurnFile {
        if target.exists() {
            return Err(PipelineError::invalid(
                "burnfile",
                format!("{} already exists", target.display()),
            )
            .into());
        }
        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if !parent.is_dir() {
            return Err(PipelineError::not_found("Output directory", parent).into());
        }
        return Ok(());
    }

    let meta = fs::metadata(target).map_err(|_| PipelineError::not_found("Burn device", target))?;
    if !meta.file_type().is_block_device() {
        return Err(PipelineError::invalid(
            "burn",
            format!("{} is not a block device", target.display()),
        )
        .into());
    }
    let table = host.mount_table()?;
    if mounted_from(&table, &target.display().to_string()) {
        return Err(PipelineError::DeviceBusy {
            path: target.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

/// Whether `device` or one of its partitions is a mount source in `table`.
fn mounted_from(table: &str, device: &str) -> bool {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|source| source.strip_prefix(device))
        .any(|rest| {
            let digits = rest.strip_prefix('p').unwrap_or(rest);
            rest.is_empty() || (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        })
}

/// Edits made on the burned copy: custom script inputs, parameters carried
/// forward, hostname, audit entries.
fn personalize(root: &Path, request: &RunRequest, image: &DiskImage, target: &Path) -> Result<()> {
    let fresh = install_custom_inputs(root, request)?;
    let stored = match params::read(root) {
        Ok(stored) => stored,
        Err(e) => {
            warn!("No stored parameters in burned image ({:#}); starting empty", e);
            Params::new()
        }
    };
    let merged = Params::merge_forward(&stored, &fresh, MERGE_FORWARD_KEYS);
    params::write(root, &merged)?;

    audit::append(
        root,
        &format!(
            "sdmaker {} burned {} to {}",
            env!("CARGO_PKG_VERSION"),
            image.display_name(),
            target.display()
        ),
    )?;

    if let Some(hostname) = merged.get_nonempty("hostname") {
        set_hostname(root, hostname)?;
        audit::append(root, &format!("Hostname set to {hostname}"))?;
    }
    Ok(())
}

/// Copy `--cscript`/`--csrc` into the burned copy. The returned parameters
/// name their paths inside the image.
fn install_custom_inputs(root: &Path, request: &RunRequest) -> Result<Params> {
    let mut fresh = request.params.clone();
    let runtime = root.join(RUNTIME_DIR);

    if let Some(script) = &request.custom_script {
        let name = file_name(script)?;
        install_executable(script, &runtime.join(name))?;
        fresh.insert("cscript", format!("/{RUNTIME_DIR}/{}", name.to_string_lossy()))?;
    }
    if let Some(source) = &request.custom_source {
        let name = file_name(source)?;
        let dest = runtime.join(name);
        if source.is_dir() {
            fs::create_dir_all(&dest).with_context(|| format!("creating '{}'", dest.display()))?;
            copy_tree(source, &dest)?;
        } else {
            copy_file(source, &dest)?;
        }
        fresh.insert("csrc", format!("/{RUNTIME_DIR}/{}", name.to_string_lossy()))?;
    }
    Ok(fresh)
}

fn set_hostname(root: &Path, hostname: &str) -> Result<()> {
    let hostname_path = root.join(HOSTNAME_FILE);
    if let Some(parent) = hostname_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::write(&hostname_path, format!("{hostname}\n"))
        .with_context(|| format!("writing '{}'", hostname_path.display()))?;

    let hosts_path = root.join(HOSTS_FILE);
    let existing = if hosts_path.is_file() {
        fs::read_to_string(&hosts_path)
            .with_context(|| format!("reading '{}'", hosts_path.display()))?
    } else {
        "127.0.0.1\tlocalhost\n".to_string()
    };
    let mut hosts: String = existing
        .lines()
        .filter(|line| line.split_whitespace().next() != Some(LOOPBACK_HOST_ADDR))
        .map(|line| format!("{line}\n"))
        .collect();
    hosts.push_str(&format!("{LOOPBACK_HOST_ADDR}\t{hostname}\n"));
    fs::write(&hosts_path, hosts).with_context(|| format!("writing '{}'", hosts_path.display()))
}
