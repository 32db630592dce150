//! Phase orchestration.
//!
//! ```text
//! START -> EXTEND -> MOUNT -> CHECK_DONE -> INJECT -> CUSTOMIZE -> INTERACTIVE -> CLEANUP
//!                              |                                      ^
//!                              +---- marked / explore / mount --------+
//! ```
//!
//! Failures before MOUNT return straight away. From MOUNT on, every path,
//! success or failure, goes through the same release of the [`MountHandle`].
//! Burn is its own sequence, see [`burn`].

pub mod burn;
pub mod customize;
pub mod inject;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::host::{Host, ShellTarget};
use crate::image::{self, DiskImage, ExtendReport, ImageLock, MountHandle, MountLayout, MountScope};
use crate::options::{ModeKind, OptionSet};
use crate::settings::Settings;
use crate::store::{self, AppList, BootSettings, Params};

/// Everything one invocation asks for, validated and resolved.
///
/// Built once by the command-line front end and only read afterwards.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub mode: ModeKind,
    pub image: PathBuf,
    /// Device or file written by burn modes.
    pub burn_target: Option<PathBuf>,
    /// `--xmb`; the configured default applies when absent.
    pub xmb: Option<u64>,
    pub extend: bool,
    pub noextend: bool,
    pub redo_customize: bool,
    pub batch: bool,
    pub params: Params,
    pub poptions: OptionSet,
    pub bootset: BootSettings,
    pub apps: AppList,
    pub xapps: AppList,
    pub custom_script: Option<PathBuf>,
    pub custom_source: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(mode: ModeKind, image: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            image: image.into(),
            burn_target: None,
            xmb: None,
            extend: false,
            noextend: false,
            redo_customize: false,
            batch: false,
            params: Params::new(),
            poptions: OptionSet::default(),
            bootset: BootSettings::new(),
            apps: AppList::default(),
            xapps: AppList::default(),
            custom_script: None,
            custom_source: None,
        }
    }

    /// MiB to append before mounting, if any.
    ///
    /// Customize applies `default_xmb` only to file images. A device image
    /// is extended only when `--xmb` asks for it, which then fails.
    pub fn extension_mb(&self, settings: &Settings, device_backed: bool) -> Option<u64> {
        let size = self.xmb.unwrap_or(settings.default_xmb);
        match self.mode {
            ModeKind::Customize if self.noextend => None,
            ModeKind::Customize if device_backed && self.xmb.is_none() => None,
            ModeKind::Customize => Some(size),
            ModeKind::ExtendOnly => Some(size),
            ModeKind::Mount | ModeKind::Explore if self.extend => Some(size),
            _ => None,
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub extended: Option<ExtendReport>,
    /// Phase 0 and Phase 1 ran during this invocation.
    pub customized: bool,
    /// The image already carried the completion marker.
    pub already_customized: bool,
    pub burned_to: Option<PathBuf>,
    /// Exit code of the interactive shell, when one was opened.
    pub shell_exit: Option<i32>,
}

/// Run one invocation against `host`.
pub fn run(host: &dyn Host, settings: &Settings, request: &RunRequest) -> Result<Outcome> {
    let image = DiskImage::open(&request.image)?;
    check_inputs(settings, request)?;
    let _lock = ImageLock::acquire(&image)?;

    info!("sdmaker {:?} of {}", request.mode, image.display_name());

    if matches!(request.mode, ModeKind::Burn | ModeKind::BurnFile) {
        return burn::run(host, settings, request, &image);
    }

    let mut outcome = Outcome::default();
    if let Some(delta_mb) = request.extension_mb(settings, image.is_device()) {
        outcome.extended = Some(
            image::extend_and_resize(host, &image, delta_mb)
                .with_context(|| format!("extending {}", image.display_name()))?,
        );
    }
    if request.mode == ModeKind::ExtendOnly {
        return Ok(outcome);
    }

    let layout = MountLayout::new(settings.mount_dir.clone());
    let handle = image::acquire(
        host,
        &image,
        &layout,
        MountScope::Full,
        outcome.extended.is_some(),
    )?;
    let result = run_mounted(host, settings, request, &image, &handle, &mut outcome);
    finish(handle, result).map(|()| outcome)
}

/// Release `handle` after the mounted phases, keeping the first failure.
pub(crate) fn finish(handle: MountHandle<'_>, result: Result<()>) -> Result<()> {
    let released = handle.release();
    match (result, released) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) => Err(e.context("releasing image")),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!("Cleanup after failure also failed: {:#}", release_err);
            Err(e)
        }
    }
}

fn run_mounted(
    host: &dyn Host,
    settings: &Settings,
    request: &RunRequest,
    image: &DiskImage,
    handle: &MountHandle<'_>,
    outcome: &mut Outcome,
) -> Result<()> {
    let root = handle.root();

    let shell = match request.mode {
        ModeKind::Mount => ShellTarget::HostDir,
        ModeKind::Explore => ShellTarget::Container,
        _ => {
            if store::is_customized(root) && !request.redo_customize {
                info!(
                    "{} is already customized; skipping Phase 0 and Phase 1",
                    image.display_name()
                );
                outcome.already_customized = true;
            } else {
                inject::run(host, settings, request, image, root)?;
                customize::run(host, settings, request, root)?;
                outcome.customized = true;
            }
            ShellTarget::Container
        }
    };

    if request.batch {
        return Ok(());
    }
    info!("Opening shell on {}; exit to finish", root.display());
    let code = host.interactive_shell(root, shell)?;
    if code != 0 {
        info!("Shell exited with status {}", code);
    }
    outcome.shell_exit = Some(code);
    Ok(())
}

/// Inputs that must exist before anything is modified.
fn check_inputs(settings: &Settings, request: &RunRequest) -> Result<()> {
    for path in [&request.custom_script, &request.custom_source]
        .into_iter()
        .flatten()
    {
        require_exists("Custom script input", path)?;
    }
    for list in [&request.apps, &request.xapps] {
        if let Some(source) = list.source() {
            require_exists("App list file", source)?;
        }
    }
    if request.mode == ModeKind::Customize && !settings.runtime_dir.is_dir() {
        return Err(PipelineError::not_found("Runtime directory", &settings.runtime_dir).into());
    }
    if matches!(request.mode, ModeKind::Burn | ModeKind::BurnFile) && request.burn_target.is_none() {
        return Err(PipelineError::invalid("burn", "no target given").into());
    }
    Ok(())
}

fn require_exists(what: &str, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::not_found(what, path).into())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    /// A scratch workspace: sparse image, runtime dir and mount dir.
    pub(crate) struct Workspace {
        pub(crate) temp: TempDir,
        pub(crate) settings: Settings,
    }

    impl Workspace {
        pub(crate) fn new(image_bytes: u64) -> Self {
            let temp = TempDir::new().unwrap();
            File::create(temp.path().join("pi.img"))
                .unwrap()
                .set_len(image_bytes)
                .unwrap();
            let runtime = temp.path().join("runtime");
            fs::create_dir_all(&runtime).unwrap();
            fs::write(runtime.join("sdm-firstboot"), "#!/bin/sh\n").unwrap();
            let settings = Settings {
                mount_dir: temp.path().join("mnt"),
                runtime_dir: runtime,
                ..Settings::default()
            };
            Self { temp, settings }
        }

        pub(crate) fn image(&self) -> PathBuf {
            self.temp.path().join("pi.img")
        }

        /// Where the fake host "mounts" the root partition.
        pub(crate) fn root(&self) -> PathBuf {
            self.settings.mount_dir.clone()
        }

        pub(crate) fn request(&self, mode: ModeKind) -> RunRequest {
            let mut request = RunRequest::new(mode, self.image());
            request.batch = true;
            request.noextend = true;
            request
                .params
                .insert("imagename", "pi.img")
                .unwrap();
            request
        }
    }
}
