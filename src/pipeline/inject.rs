//! Phase 0: host-side file injection into the mounted image.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::RunRequest;
use crate::error::PipelineError;
use crate::host::Host;
use crate::image::DiskImage;
use crate::settings::Settings;
use crate::store::{self, audit, params, ASSETS_DIR, BASE_BOOTSET_FILE, RUNTIME_DIR, SDM_DIR};

/// Name of the base boot settings template in the runtime directory.
const BASE_BOOTSET_TEMPLATE: &str = "1piboot.conf";

/// Copy everything Phase 1 needs into the image at `root`, persist the
/// parameters and run the custom script's phase `0` on the host.
///
/// The completion marker is written last, so a failed injection is retried
/// in full on the next run.
pub fn run(
    host: &dyn Host,
    settings: &Settings,
    request: &RunRequest,
    image: &DiskImage,
    root: &Path,
) -> Result<()> {
    info!("Phase 0: injecting files into {}", root.display());
    audit::append(
        root,
        &format!(
            "sdmaker {} Phase 0 starting on {}",
            env!("CARGO_PKG_VERSION"),
            image.display_name()
        ),
    )?;

    for dir in [SDM_DIR, ASSETS_DIR, RUNTIME_DIR] {
        let path = root.join(dir);
        fs::create_dir_all(&path).with_context(|| format!("creating '{}'", path.display()))?;
    }

    let copied = copy_tree(&settings.runtime_dir, &root.join(RUNTIME_DIR))?;
    debug!("Copied {} runtime files", copied);

    let base = root.join(BASE_BOOTSET_FILE);
    let template = settings.runtime_dir.join(BASE_BOOTSET_TEMPLATE);
    if !base.exists() && template.is_file() {
        copy_file(&template, &base)?;
    }

    if let Some(script) = &request.custom_script {
        install_executable(script, &root.join(RUNTIME_DIR).join(file_name(script)?))?;
    }

    for list in [&request.apps, &request.xapps] {
        if let Some(source) = list.source() {
            copy_file(source, &root.join(ASSETS_DIR).join(file_name(source)?))?;
        }
    }

    request.bootset.write_overlay(root)?;
    params::write(root, &request.params)?;
    for (key, value) in request.params.iter().filter(|(_, v)| !v.is_empty()) {
        audit::append(root, &format!("{key}: {value}"))?;
    }

    if let Some(script) = &request.custom_script {
        run_custom_phase0(host, request, script, root)?;
    }

    store::mark_customized(root, &audit::timestamp_now())?;
    audit::append(root, "Phase 0 completed")?;
    Ok(())
}

fn run_custom_phase0(host: &dyn Host, request: &RunRequest, script: &Path, root: &Path) -> Result<()> {
    info!("Running {} phase 0", script.display());
    let mut env = vec![("SDMPT".to_string(), root.display().to_string())];
    if let Some(source) = &request.custom_source {
        env.push(("SDM_CSRC".to_string(), source.display().to_string()));
    }
    let code = host.run_hook(script, &["0".to_string()], &env)?;
    if code != 0 {
        return Err(PipelineError::CommandFailed {
            command: format!("{} 0", script.display()),
            status: code,
        })
        .context("custom script phase 0 failed");
    }
    Ok(())
}

/// Copy `src` to `dest` with mode 0755.
pub(super) fn install_executable(src: &Path, dest: &Path) -> Result<()> {
    copy_file(src, dest)?;
    fs::set_permissions(dest, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("making '{}' executable", dest.display()))
}

/// Copy the tree under `src` into `dest`, overwriting files. Returns the
/// number of files copied.
pub(super) fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walking '{}'", src.display()))?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target: PathBuf = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating '{}'", target.display()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("reading link '{}'", entry.path().display()))?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)
                    .with_context(|| format!("replacing '{}'", target.display()))?;
            }
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| format!("linking '{}'", target.display()))?;
        } else {
            copy_file(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

pub(super) fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::copy(src, dest)
        .with_context(|| format!("copying '{}' to '{}'", src.display(), dest.display()))?;
    Ok(())
}

pub(super) fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name().ok_or_else(|| {
        PipelineError::invalid("path", format!("'{}' has no file name", path.display())).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;
    use crate::options::ModeKind;
    use crate::pipeline::testutil::Workspace;
    use crate::store::{bootset, AppList};

    fn inject(ws: &Workspace, host: &FakeHost, request: &RunRequest) -> Result<()> {
        let image = DiskImage::open(&ws.image()).unwrap();
        fs::create_dir_all(ws.root()).unwrap();
        run(host, &ws.settings, request, &image, &ws.root())
    }

    #[test]
    fn copies_runtime_script_and_app_lists() {
        let ws = Workspace::new(1 << 20);
        fs::create_dir_all(ws.settings.runtime_dir.join("1piboot")).unwrap();
        fs::write(ws.settings.runtime_dir.join("1piboot/extra.sh"), "x").unwrap();
        fs::write(ws.settings.runtime_dir.join(BASE_BOOTSET_TEMPLATE), "camera=1\n").unwrap();
        let script = ws.temp.path().join("my-custom.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        let list = ws.temp.path().join("apps.list");
        fs::write(&list, "vim\n").unwrap();

        let host = FakeHost::new();
        let mut request = ws.request(ModeKind::Customize);
        request.custom_script = Some(script.clone());
        request.apps = AppList::resolve(&format!("@{}", list.display())).unwrap();
        request.bootset.set("camera", "0");
        inject(&ws, &host, &request).unwrap();

        let root = ws.root();
        assert!(root.join("usr/local/sdm/1piboot/extra.sh").is_file());
        assert!(root.join(BASE_BOOTSET_FILE).is_file());
        let dest = root.join("usr/local/sdm/my-custom.sh");
        assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o777, 0o755);
        assert!(root.join("etc/sdm/assets/apps.list").is_file());
        assert_eq!(
            bootset::read_overlay(&root).unwrap(),
            vec![("camera".to_string(), "0".to_string())]
        );
        assert_eq!(host.count(&format!("hook {} 0", script.display())), 1);
        assert!(store::is_customized(&root));
    }

    #[test]
    fn audit_log_records_phase_and_params() {
        let ws = Workspace::new(1 << 20);
        let host = FakeHost::new();
        let mut request = ws.request(ModeKind::Customize);
        request.params.insert("locale", "en_GB.UTF-8").unwrap();
        inject(&ws, &host, &request).unwrap();

        let history = fs::read_to_string(ws.root().join(store::HISTORY_FILE)).unwrap();
        assert!(history.contains("Phase 0 starting on pi.img"));
        assert!(history.contains("locale: en_GB.UTF-8"));
        assert!(history.trim_end().ends_with("Phase 0 completed"));
    }

    #[test]
    fn failing_hook_leaves_no_marker() {
        let ws = Workspace::new(1 << 20);
        let host = FakeHost::new();
        host.set_hook_exit(1);
        let script = ws.temp.path().join("c.sh");
        fs::write(&script, "").unwrap();
        let mut request = ws.request(ModeKind::Customize);
        request.custom_script = Some(script);

        assert!(inject(&ws, &host, &request).is_err());
        assert!(!store::is_customized(&ws.root()));
    }
}
