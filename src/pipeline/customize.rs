//! Phase 1: work done inside the image through the container-spawn tool.
//!
//! Each step is its own container invocation. Package steps follow
//! [`PackageFailurePolicy`]; every other step is fatal on failure.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use super::RunRequest;
use crate::error::PipelineError;
use crate::host::Host;
use crate::settings::{PackageFailurePolicy, Settings};
use crate::store::{audit, RUNTIME_DIR};

/// Optional script shipped in the runtime directory and run first.
pub const PHASE1_SCRIPT: &str = "sdm-phase1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase1Step {
    /// A script already present in the image.
    Script { label: String, command: Vec<String> },
    /// A package-manager invocation.
    Packages { label: String, command: Vec<String> },
}

impl Phase1Step {
    pub fn label(&self) -> &str {
        match self {
            Self::Script { label, .. } | Self::Packages { label, .. } => label,
        }
    }

    pub fn command(&self) -> &[String] {
        match self {
            Self::Script { command, .. } | Self::Packages { command, .. } => command,
        }
    }
}

/// The ordered Phase 1 steps for `request` against the image at `root`.
///
/// Package groups: without `--poptions apps`/`xapps`, every non-empty list
/// is installed; naming either restricts installation to the named groups.
pub fn plan(settings: &Settings, request: &RunRequest, root: &Path) -> Vec<Phase1Step> {
    let mut steps = Vec::new();
    let in_image = format!("/{RUNTIME_DIR}");

    if root.join(RUNTIME_DIR).join(PHASE1_SCRIPT).is_file() {
        steps.push(Phase1Step::Script {
            label: PHASE1_SCRIPT.to_string(),
            command: vec![format!("{in_image}/{PHASE1_SCRIPT}")],
        });
    }

    let pm = settings.package_manager.as_str();
    let popt = &request.poptions;
    let apt = |label: &str, args: &[&str], packages: &[String]| Phase1Step::Packages {
        label: label.to_string(),
        command: std::iter::once(pm.to_string())
            .chain(args.iter().map(|a| a.to_string()))
            .chain(packages.iter().cloned())
            .collect(),
    };

    if !popt.contains("noupdate") {
        steps.push(apt("update", &["update"], &[]));
    }
    if !popt.contains("noupgrade") {
        steps.push(apt("upgrade", &["-y", "upgrade"], &[]));
    }
    let explicit = popt.contains("apps") || popt.contains("xapps");
    for (group, list) in [("apps", &request.apps), ("xapps", &request.xapps)] {
        if list.is_empty() || (explicit && !popt.contains(group)) {
            continue;
        }
        steps.push(apt(
            &format!("install {group}"),
            &["-y", "install", "--no-install-recommends"],
            list.names(),
        ));
    }
    if !popt.contains("noautoremove") {
        steps.push(apt("autoremove", &["-y", "autoremove"], &[]));
    }

    if let Some(script) = &request.custom_script {
        if let Some(name) = script.file_name() {
            steps.push(Phase1Step::Script {
                label: "custom script phase 1".to_string(),
                command: vec![
                    format!("{in_image}/{}", name.to_string_lossy()),
                    "1".to_string(),
                ],
            });
        }
    }

    steps
}

/// Execute the Phase 1 plan inside the image at `root`.
pub fn run(host: &dyn Host, settings: &Settings, request: &RunRequest, root: &Path) -> Result<()> {
    let steps = plan(settings, request, root);
    info!("Phase 1: {} step(s) in {}", steps.len(), root.display());
    audit::append(root, "Phase 1 starting")?;

    for step in &steps {
        info!("Phase 1: {}", step.label());
        let code = host
            .spawn_in_container(root, step.command())
            .with_context(|| format!("Phase 1 step '{}'", step.label()))?;
        if code == 0 {
            continue;
        }
        let failure = PipelineError::CommandFailed {
            command: step.command().join(" "),
            status: code,
        };
        match (step, settings.package_failure) {
            (Phase1Step::Packages { .. }, PackageFailurePolicy::BestEffort) => {
                warn!("{}; continuing", failure);
                audit::append(
                    root,
                    &format!("Phase 1 '{}' failed with status {}", step.label(), code),
                )?;
            }
            _ => {
                audit::append(
                    root,
                    &format!(
                        "Phase 1 '{}' failed with status {}; aborting",
                        step.label(),
                        code
                    ),
                )?;
                return Err(failure).with_context(|| format!("Phase 1 step '{}'", step.label()));
            }
        }
    }

    audit::append(root, "Phase 1 completed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::host::fake::FakeHost;
    use crate::options::{validate_list, ModeKind, PHASE_OPTIONS};
    use crate::pipeline::testutil::Workspace;
    use crate::store::AppList;
    use std::fs;

    fn labels(steps: &[Phase1Step]) -> Vec<&str> {
        steps.iter().map(Phase1Step::label).collect()
    }

    #[test]
    fn default_plan_updates_upgrades_and_cleans() {
        let ws = Workspace::new(1 << 20);
        let request = ws.request(ModeKind::Customize);
        let steps = plan(&ws.settings, &request, &ws.root());
        assert_eq!(labels(&steps), vec!["update", "upgrade", "autoremove"]);
        assert_eq!(steps[0].command(), ["apt-get", "update"]);
    }

    #[test]
    fn poptions_shape_the_plan() {
        let ws = Workspace::new(1 << 20);
        fs::create_dir_all(ws.root().join(RUNTIME_DIR)).unwrap();
        fs::write(ws.root().join(RUNTIME_DIR).join(PHASE1_SCRIPT), "").unwrap();
        let mut request = ws.request(ModeKind::Customize);
        request.poptions = validate_list("poptions", "noupgrade,xapps", PHASE_OPTIONS).unwrap();
        request.apps = AppList::from_literal("vim git");
        request.xapps = AppList::from_literal("lxde");
        request.custom_script = Some("/home/pi/custom.sh".into());

        let steps = plan(&ws.settings, &request, &ws.root());
        assert_eq!(
            labels(&steps),
            vec![
                "sdm-phase1",
                "update",
                "install xapps",
                "autoremove",
                "custom script phase 1"
            ]
        );
        assert_eq!(
            steps[2].command(),
            ["apt-get", "-y", "install", "--no-install-recommends", "lxde"]
        );
        assert_eq!(steps[4].command(), ["/usr/local/sdm/custom.sh", "1"]);
    }

    #[test]
    fn package_failure_is_best_effort_by_default() {
        let ws = Workspace::new(1 << 20);
        fs::create_dir_all(ws.root()).unwrap();
        let host = FakeHost::new();
        host.set_container_exit("install", 100);
        let mut request = ws.request(ModeKind::Customize);
        request.apps = AppList::from_literal("no-such-package");

        run(&host, &ws.settings, &request, &ws.root()).unwrap();
        assert_eq!(host.count("nspawn"), 4);
        let history = fs::read_to_string(ws.root().join(crate::store::HISTORY_FILE)).unwrap();
        assert!(history.contains("'install apps' failed with status 100"));
    }

    #[test]
    fn package_failure_aborts_when_fatal() {
        let mut ws = Workspace::new(1 << 20);
        ws.settings.package_failure = PackageFailurePolicy::Fatal;
        fs::create_dir_all(ws.root()).unwrap();
        let host = FakeHost::new();
        host.set_container_exit("install", 100);
        let mut request = ws.request(ModeKind::Customize);
        request.apps = AppList::from_literal("no-such-package");

        let err = run(&host, &ws.settings, &request, &ws.root()).unwrap_err();
        assert_eq!(PipelineError::find(&err).unwrap().kind(), ErrorKind::Collaborator);
        // autoremove never ran
        assert_eq!(host.count("nspawn"), 3);
    }

    #[test]
    fn script_failure_is_always_fatal() {
        let ws = Workspace::new(1 << 20);
        fs::create_dir_all(ws.root()).unwrap();
        let host = FakeHost::new();
        host.set_container_exit("custom.sh", 2);
        let mut request = ws.request(ModeKind::Customize);
        request.custom_script = Some("/tmp/custom.sh".into());

        assert!(run(&host, &ws.settings, &request, &ws.root()).is_err());
    }
}
