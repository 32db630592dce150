//! Command-line front end.
//!
//! Parses switches with clap, then validates and resolves them into a
//! [`RunRequest`] before anything touches the image.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::options::{
    self, check_conflicts, parse_digits, require_digits, validate_hdmi_pair, ModeFlags,
    BOOTSET_KEYS, PHASE_OPTIONS, SSH_MODES,
};
use crate::pipeline::RunRequest;
use crate::settings::{PackageFailurePolicy, Settings};
use crate::store::bootset::ServiceAction;
use crate::store::params::TRACKED_KEYS;
use crate::store::{AppList, BootSettings, Params};

/// Seconds to wait before the first-boot reboot when `--rebootwait` is absent.
const DEFAULT_REBOOT_WAIT: &str = "20";

/// Log format options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// Customize, mount, explore and burn Raspberry Pi OS images.
#[derive(Debug, Parser)]
#[command(name = "sdmaker", version, about)]
pub struct Cli {
    /// Image file (or block device for --mount/--explore)
    pub image: PathBuf,

    // Modes
    /// Customize the image (default)
    #[arg(long)]
    pub customize: bool,
    /// Burn the image to a block device
    #[arg(long, value_name = "DEV")]
    pub burn: Option<PathBuf>,
    /// Burn the image to a new image file
    #[arg(long, value_name = "FILE")]
    pub burnfile: Option<PathBuf>,
    /// Mount the image and open a shell on the host
    #[arg(long)]
    pub mount: bool,
    /// Open a shell inside the image
    #[arg(long)]
    pub explore: bool,
    /// Extend the image (alone: extend only)
    #[arg(long)]
    pub extend: bool,

    // Run control
    /// MiB to add when extending
    #[arg(long, value_name = "N")]
    pub xmb: Option<String>,
    /// Do not extend the image during customize
    #[arg(long)]
    pub noextend: bool,
    /// Run Phase 0 and Phase 1 again on an already customized image
    #[arg(long)]
    pub redo_customize: bool,
    /// Do not open an interactive shell
    #[arg(long)]
    pub batch: bool,
    /// Reboot after first boot completes
    #[arg(long)]
    pub restart: bool,
    /// Do not reboot after first boot
    #[arg(long)]
    pub norestart: bool,
    #[arg(long, value_name = "SECS")]
    pub rebootwait: Option<String>,

    // Image settings
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long, value_name = "N")]
    pub uid: Option<String>,
    /// service, socket or none
    #[arg(long)]
    pub ssh: Option<String>,
    #[arg(long)]
    pub locale: Option<String>,
    #[arg(long)]
    pub timezone: Option<String>,
    #[arg(long)]
    pub keymap: Option<String>,
    #[arg(long)]
    pub wifi_country: Option<String>,
    #[arg(long)]
    pub hostname: Option<String>,
    /// Packages to install: a list, or @file
    #[arg(long, value_name = "LIST|@FILE")]
    pub apps: Option<String>,
    /// Desktop packages to install: a list, or @file
    #[arg(long, value_name = "LIST|@FILE")]
    pub xapps: Option<String>,
    /// Phase behavior switches, comma separated
    #[arg(long, value_name = "CSV")]
    pub poptions: Option<String>,
    /// Boot settings as key:value pairs, comma separated
    #[arg(long, value_name = "K:V,...")]
    pub bootset: Option<String>,
    #[arg(long, value_name = "N")]
    pub hdmigroup: Option<String>,
    #[arg(long, value_name = "N")]
    pub hdmimode: Option<String>,
    /// Services to enable at first boot
    #[arg(long, value_name = "CSV")]
    pub svc_enable: Option<String>,
    /// Services to disable at first boot
    #[arg(long, value_name = "CSV")]
    pub svc_disable: Option<String>,
    /// Custom script run in Phase 0 (host) and Phase 1 (image)
    #[arg(long, value_name = "PATH")]
    pub cscript: Option<PathBuf>,
    /// Source directory handed to the custom script
    #[arg(long, value_name = "PATH")]
    pub csrc: Option<PathBuf>,

    // Host settings
    /// Settings file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    pub mount_dir: Option<PathBuf>,
    /// best-effort or fatal
    #[arg(long, value_name = "POLICY")]
    pub apt_failure: Option<String>,
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn mode_flags(&self) -> ModeFlags {
        ModeFlags {
            customize: self.customize,
            burn: self.burn.is_some(),
            burnfile: self.burnfile.is_some(),
            mount: self.mount,
            explore: self.explore,
            extend: self.extend,
            restart: self.restart,
            norestart: self.norestart,
        }
    }

    /// Apply host-setting switches on top of loaded settings.
    pub fn apply_overrides(&self, settings: &mut Settings) -> Result<()> {
        if let Some(dir) = &self.mount_dir {
            if !dir.is_absolute() {
                return Err(crate::error::PipelineError::invalid(
                    "mount-dir",
                    format!("'{}' is not an absolute path", dir.display()),
                )
                .into());
            }
            settings.mount_dir = dir.clone();
        }
        if let Some(policy) = &self.apt_failure {
            settings.package_failure =
                PackageFailurePolicy::parse(policy).context("invalid --apt-failure")?;
        }
        Ok(())
    }

    /// Validate every switch and build the request.
    pub fn into_request(&self) -> Result<RunRequest> {
        let mode = check_conflicts(&self.mode_flags())?;
        let mut request = RunRequest::new(mode, self.image.clone());
        request.burn_target = self.burn.clone().or_else(|| self.burnfile.clone());
        request.extend = self.extend;
        request.noextend = self.noextend;
        request.redo_customize = self.redo_customize;
        request.batch = self.batch;

        if let Some(xmb) = &self.xmb {
            let mb = parse_digits("xmb", xmb)?;
            if mb.checked_mul(1024 * 1024).is_none() {
                return Err(crate::error::PipelineError::invalid(
                    "xmb",
                    format!("{mb} MiB is too large"),
                )
                .into());
            }
            request.xmb = Some(mb);
        }
        if let Some(uid) = &self.uid {
            require_digits("uid", uid)?;
        }
        let rebootwait = match &self.rebootwait {
            Some(wait) => {
                require_digits("rebootwait", wait)?;
                wait.clone()
            }
            None => DEFAULT_REBOOT_WAIT.to_string(),
        };
        let hdmi = validate_hdmi_pair(self.hdmigroup.as_deref(), self.hdmimode.as_deref())?;
        let ssh = self
            .ssh
            .as_deref()
            .map(|raw| options::validate_choice("ssh", raw, SSH_MODES))
            .transpose()?;
        if let Some(raw) = &self.poptions {
            request.poptions = options::validate_list("poptions", raw, PHASE_OPTIONS)?;
        }

        let mut bootset = BootSettings::new();
        let pairs = match &self.bootset {
            Some(raw) => options::parse_key_values("bootset", raw, BOOTSET_KEYS)?,
            None => Vec::new(),
        };
        for (key, value) in &pairs {
            bootset.set(key, value);
        }
        if let Some((group, hdmi_mode)) = &hdmi {
            bootset.set("hdmi_group", group);
            bootset.set("hdmi_mode", hdmi_mode);
        }
        let enable = match &self.svc_enable {
            Some(raw) => options::parse_service_list("svc-enable", raw)?,
            None => Vec::new(),
        };
        let disable = match &self.svc_disable {
            Some(raw) => options::parse_service_list("svc-disable", raw)?,
            None => Vec::new(),
        };
        for svc in &enable {
            bootset.service(svc, ServiceAction::Enable);
        }
        for svc in &disable {
            bootset.service(svc, ServiceAction::Disable);
        }
        if self.restart {
            bootset.set("reboot", &rebootwait);
        }
        request.bootset = bootset;

        if let Some(spec) = &self.apps {
            request.apps = AppList::resolve(spec)?;
        }
        if let Some(spec) = &self.xapps {
            request.xapps = AppList::resolve(spec)?;
        }
        request.custom_script = self.cscript.clone();
        request.custom_source = self.csrc.clone();

        let image_name = request
            .image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bootset_csv = pairs
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(",");
        let path_text = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };

        let mut params = Params::new();
        for key in TRACKED_KEYS {
            let value = match *key {
                "version" => env!("CARGO_PKG_VERSION").to_string(),
                "imagename" => image_name.clone(),
                "myuser" => self.user.clone().unwrap_or_default(),
                "uid" => self.uid.clone().unwrap_or_default(),
                "ssh" => ssh.clone().unwrap_or_default(),
                "locale" => self.locale.clone().unwrap_or_default(),
                "timezone" => self.timezone.clone().unwrap_or_default(),
                "keymap" => self.keymap.clone().unwrap_or_default(),
                "wificountry" => self.wifi_country.clone().unwrap_or_default(),
                "hostname" => self.hostname.clone().unwrap_or_default(),
                "apps" => request.apps.joined(),
                "xapps" => request.xapps.joined(),
                "poptions" => request.poptions.to_csv(),
                "bootset" => bootset_csv.clone(),
                "svcenable" => enable.join(","),
                "svcdisable" => disable.join(","),
                "cscript" => path_text(&self.cscript),
                "csrc" => path_text(&self.csrc),
                "reboot" => String::from(if self.restart { "1" } else { "0" }),
                "rebootwait" => rebootwait.clone(),
                "hdmigroup" => self.hdmigroup.clone().unwrap_or_default(),
                "hdmimode" => self.hdmimode.clone().unwrap_or_default(),
                _ => String::new(),
            };
            params.insert(key, value)?;
        }
        request.params = params;

        Ok(request)
    }
}
