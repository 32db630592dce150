//! Host-side settings: where images are mounted, which tools are used and how
//! package failures are treated.
//!
//! Settings come from an optional TOML file. Lookup order is an explicit
//! `--config` path, `$XDG_CONFIG_HOME/sdmaker/config.toml`, then
//! `/etc/sdmaker/config.toml`; missing files fall back to defaults.
//!
//! ```toml
//! mount_dir = "/mnt/sdm"
//! package_failure = "fatal"
//! default_xmb = 4096
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MOUNT_DIR: &str = "/mnt/sdm";
pub const DEFAULT_RUNTIME_DIR: &str = "/usr/local/sdm";
pub const DEFAULT_XMB: u64 = 2048;
const SYSTEM_CONFIG: &str = "/etc/sdmaker/config.toml";

/// What a failing package-manager group does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageFailurePolicy {
    /// Log the failure and continue with the next install group.
    #[default]
    BestEffort,
    /// Abort Phase 1 and go straight to cleanup.
    Fatal,
}

impl PackageFailurePolicy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "besteffort" | "continue" => Ok(Self::BestEffort),
            "fatal" | "abort" => Ok(Self::Fatal),
            other => bail!(
                "unsupported package failure policy '{}' (expected 'best-effort' or 'fatal')",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Root mount point for the image being worked on.
    pub mount_dir: PathBuf,
    /// Host directory holding the runtime files copied into each image.
    pub runtime_dir: PathBuf,
    pub container_tool: String,
    pub package_manager: String,
    pub burn_block_size: String,
    pub package_failure: PackageFailurePolicy,
    /// Extension applied by customize when `--xmb` is not given.
    pub default_xmb: u64,
    pub shell: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mount_dir: PathBuf::from(DEFAULT_MOUNT_DIR),
            runtime_dir: PathBuf::from(DEFAULT_RUNTIME_DIR),
            container_tool: "systemd-nspawn".to_string(),
            package_manager: "apt-get".to_string(),
            burn_block_size: "16M".to_string(),
            package_failure: PackageFailurePolicy::BestEffort,
            default_xmb: DEFAULT_XMB,
            shell: "/bin/bash".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    mount_dir: Option<PathBuf>,
    runtime_dir: Option<PathBuf>,
    container_tool: Option<String>,
    package_manager: Option<String>,
    burn_block_size: Option<String>,
    package_failure: Option<String>,
    default_xmb: Option<u64>,
    shell: Option<String>,
}

impl Settings {
    /// Load settings from `explicit`, or from the first default location that exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(crate::error::PipelineError::not_found("Config file", path).into());
            }
            return Self::from_file(path);
        }
        for candidate in default_locations() {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading settings '{}'", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing settings '{}'", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: SettingsToml = toml::from_str(raw)?;
        let defaults = Self::default();

        let package_failure = match parsed.package_failure.as_deref() {
            Some(value) => PackageFailurePolicy::parse(value)?,
            None => defaults.package_failure,
        };
        let mount_dir = parsed.mount_dir.unwrap_or(defaults.mount_dir);
        if !mount_dir.is_absolute() {
            bail!("mount_dir must be absolute, got '{}'", mount_dir.display());
        }

        Ok(Self {
            mount_dir,
            runtime_dir: parsed.runtime_dir.unwrap_or(defaults.runtime_dir),
            container_tool: parsed.container_tool.unwrap_or(defaults.container_tool),
            package_manager: parsed.package_manager.unwrap_or(defaults.package_manager),
            burn_block_size: parsed.burn_block_size.unwrap_or(defaults.burn_block_size),
            package_failure,
            default_xmb: parsed.default_xmb.unwrap_or(defaults.default_xmb),
            shell: parsed.shell.unwrap_or(defaults.shell),
        })
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(config) = dirs::config_dir() {
        out.push(config.join("sdmaker/config.toml"));
    }
    out.push(PathBuf::from(SYSTEM_CONFIG));
    out
}
