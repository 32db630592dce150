//! Boot settings overlay (`etc/sdm/auto-1piboot.conf`).
//!
//! Holds the boot-time toggles and service directives given on the command
//! line. It is separate from the user-editable `1piboot.conf`. Each key
//! appears at most once: setting a key drops its earlier lines first.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::BOOTSET_OVERLAY_FILE;

const OVERLAY_HEADER: &str =
    "# Generated by sdmaker from command-line switches. Edit 1piboot.conf instead.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Enable,
    Disable,
}

impl ServiceAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

/// Overlay entries collected from the command line, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootSettings {
    entries: Vec<(String, String)>,
}

impl BootSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.retain(|(k, _)| k != key);
        self.entries.push((key.to_string(), value.to_string()));
    }

    pub fn service(&mut self, name: &str, action: ServiceAction) {
        self.set(&format!("service.{name}"), action.as_str());
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply every entry to the overlay inside the image at `root`.
    pub fn write_overlay(&self, root: &Path) -> Result<()> {
        for (key, value) in &self.entries {
            set_overlay_value(root, key, value)?;
        }
        Ok(())
    }
}

/// Write `key=value` into the overlay, removing prior lines for `key`.
pub fn set_overlay_value(root: &Path, key: &str, value: &str) -> Result<()> {
    let path = root.join(BOOTSET_OVERLAY_FILE);
    let existing = if path.is_file() {
        fs::read_to_string(&path)
            .with_context(|| format!("reading boot overlay '{}'", path.display()))?
    } else {
        format!("{OVERLAY_HEADER}\n")
    };

    let mut out: String = existing
        .lines()
        .filter(|line| line_key(line) != Some(key))
        .map(|line| format!("{line}\n"))
        .collect();
    out.push_str(&format!("{key}={value}\n"));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::write(&path, out).with_context(|| format!("writing boot overlay '{}'", path.display()))
}

/// Entries currently in the overlay, comments skipped.
pub fn read_overlay(root: &Path) -> Result<Vec<(String, String)>> {
    let path = root.join(BOOTSET_OVERLAY_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading boot overlay '{}'", path.display()))?;
    Ok(text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect())
}

fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    trimmed.split_once('=').map(|(k, _)| k.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn overlay_text(root: &Path) -> String {
        fs::read_to_string(root.join(BOOTSET_OVERLAY_FILE)).unwrap()
    }

    #[test]
    fn same_key_twice_leaves_one_line() {
        let temp = TempDir::new().unwrap();
        set_overlay_value(temp.path(), "camera", "0").unwrap();
        set_overlay_value(temp.path(), "camera", "0").unwrap();

        let text = overlay_text(temp.path());
        assert_eq!(text.lines().filter(|l| *l == "camera=0").count(), 1);
    }

    #[test]
    fn new_value_replaces_old_one() {
        let temp = TempDir::new().unwrap();
        set_overlay_value(temp.path(), "camera", "0").unwrap();
        set_overlay_value(temp.path(), "i2c", "1").unwrap();
        set_overlay_value(temp.path(), "camera", "1").unwrap();

        let entries = read_overlay(temp.path()).unwrap();
        assert_eq!(
            entries,
            vec![
                ("i2c".to_string(), "1".to_string()),
                ("camera".to_string(), "1".to_string())
            ]
        );
        assert!(overlay_text(temp.path()).starts_with("# Generated by sdmaker"));
    }

    #[test]
    fn write_overlay_applies_services_and_toggles() {
        let temp = TempDir::new().unwrap();
        let mut settings = BootSettings::new();
        settings.set("spi", "1");
        settings.service("cron", ServiceAction::Disable);
        settings.service("cron", ServiceAction::Enable);
        settings.write_overlay(temp.path()).unwrap();
        settings.write_overlay(temp.path()).unwrap();

        let entries = read_overlay(temp.path()).unwrap();
        assert_eq!(
            entries,
            vec![
                ("spi".to_string(), "1".to_string()),
                ("service.cron".to_string(), "enable".to_string())
            ]
        );
    }

    #[test]
    fn missing_overlay_reads_empty() {
        let temp = TempDir::new().unwrap();
        assert!(read_overlay(temp.path()).unwrap().is_empty());
    }
}
