//! Audit log kept in the image (`etc/sdm/history`).
//!
//! Append-only. Each entry starts with a `YYYY-MM-DD HH:MM:SS` stamp; long
//! entries wrap at [`WRAP_COLUMN`] and continue under the message column.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use time::macros::format_description;
use time::OffsetDateTime;

use super::HISTORY_FILE;

pub const WRAP_COLUMN: usize = 96;
const STAMP_WIDTH: usize = 19;

/// Current local time as an audit stamp (UTC when the offset is unknown).
pub fn timestamp_now() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Append `message` with the current time.
pub fn append(root: &Path, message: &str) -> Result<()> {
    append_at(root, &timestamp_now(), message)
}

pub fn append_at(root: &Path, stamp: &str, message: &str) -> Result<()> {
    let path = root.join(HISTORY_FILE);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening audit log '{}'", path.display()))?;
    file.write_all(format_entry(stamp, message).as_bytes())
        .with_context(|| format!("appending to audit log '{}'", path.display()))
}

/// Render one entry, soft-wrapped at [`WRAP_COLUMN`].
pub fn format_entry(stamp: &str, message: &str) -> String {
    let indent = " ".repeat(STAMP_WIDTH + 1);
    let width = WRAP_COLUMN - indent.len();
    let mut out = String::new();
    for (idx, line) in wrap(message, width).iter().enumerate() {
        if idx == 0 {
            out.push_str(&format!("{stamp:<STAMP_WIDTH$} {line}\n"));
        } else {
            out.push_str(&format!("{indent}{line}\n"));
        }
    }
    out
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        while word.chars().count() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split = word
                .char_indices()
                .nth(width)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            lines.push(word[..split].to_string());
            word = &word[split..];
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}
