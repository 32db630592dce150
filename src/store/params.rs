//! Persisted pipeline parameters (`etc/sdm/cparams`).
//!
//! Format: one `name:value` per line. On write, `#` in a value is escaped as
//! `\#`, and values with edge whitespace or an outer pair of quotes are
//! wrapped in double quotes. On read, text after an unescaped `#` is dropped,
//! the value is trimmed, one layer of quotes is removed and `\#` is unescaped.
//! Reading what was written gives back the same parameters.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::fs;
use std::path::Path;

use super::PARAMS_FILE;
use crate::error::PipelineError;

/// Every parameter the pipeline records, in write order.
pub const TRACKED_KEYS: &[&str] = &[
    "version",
    "imagename",
    "myuser",
    "uid",
    "ssh",
    "locale",
    "timezone",
    "keymap",
    "wificountry",
    "hostname",
    "apps",
    "xapps",
    "poptions",
    "bootset",
    "svcenable",
    "svcdisable",
    "cscript",
    "csrc",
    "reboot",
    "rebootwait",
    "hdmigroup",
    "hdmimode",
];

/// Settings a burn may refresh on top of what customize stored.
pub const MERGE_FORWARD_KEYS: &[&str] = &[
    "myuser",
    "uid",
    "locale",
    "timezone",
    "keymap",
    "wificountry",
    "hostname",
    "cscript",
    "csrc",
];

/// Ordered name → value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: IndexMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`. Keys are `[A-Za-z0-9_]+`; values may not span lines.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) -> Result<(), PipelineError> {
        let value = value.into();
        if !is_valid_key(key) {
            return Err(PipelineError::invalid(
                "parameter name",
                format!("'{key}' is not a valid parameter name"),
            ));
        }
        if value.contains('\n') || value.contains('\r') {
            return Err(PipelineError::invalid(
                key,
                "value must not contain line breaks",
            ));
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value of `key` when present and non-empty.
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start from `stored`; for each of `keys`, a non-empty value in `fresh` wins.
    pub fn merge_forward(stored: &Params, fresh: &Params, keys: &[&str]) -> Params {
        let mut merged = stored.clone();
        for key in keys {
            if let Some(value) = fresh.get_nonempty(key) {
                merged.entries.insert((*key).to_string(), value.to_string());
            }
        }
        merged
    }

    /// Serialized file contents.
    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, encode_value(v)))
            .collect()
    }

    /// Parse file contents. Lines that are not `name:value` are skipped.
    pub fn decode(text: &str) -> Params {
        let mut params = Params::new();
        for line in text.lines() {
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, raw)) = line.split_once(':') else {
                continue;
            };
            if !is_valid_key(key) {
                continue;
            }
            params
                .entries
                .insert(key.to_string(), decode_value(raw));
        }
        params
    }
}

/// Write `params` into the image at `root`, replacing any previous file.
pub fn write(root: &Path, params: &Params) -> Result<()> {
    let path = root.join(PARAMS_FILE);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::write(&path, params.encode())
        .with_context(|| format!("writing parameters '{}'", path.display()))
}

/// Read the parameters stored in the image at `root`.
pub fn read(root: &Path) -> Result<Params> {
    let path = root.join(PARAMS_FILE);
    if !path.is_file() {
        return Err(PipelineError::not_found("Parameter file", path).into());
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading parameters '{}'", path.display()))?;
    Ok(Params::decode(&text))
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn is_quote_wrapped(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
}

fn encode_value(value: &str) -> String {
    let escaped = value.replace('#', "\\#");
    if escaped.trim() != escaped || is_quote_wrapped(&escaped) {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

fn decode_value(raw: &str) -> String {
    let mut cut = raw.len();
    let mut prev = None;
    for (idx, ch) in raw.char_indices() {
        if ch == '#' && prev != Some('\\') {
            cut = idx;
            break;
        }
        prev = Some(ch);
    }
    let mut value = raw[..cut].trim();
    if is_quote_wrapped(value) {
        value = &value[1..value.len() - 1];
    }
    value.replace("\\#", "#")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(pairs: &[(&str, &str)]) -> Params {
        let mut p = Params::new();
        for (k, v) in pairs {
            p.insert(k, *v).unwrap();
        }
        p
    }

    #[test]
    fn round_trip_plain_values() {
        let p = params(&[
            ("myuser", "pi"),
            ("locale", "en_GB.UTF-8"),
            ("apps", "vim emacs git"),
            ("bootset", "camera:0,i2c:1"),
            ("reboot", ""),
        ]);
        assert_eq!(Params::decode(&p.encode()), p);
    }

    #[test]
    fn round_trip_tricky_values() {
        let tricky = [
            "a:b:c",
            "has # hash",
            "#leading",
            "trailing#",
            "back\\#slash",
            "\\\\#double",
            " leading space",
            "trailing space ",
            "'single'",
            "\"double\"",
            "\"half",
            "'",
            "\"a\" ",
            "tab\tinside",
            "",
        ];
        for value in tricky {
            let p = params(&[("cscript", value)]);
            assert_eq!(
                Params::decode(&p.encode()),
                p,
                "value {value:?} did not survive"
            );
        }
    }

    #[test]
    fn write_then_read_from_image() {
        let temp = TempDir::new().unwrap();
        let p = params(&[("myuser", "bls"), ("timezone", "America/Los_Angeles")]);
        write(temp.path(), &p).unwrap();
        assert_eq!(read(temp.path()).unwrap(), p);
    }

    #[test]
    fn write_overwrites_previous_file() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), &params(&[("myuser", "one"), ("uid", "1000")])).unwrap();
        write(temp.path(), &params(&[("myuser", "two")])).unwrap();
        let read_back = read(temp.path()).unwrap();
        assert_eq!(read_back.get("myuser"), Some("two"));
        assert_eq!(read_back.get("uid"), None);
    }

    #[test]
    fn decode_strips_comments_quotes_and_whitespace() {
        let text = "# header\n\nmyuser: 'bls'   # the user\nlocale:\"en_US.UTF-8\"\t\nnot a pair\nbad-key:x\n";
        let p = Params::decode(text);
        assert_eq!(p.get("myuser"), Some("bls"));
        assert_eq!(p.get("locale"), Some("en_US.UTF-8"));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn insert_rejects_newlines_and_bad_keys() {
        let mut p = Params::new();
        assert!(p.insert("myuser", "a\nb").is_err());
        assert!(p.insert("my-user", "a").is_err());
        assert!(p.insert("", "a").is_err());
    }

    #[test]
    fn merge_forward_prefers_fresh_nonempty() {
        let stored = params(&[("myuser", "old"), ("locale", "en_GB.UTF-8"), ("apps", "vim")]);
        let fresh = params(&[("myuser", "new"), ("locale", ""), ("apps", "emacs")]);
        let merged = Params::merge_forward(&stored, &fresh, MERGE_FORWARD_KEYS);
        assert_eq!(merged.get("myuser"), Some("new"));
        assert_eq!(merged.get("locale"), Some("en_GB.UTF-8"));
        // apps is not a merge-forward key
        assert_eq!(merged.get("apps"), Some("vim"));
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = read(temp.path()).unwrap_err();
        assert_eq!(
            PipelineError::find(&err).unwrap().kind(),
            crate::error::ErrorKind::NotFound
        );
    }
}
