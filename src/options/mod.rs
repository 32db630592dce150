//! Option validation: comma-separated lists against allow-lists, numeric
//! switches, and mode conflicts.
//!
//! Everything here runs before the pipeline touches the image.

mod modes;
mod numeric;

pub use modes::{check_conflicts, ModeFlags, ModeKind};
pub use numeric::{parse_digits, require_digits, validate_hdmi_pair};

use std::collections::BTreeSet;
use std::fmt;

use crate::error::PipelineError;

/// Phase behavior switches accepted by `--poptions`.
pub const PHASE_OPTIONS: &[&str] = &[
    "apps",
    "xapps",
    "noupdate",
    "noupgrade",
    "noautoremove",
    "nofirstboot",
    "samba",
    "xwindows",
];

/// Boot-time device toggles accepted as `--bootset` keys.
pub const BOOTSET_KEYS: &[&str] = &[
    "audio",
    "blanking",
    "boot_splash",
    "boot_wait",
    "camera",
    "i2c",
    "net_names",
    "onewire",
    "overscan",
    "powerled",
    "rgpio",
    "serial",
    "spi",
];

pub const SSH_MODES: &[&str] = &["service", "socket", "none"];

/// A validated set of option tokens, kept in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    tokens: Vec<String>,
}

impl OptionSet {
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    /// Comma-joined form, as persisted in the parameter store.
    pub fn to_csv(&self) -> String {
        self.tokens.join(",")
    }
}

impl fmt::Display for OptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_csv())
    }
}

/// Split `raw` on commas, trim each token and drop empties.
pub fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validate a comma-separated list against `allowed`.
///
/// Every unrecognized token is reported, not just the first. Duplicates are
/// collapsed.
pub fn validate_list(option: &str, raw: &str, allowed: &[&str]) -> Result<OptionSet, PipelineError> {
    let mut tokens = Vec::new();
    let mut bad = Vec::new();
    for token in split_csv(raw) {
        if !allowed.contains(&token.as_str()) {
            if !bad.contains(&token) {
                bad.push(token);
            }
        } else if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    if !bad.is_empty() {
        return Err(PipelineError::UnrecognizedOptions {
            option: option.to_string(),
            tokens: bad,
        });
    }
    Ok(OptionSet { tokens })
}

/// Validate a single value against `allowed`.
pub fn validate_choice(option: &str, raw: &str, allowed: &[&str]) -> Result<String, PipelineError> {
    let value = raw.trim();
    if allowed.contains(&value) {
        return Ok(value.to_string());
    }
    Err(PipelineError::UnrecognizedOptions {
        option: option.to_string(),
        tokens: vec![value.to_string()],
    })
}

/// Parse `key:value` pairs (e.g. `camera:0,i2c:1`) with keys checked against `allowed_keys`.
///
/// A key given twice keeps its last value. All unknown keys are reported together.
pub fn parse_key_values(
    option: &str,
    raw: &str,
    allowed_keys: &[&str],
) -> Result<Vec<(String, String)>, PipelineError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut bad = Vec::new();
    for token in split_csv(raw) {
        let Some((key, value)) = token.split_once(':') else {
            return Err(PipelineError::invalid(
                option,
                format!("'{token}' is not in key:value form"),
            ));
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        if !allowed_keys.contains(&key.as_str()) {
            if !bad.contains(&key) {
                bad.push(key);
            }
            continue;
        }
        pairs.retain(|(k, _)| k != &key);
        pairs.push((key, value));
    }
    if !bad.is_empty() {
        return Err(PipelineError::UnrecognizedOptions {
            option: option.to_string(),
            tokens: bad,
        });
    }
    Ok(pairs)
}

/// Service names for `--svc-enable`/`--svc-disable`: free-form but must be unit-like.
pub fn parse_service_list(option: &str, raw: &str) -> Result<Vec<String>, PipelineError> {
    let mut out: Vec<String> = Vec::new();
    let bad: BTreeSet<String> = split_csv(raw)
        .into_iter()
        .filter_map(|svc| {
            let valid = svc
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
            if valid {
                if !out.contains(&svc) {
                    out.push(svc);
                }
                None
            } else {
                Some(svc)
            }
        })
        .collect();
    if !bad.is_empty() {
        return Err(PipelineError::UnrecognizedOptions {
            option: option.to_string(),
            tokens: bad.into_iter().collect(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_exactly_the_unrecognized_token() {
        let err = validate_list("poptions", "apps,bogus", &["apps", "xapps"]).unwrap_err();
        match err {
            PipelineError::UnrecognizedOptions { option, tokens } => {
                assert_eq!(option, "poptions");
                assert_eq!(tokens, vec!["bogus".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reports_every_unrecognized_token() {
        let err = validate_list("poptions", "junk, apps ,bogus,junk", PHASE_OPTIONS).unwrap_err();
        let PipelineError::UnrecognizedOptions { tokens, .. } = err else {
            panic!("wrong variant");
        };
        assert_eq!(tokens, vec!["junk".to_string(), "bogus".to_string()]);
    }

    #[test]
    fn accepted_tokens_are_trimmed_and_deduplicated() {
        let set = validate_list("poptions", " apps, xapps ,apps,,", PHASE_OPTIONS).unwrap();
        assert!(set.contains("apps"));
        assert!(set.contains("xapps"));
        assert!(!set.contains("app"));
        assert_eq!(set.to_csv(), "apps,xapps");
    }

    #[test]
    fn empty_list_is_valid() {
        let set = validate_list("poptions", "", PHASE_OPTIONS).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn key_values_keep_last_value() {
        let pairs = parse_key_values("bootset", "camera:0,i2c:1,camera:1", BOOTSET_KEYS).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("i2c".to_string(), "1".to_string()),
                ("camera".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn key_values_reject_unknown_keys() {
        let err = parse_key_values("bootset", "camera:0,warp:9,flux:1", BOOTSET_KEYS).unwrap_err();
        assert!(err.to_string().contains("warp, flux"));
    }

    #[test]
    fn key_values_require_colon() {
        assert!(parse_key_values("bootset", "camera", BOOTSET_KEYS).is_err());
    }

    #[test]
    fn ssh_choice() {
        assert_eq!(validate_choice("ssh", "socket", SSH_MODES).unwrap(), "socket");
        assert!(validate_choice("ssh", "telnet", SSH_MODES).is_err());
    }

    #[test]
    fn service_names_are_checked() {
        assert_eq!(
            parse_service_list("svc-enable", "cron, ssh@1.service").unwrap(),
            vec!["cron".to_string(), "ssh@1.service".to_string()]
        );
        assert!(parse_service_list("svc-enable", "cron,rm -rf").is_err());
    }
}
