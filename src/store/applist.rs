//! Package lists for `--apps`/`--xapps`.
//!
//! A list is either literal (`"vim git"`, commas also accepted) or a file
//! referenced as `@path`. In a list file, text from `#` to the end of the line
//! is a comment, blank lines are ignored, and names are trimmed.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppList {
    names: Vec<String>,
    source: Option<PathBuf>,
}

impl AppList {
    /// Resolve an `--apps` argument. `@file` reads a list file.
    pub fn resolve(spec: &str) -> Result<Self> {
        match spec.trim().strip_prefix('@') {
            Some(path) => Self::from_file(Path::new(path)),
            None => Ok(Self::from_literal(spec)),
        }
    }

    pub fn from_literal(raw: &str) -> Self {
        Self {
            names: raw
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            source: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::not_found("App list file", path).into());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading app list '{}'", path.display()))?;
        let mut list = Self::parse(&text);
        list.source = Some(path.to_path_buf());
        Ok(list)
    }

    /// Parse list-file text.
    pub fn parse(text: &str) -> Self {
        let names = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .flat_map(str::split_whitespace)
            .map(str::to_string)
            .collect();
        Self {
            names,
            source: None,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The list file this came from, when it was given as `@file`.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Space-separated form used in parameters and package-manager commands.
    pub fn joined(&self) -> String {
        self.names.join(" ")
    }
}
