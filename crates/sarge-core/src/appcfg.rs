//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Shared configuration context handed to the daemon."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single context value; paths serialise as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AppValue {
    Int(i64),
    Str(String),
    Path(PathBuf),
}

impl AppValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AppValue::Str(value) => Some(value),
            AppValue::Path(path) => path.to_str(),
            AppValue::Int(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AppValue::Int(value) => Some(*value),
            AppValue::Str(value) => value.parse().ok(),
            AppValue::Path(_) => None,
        }
    }
}

impl fmt::Display for AppValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppValue::Int(value) => write!(f, "{value}"),
            AppValue::Str(value) => f.write_str(value),
            AppValue::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<&str> for AppValue {
    fn from(value: &str) -> Self {
        AppValue::Str(value.to_owned())
    }
}

impl From<String> for AppValue {
    fn from(value: String) -> Self {
        AppValue::Str(value)
    }
}

impl From<i64> for AppValue {
    fn from(value: i64) -> Self {
        AppValue::Int(value)
    }
}

impl From<u16> for AppValue {
    fn from(value: u16) -> Self {
        AppValue::Int(i64::from(value))
    }
}

impl From<PathBuf> for AppValue {
    fn from(value: PathBuf) -> Self {
        AppValue::Path(value)
    }
}

impl From<&Path> for AppValue {
    fn from(value: &Path) -> Self {
        AppValue::Path(value.to_path_buf())
    }
}

/// Flat string-keyed context built fresh on every start.
///
/// Insertion order is kept for stable output; re-inserting a key replaces its
/// value in place, so the last writer wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppCfg {
    entries: IndexMap<String, AppValue>,
}

impl AppCfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AppValue>) -> Option<AppValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&AppValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AppValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "failed to serialise app config")
    }

    /// Atomically replace the file at `path` with this context.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        sarge_config::write_atomic(path, self.to_json_pretty()?.as_bytes())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Context key for a service: `web` + `PORT` gives `WEB_PORT`.
pub fn service_key(service: &str, suffix: &str) -> String {
    let mut key: String = service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    key.push('_');
    key.push_str(suffix);
    key
}
