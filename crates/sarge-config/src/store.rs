//! ---
//! sarge_section: "04-declared-configuration"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Durable per-instance declared-config records."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::activation::{remove_if_exists, write_atomic};
use crate::declared::DeclaredConfig;

/// Directory, relative to the sarge home, holding one record per instance.
pub const DEPLOYMENTS_DIR: &str = "deployments";
const RECORD_EXTENSION: &str = "yaml";

/// Bookkeeping stored alongside a declared config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordMetadata {
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the declared config as serialised YAML.
    pub config_hash: String,
    /// Version of the tooling that wrote the record.
    pub source_version: String,
}

/// On-disk shape of `deployments/<id>.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub record: RecordMetadata,
    #[serde(flatten)]
    pub config: DeclaredConfig,
}

impl InstanceRecord {
    pub fn new(config: DeclaredConfig) -> Result<Self> {
        let config_hash = hash_declared_config(&config)?;
        Ok(Self {
            record: RecordMetadata {
                created_at: Utc::now(),
                config_hash,
                source_version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            config,
        })
    }
}

/// Store of declared configs keyed by instance ID.
#[derive(Debug, Clone)]
pub struct DeclaredConfigStore {
    dir: PathBuf,
}

impl DeclaredConfigStore {
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            dir: home.as_ref().join(DEPLOYMENTS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, instance_id: &str) -> PathBuf {
        self.dir.join(format!("{instance_id}.{RECORD_EXTENSION}"))
    }

    /// Write the record for `config.name`, replacing any previous one atomically.
    pub fn persist(&self, config: &DeclaredConfig) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("unable to create {}", self.dir.display()))?;
        let record = InstanceRecord::new(config.clone())?;
        let rendered = serde_yaml::to_string(&record)
            .with_context(|| "failed to serialise declared config to YAML")?;
        let path = self.path_for(&config.name);
        write_atomic(&path, rendered.as_bytes())?;
        debug!(instance = %config.name, path = %path.display(), hash = %record.record.config_hash, "declared config persisted");
        Ok(path)
    }

    /// Read the full record; `None` when no record exists for the ID.
    pub fn load_record(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        let path = self.path_for(instance_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let record = serde_yaml::from_str::<InstanceRecord>(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(record))
    }

    pub fn load(&self, instance_id: &str) -> Result<Option<DeclaredConfig>> {
        Ok(self.load_record(instance_id)?.map(|record| record.config))
    }

    /// Delete the record. Returns `false` when it was already absent.
    pub fn remove(&self, instance_id: &str) -> Result<bool> {
        remove_if_exists(self.path_for(instance_id))
    }

    /// IDs with a persisted record, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("failed to scan {}", self.dir.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if !stem.starts_with('.') {
                    ids.push(stem.to_owned());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// SHA-256 over the YAML rendering of the declared config.
pub fn hash_declared_config(config: &DeclaredConfig) -> Result<String> {
    let serialised = serde_yaml::to_string(config)
        .with_context(|| "failed to serialise declared config for hashing")?;
    let mut hasher = Sha256::new();
    hasher.update(serialised.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
