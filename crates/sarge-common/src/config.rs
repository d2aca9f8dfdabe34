//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Shared configuration and logging primitives."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Location of the host configuration file relative to the sarge home.
pub const CONFIG_FILE: &str = "etc/sarge.toml";

fn default_plugins() -> Vec<String> {
    vec!["folders".to_owned(), "listen".to_owned()]
}

fn default_port_range() -> PortRange {
    PortRange {
        start: 40000,
        end: 59999,
    }
}

fn default_fcgi_params_path() -> PathBuf {
    PathBuf::from("/etc/nginx/fastcgi_params")
}

fn default_ctl_path() -> PathBuf {
    PathBuf::from("supervisorctl")
}

fn default_startsecs() -> Duration {
    Duration::from_secs(2)
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_app_launcher() -> String {
    "sarge-app-server".to_owned()
}

/// Host-wide configuration read from `etc/sarge.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SargeConfig {
    /// Plugin names, instantiated and subscribed in this order.
    #[serde(default = "default_plugins")]
    pub plugins: Vec<String>,
    /// Executable used by generated `server` scripts for app-factory routes.
    #[serde(default = "default_app_launcher")]
    pub app_launcher: String,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub nginx: NginxConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`SargeConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedSargeConfig {
    pub config: SargeConfig,
    /// `None` when no file existed and defaults were used.
    pub source: Option<PathBuf>,
}

impl SargeConfig {
    pub const ENV_CONFIG_PATH: &str = "SARGE_CONFIG";

    /// Load the configuration for a sarge home, respecting the `SARGE_CONFIG` override.
    pub fn load(home: impl AsRef<Path>) -> Result<LoadedSargeConfig> {
        let override_path = std::env::var(Self::ENV_CONFIG_PATH)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        Self::load_with_override(home, override_path)
    }

    /// Load from an explicit override path, falling back to `<home>/etc/sarge.toml`
    /// and finally to defaults when that file does not exist.
    pub fn load_with_override(
        home: impl AsRef<Path>,
        override_path: Option<PathBuf>,
    ) -> Result<LoadedSargeConfig> {
        if let Some(path) = override_path {
            let config = Self::from_path(&path)?;
            return Ok(LoadedSargeConfig {
                config,
                source: Some(path),
            });
        }
        let candidate = home.as_ref().join(CONFIG_FILE);
        if candidate.is_file() {
            let config = Self::from_path(&candidate)?;
            return Ok(LoadedSargeConfig {
                config,
                source: Some(candidate),
            });
        }
        debug!(home = %home.as_ref().display(), "no sarge.toml found; using defaults");
        Ok(LoadedSargeConfig {
            config: Self::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<SargeConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialise to TOML, used by `init` to seed `etc/sarge.toml`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).with_context(|| "failed to serialise sarge configuration")
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.listen.port_range.validate()?;
        let mut seen = HashSet::new();
        for name in &self.plugins {
            if name.trim().is_empty() {
                return Err(anyhow!("plugin names cannot be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(anyhow!("plugin '{}' is listed more than once", name));
            }
        }
        if self.app_launcher.trim().is_empty() {
            return Err(anyhow!("app_launcher cannot be empty"));
        }
        Ok(())
    }
}

impl Default for SargeConfig {
    fn default() -> Self {
        Self {
            plugins: default_plugins(),
            app_launcher: default_app_launcher(),
            listen: ListenConfig::default(),
            nginx: NginxConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for SargeConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: SargeConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Inclusive port range, written as `[start, end]` in TOML.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "[u16; 2]", into = "[u16; 2]")]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start == 0 || self.start > self.end {
            return Err(anyhow!(
                "invalid port range [{}, {}]",
                self.start,
                self.end
            ));
        }
        Ok(())
    }
}

impl From<[u16; 2]> for PortRange {
    fn from([start, end]: [u16; 2]) -> Self {
        Self { start, end }
    }
}

impl From<PortRange> for [u16; 2] {
    fn from(range: PortRange) -> Self {
        [range.start, range.end]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenConfig {
    #[serde(default = "default_port_range")]
    pub port_range: PortRange,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port_range: default_port_range(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NginxConfig {
    #[serde(default = "default_fcgi_params_path")]
    pub fcgi_params_path: PathBuf,
}

impl Default for NginxConfig {
    fn default() -> Self {
        Self {
            fcgi_params_path: default_fcgi_params_path(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisorConfig {
    #[serde(default = "default_ctl_path")]
    pub ctl_path: PathBuf,
    /// Write supervisord configuration but never invoke `supervisorctl`.
    #[serde(default)]
    pub disable_ctl: bool,
    #[serde(default = "default_startsecs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub startsecs: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ctl_path: default_ctl_path(),
            disable_ctl: false,
            startsecs: default_startsecs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Defaults to `<home>/var/log` when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = tempdir().expect("tempdir");
        let loaded = SargeConfig::load_with_override(home.path(), None).expect("load");
        assert!(loaded.source.is_none());
        assert_eq!(loaded.config, SargeConfig::default());
        assert_eq!(loaded.config.listen.port_range, PortRange::from([40000, 59999]));
    }

    #[test]
    fn parses_full_configuration() {
        let config: SargeConfig = r#"
            plugins = ["listen", "folders", "nginx"]
            app_launcher = "/usr/local/bin/fcgi-serve"

            [listen]
            port_range = [50000, 50010]

            [supervisor]
            ctl_path = "/opt/supervisor/bin/supervisorctl"
            disable_ctl = true
            startsecs = 5

            [logging]
            format = "structured-json"
        "#
        .parse()
        .expect("valid config");
        assert_eq!(config.plugins, vec!["listen", "folders", "nginx"]);
        assert!(config.listen.port_range.contains(50010));
        assert!(!config.listen.port_range.contains(50011));
        assert_eq!(config.supervisor.startsecs, Duration::from_secs(5));
        assert!(config.supervisor.disable_ctl);
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn rejects_inverted_port_range() {
        let err = "[listen]\nport_range = [6000, 5000]\n"
            .parse::<SargeConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("invalid port range"));
    }

    #[test]
    fn rejects_duplicate_plugins() {
        let err = r#"plugins = ["listen", "listen"]"#
            .parse::<SargeConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn home_file_is_preferred_over_defaults() {
        let home = tempdir().expect("tempdir");
        fs::create_dir_all(home.path().join("etc")).expect("etc");
        fs::write(home.path().join(CONFIG_FILE), "plugins = [\"nginx\"]\n").expect("write");
        let loaded = SargeConfig::load_with_override(home.path(), None).expect("load");
        assert_eq!(loaded.config.plugins, vec!["nginx"]);
        assert_eq!(loaded.source, Some(home.path().join(CONFIG_FILE)));
    }

    #[test]
    fn defaults_round_trip_through_toml() {
        let rendered = SargeConfig::default().to_toml().expect("render");
        let parsed: SargeConfig = rendered.parse().expect("parse");
        assert_eq!(parsed, SargeConfig::default());
    }
}
