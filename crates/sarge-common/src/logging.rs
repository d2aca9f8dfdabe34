//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Shared configuration and logging primitives."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::never;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "SARGE_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Console formats for the CLI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Resolve the directory log files are written to.
pub fn log_directory(config: &LoggingConfig, default_dir: &Path) -> PathBuf {
    config
        .directory
        .clone()
        .unwrap_or_else(|| default_dir.to_path_buf())
}

/// Initialize the tracing subscriber.
///
/// * `SARGE_LOG` overrides the filter (e.g. `debug,sarge_core=trace`), then
///   `RUST_LOG`, finally `info`.
/// * Console output goes to stderr so stdout stays reserved for command results.
/// * Every event is also appended as JSON to `<dir>/<prefix>.log`.
pub fn init_tracing(service_name: &str, config: &LoggingConfig, default_dir: &Path) -> Result<()> {
    let directory = log_directory(config, default_dir);
    std::fs::create_dir_all(&directory)
        .with_context(|| format!("unable to create log directory {}", directory.display()))?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let file_appender = never(&directory, format!("{}.log", prefix));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(file_guard);

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to info logging",
                LOG_ENV, err
            );
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_directory_wins_over_default() {
        let config = LoggingConfig {
            directory: Some(PathBuf::from("/srv/logs")),
            ..LoggingConfig::default()
        };
        assert_eq!(
            log_directory(&config, Path::new("/home/sarge/var/log")),
            PathBuf::from("/srv/logs")
        );
        assert_eq!(
            log_directory(&LoggingConfig::default(), Path::new("/home/sarge/var/log")),
            PathBuf::from("/home/sarge/var/log")
        );
    }

    #[test]
    fn init_creates_log_directory() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("var").join("log");
        init_tracing("sarge", &LoggingConfig::default(), &dir).expect("init");
        assert!(dir.is_dir());
    }
}
