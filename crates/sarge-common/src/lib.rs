//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Shared configuration and logging primitives."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
//! Shared primitives for the sarge workspace: host configuration loading and
//! tracing bootstrap.

pub mod config;
pub mod logging;

pub use config::{
    ListenConfig, LoadedSargeConfig, LoggingConfig, NginxConfig, PortRange, SargeConfig,
    SupervisorConfig, CONFIG_FILE,
};
pub use logging::{init_tracing, log_directory, LogFormat};
