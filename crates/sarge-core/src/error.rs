//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Error taxonomy for lifecycle operations."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

use crate::instance::InstanceState;
use crate::signals::Signal;
use crate::supervisor::SupervisorError;

/// Errors surfaced by registry and instance operations.
#[derive(Debug, Error)]
pub enum SargeError {
    #[error("no free instance id after {attempts} attempts")]
    AllocationExhausted { attempts: usize },
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),
    #[error("plugin handler '{handler}' failed on '{signal}'")]
    Plugin {
        signal: Signal,
        handler: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot {operation} instance '{id}' while {state}")]
    InvalidTransition {
        id: String,
        state: InstanceState,
        operation: &'static str,
    },
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
    #[error("filesystem operation failed on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("declared-config store failure")]
    Store(#[source] anyhow::Error),
    #[error("configuration error")]
    Config(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SargeError>;

impl SargeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SargeError::Io {
            path: path.into(),
            source,
        }
    }
}
