//! ---
//! sarge_section: "02-process-supervision"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Supervisor interface and in-memory backend."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::path::PathBuf;

use indexmap::IndexMap;
use parking_lot::Mutex;
use sarge_config::LaunchOptions;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::layout::{HomeLayout, InstancePaths};

/// Name of the single process used when no explicit process map is declared.
pub const DEFAULT_PROCESS: &str = "daemon";
pub const DEFAULT_COMMAND: &str = "./run";
/// Environment variable pointing a daemon at its app-config file.
pub const APPCFG_ENV: &str = "SARGEAPP_CFG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SupervisorOp {
    Initialize,
    ConfigureAndRestart,
    Stop,
    Remove,
}

/// Failure reported by a supervisor backend.
#[derive(Debug, Error)]
#[error("supervisor {operation} failed for '{instance}': {detail}")]
pub struct SupervisorError {
    pub operation: SupervisorOp,
    pub instance: String,
    pub detail: String,
}

impl SupervisorError {
    pub fn new(operation: SupervisorOp, instance: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            operation,
            instance: instance.into(),
            detail: detail.into(),
        }
    }
}

/// One supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub command: String,
    pub directory: PathBuf,
    pub log_path: PathBuf,
    pub autorestart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
}

/// Ordered processes that make up one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessGroupSpec {
    pub processes: Vec<ProcessSpec>,
}

impl ProcessGroupSpec {
    /// Build the group from launch options.
    ///
    /// With no `processes` map a single `daemon` runs `options.command`
    /// (default `./run`). A generated app server script replaces the daemon
    /// command, or joins an explicit process map as `app`.
    pub fn for_instance(
        options: &LaunchOptions,
        paths: &InstancePaths,
        app_server: Option<&str>,
    ) -> Self {
        let mut commands: Vec<(String, String)> = if options.processes.is_empty() {
            let command = app_server
                .map(str::to_owned)
                .or_else(|| options.command.clone())
                .unwrap_or_else(|| DEFAULT_COMMAND.to_owned());
            vec![(DEFAULT_PROCESS.to_owned(), command)]
        } else {
            options
                .processes
                .iter()
                .map(|(name, command)| (name.clone(), command.clone()))
                .collect()
        };
        if !options.processes.is_empty() {
            if let Some(script) = app_server {
                commands.push(("app".to_owned(), script.to_owned()));
            }
        }

        let mut environment = IndexMap::new();
        environment.insert(
            APPCFG_ENV.to_owned(),
            paths.appcfg_path.display().to_string(),
        );
        let processes = commands
            .into_iter()
            .map(|(name, command)| ProcessSpec {
                log_path: paths.process_log_path(&name),
                directory: paths.folder.clone(),
                autorestart: options.autorestart,
                user: options.user.clone(),
                environment: environment.clone(),
                name,
                command,
            })
            .collect();
        Self { processes }
    }

    pub fn names(&self) -> Vec<&str> {
        self.processes.iter().map(|p| p.name.as_str()).collect()
    }
}

/// External process supervisor driven by instance lifecycle operations.
pub trait Supervisor: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Write host-wide configuration during `init`.
    fn initialize(&self, _layout: &HomeLayout) -> Result<(), SupervisorError> {
        Ok(())
    }

    /// Install `spec` for the instance and (re)start its processes.
    fn configure_and_restart(
        &self,
        instance_id: &str,
        spec: &ProcessGroupSpec,
    ) -> Result<(), SupervisorError>;

    fn stop(&self, instance_id: &str) -> Result<(), SupervisorError>;

    /// Forget the instance. Must succeed when the instance is not present.
    fn remove(&self, instance_id: &str) -> Result<(), SupervisorError>;
}

/// Call recorded by [`InMemorySupervisor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCall {
    Initialize,
    ConfigureAndRestart {
        instance: String,
        spec: ProcessGroupSpec,
    },
    Stop(String),
    Remove(String),
}

#[derive(Debug, Default)]
struct InMemoryState {
    calls: Vec<SupervisorCall>,
    running: HashSet<String>,
    failing: HashSet<SupervisorOp>,
}

impl InMemoryState {
    fn check(&self, op: SupervisorOp, instance: &str) -> Result<(), SupervisorError> {
        if self.failing.contains(&op) {
            return Err(SupervisorError::new(op, instance, "injected failure"));
        }
        Ok(())
    }
}

/// Records calls and tracks which instances are running; used by tests and
/// dry runs.
#[derive(Debug, Default)]
pub struct InMemorySupervisor {
    state: Mutex<InMemoryState>,
}

impl InMemorySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `op` fail.
    pub fn fail_on(&self, op: SupervisorOp) {
        self.state.lock().failing.insert(op);
    }

    pub fn calls(&self) -> Vec<SupervisorCall> {
        self.state.lock().calls.clone()
    }

    pub fn is_running(&self, instance_id: &str) -> bool {
        self.state.lock().running.contains(instance_id)
    }
}

impl Supervisor for InMemorySupervisor {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn initialize(&self, _layout: &HomeLayout) -> Result<(), SupervisorError> {
        let mut state = self.state.lock();
        state.check(SupervisorOp::Initialize, "")?;
        state.calls.push(SupervisorCall::Initialize);
        Ok(())
    }

    fn configure_and_restart(
        &self,
        instance_id: &str,
        spec: &ProcessGroupSpec,
    ) -> Result<(), SupervisorError> {
        let mut state = self.state.lock();
        state.check(SupervisorOp::ConfigureAndRestart, instance_id)?;
        state.calls.push(SupervisorCall::ConfigureAndRestart {
            instance: instance_id.to_owned(),
            spec: spec.clone(),
        });
        state.running.insert(instance_id.to_owned());
        Ok(())
    }

    fn stop(&self, instance_id: &str) -> Result<(), SupervisorError> {
        let mut state = self.state.lock();
        state.check(SupervisorOp::Stop, instance_id)?;
        state.calls.push(SupervisorCall::Stop(instance_id.to_owned()));
        state.running.remove(instance_id);
        Ok(())
    }

    fn remove(&self, instance_id: &str) -> Result<(), SupervisorError> {
        let mut state = self.state.lock();
        state.check(SupervisorOp::Remove, instance_id)?;
        state.calls.push(SupervisorCall::Remove(instance_id.to_owned()));
        state.running.remove(instance_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> InstancePaths {
        HomeLayout::new("/h").instance("abc123")
    }

    #[test]
    fn default_group_runs_a_single_daemon() {
        let spec = ProcessGroupSpec::for_instance(&LaunchOptions::default(), &paths(), None);
        assert_eq!(spec.names(), vec!["daemon"]);
        let daemon = &spec.processes[0];
        assert_eq!(daemon.command, "./run");
        assert_eq!(daemon.directory, PathBuf::from("/h/abc123"));
        assert_eq!(daemon.log_path, PathBuf::from("/h/var/log/abc123.log"));
        assert_eq!(
            daemon.environment[APPCFG_ENV],
            "/h/var/run/abc123/appcfg.json"
        );
        assert!(!daemon.autorestart);
    }

    #[test]
    fn explicit_processes_keep_declared_order() {
        let mut options = LaunchOptions {
            autorestart: true,
            ..LaunchOptions::default()
        };
        options.processes.insert("web".into(), "bin/web".into());
        options.processes.insert("worker".into(), "bin/worker".into());
        let spec = ProcessGroupSpec::for_instance(&options, &paths(), Some("./server"));
        assert_eq!(spec.names(), vec!["web", "worker", "app"]);
        assert!(spec.processes.iter().all(|p| p.autorestart));
        assert_eq!(
            spec.processes[1].log_path,
            PathBuf::from("/h/var/log/abc123-worker.log")
        );
    }

    #[test]
    fn app_server_replaces_daemon_command() {
        let options = LaunchOptions {
            command: Some("./run-something".into()),
            ..LaunchOptions::default()
        };
        let spec = ProcessGroupSpec::for_instance(&options, &paths(), Some("./server"));
        assert_eq!(spec.processes[0].command, "./server");
    }

    #[test]
    fn in_memory_backend_records_and_fails_on_request() {
        let supervisor = InMemorySupervisor::new();
        let spec = ProcessGroupSpec::default();
        supervisor.configure_and_restart("abc123", &spec).expect("configure");
        assert!(supervisor.is_running("abc123"));
        supervisor.fail_on(SupervisorOp::Stop);
        let err = supervisor.stop("abc123").unwrap_err();
        assert_eq!(err.operation, SupervisorOp::Stop);
        assert!(err.to_string().contains("stop failed for 'abc123'"));
        supervisor.remove("never-seen").expect("remove tolerates absence");
        assert_eq!(supervisor.calls().len(), 2);
    }
}
