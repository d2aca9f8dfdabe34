//! ---
//! sarge_section: "02-process-supervision"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "supervisord configuration writer and supervisorctl driver."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use sarge_common::SupervisorConfig;
use sarge_config::{remove_if_exists, write_atomic};
use tracing::{debug, warn};

use crate::layout::HomeLayout;
use crate::supervisor::{ProcessGroupSpec, Supervisor, SupervisorError, SupervisorOp};

/// Skip every `supervisorctl` invocation when set to a non-empty value.
pub const NO_SUPERVISORCTL_ENV: &str = "SARGE_NO_SUPERVISORCTL";

/// Backend that renders supervisord config under `etc/` and pokes
/// `supervisorctl` to apply it.
#[derive(Debug, Clone)]
pub struct Supervisord {
    layout: HomeLayout,
    config: SupervisorConfig,
}

impl Supervisord {
    pub fn new(layout: HomeLayout, config: SupervisorConfig) -> Self {
        Self { layout, config }
    }

    pub fn fragment_path(&self, instance_id: &str) -> PathBuf {
        self.layout
            .supervisor_dir()
            .join(format!("{instance_id}.conf"))
    }

    /// Master `supervisor.conf`.
    pub fn render_master(&self) -> String {
        let home = self.layout.home().display();
        let run = self.layout.run_dir();
        let log = self.layout.log_dir();
        format!(
            "[unix_http_server]\n\
             file = {sock}\n\
             \n\
             [rpcinterface:supervisor]\n\
             supervisor.rpcinterface_factory = supervisor.rpcinterface:make_main_rpcinterface\n\
             \n\
             [supervisord]\n\
             logfile = {log}\n\
             pidfile = {pid}\n\
             directory = {home}\n\
             \n\
             [supervisorctl]\n\
             serverurl = unix://{sock}\n\
             \n\
             [include]\n\
             files = {include}\n",
            sock = run.join("supervisor.sock").display(),
            log = log.join("supervisor.log").display(),
            pid = run.join("supervisor.pid").display(),
            include = self.layout.supervisor_dir().join("*.conf").display(),
        )
    }

    /// Per-instance fragment: one group plus one program per process.
    pub fn render_fragment(&self, instance_id: &str, spec: &ProcessGroupSpec) -> String {
        let programs: Vec<String> = spec
            .processes
            .iter()
            .map(|process| format!("{instance_id}-{}", process.name))
            .collect();
        let mut out = format!("[group:{instance_id}]\nprograms = {}\n", programs.join(","));
        for (program, process) in programs.iter().zip(&spec.processes) {
            let _ = write!(
                out,
                "\n[program:{program}]\n\
                 directory = {directory}\n\
                 command = {command}\n\
                 redirect_stderr = true\n\
                 stdout_logfile = {log}\n\
                 startsecs = {startsecs}\n\
                 startretries = 1\n\
                 autostart = true\n\
                 autorestart = {autorestart}\n",
                directory = escape_value(&process.directory.display().to_string()),
                command = escape_value(&process.command),
                log = escape_value(&process.log_path.display().to_string()),
                startsecs = self.config.startsecs.as_secs(),
                autorestart = process.autorestart,
            );
            if let Some(user) = &process.user {
                let _ = writeln!(out, "user = {}", escape_value(user));
            }
            if !process.environment.is_empty() {
                let environment: Vec<String> = process
                    .environment
                    .iter()
                    .map(|(key, value)| {
                        format!("{key}=\"{}\"", escape_value(value).replace('"', "\\\""))
                    })
                    .collect();
                let _ = writeln!(out, "environment = {}", environment.join(","));
            }
        }
        out
    }

    fn ctl_disabled(&self) -> bool {
        self.config.disable_ctl
            || std::env::var(NO_SUPERVISORCTL_ENV)
                .map(|value| !value.is_empty())
                .unwrap_or(false)
    }

    fn ctl(&self, op: SupervisorOp, instance: &str, args: &[&str]) -> Result<(), SupervisorError> {
        if self.ctl_disabled() {
            debug!(?args, "supervisorctl disabled; skipping");
            return Ok(());
        }
        let conf = self.layout.supervisor_conf();
        debug!(ctl = %self.config.ctl_path.display(), ?args, "invoking supervisorctl");
        let output = Command::new(&self.config.ctl_path)
            .arg("-c")
            .arg(&conf)
            .args(args)
            .output()
            .map_err(|err| {
                SupervisorError::new(
                    op,
                    instance,
                    format!("cannot run {}: {err}", self.config.ctl_path.display()),
                )
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(SupervisorError::new(
                op,
                instance,
                format!(
                    "supervisorctl {} exited with {}: {}",
                    args.join(" "),
                    output.status,
                    if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
                ),
            ));
        }
        Ok(())
    }

    fn write(&self, op: SupervisorOp, instance: &str, path: &Path, contents: &str) -> Result<(), SupervisorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                SupervisorError::new(op, instance, format!("cannot create {}: {err}", parent.display()))
            })?;
        }
        write_atomic(path, contents.as_bytes())
            .map_err(|err| SupervisorError::new(op, instance, format!("{err:#}")))
    }
}

/// supervisord expands `%(...)s`; literal percent signs must be doubled.
fn escape_value(value: &str) -> String {
    value.replace('%', "%%")
}

impl Supervisor for Supervisord {
    fn name(&self) -> &'static str {
        "supervisord"
    }

    fn initialize(&self, layout: &HomeLayout) -> Result<(), SupervisorError> {
        let conf = layout.supervisor_conf();
        self.write(SupervisorOp::Initialize, "", &conf, &self.render_master())?;
        fs::create_dir_all(layout.supervisor_dir()).map_err(|err| {
            SupervisorError::new(SupervisorOp::Initialize, "", err.to_string())
        })?;
        debug!(path = %conf.display(), "supervisord configuration written");
        Ok(())
    }

    fn configure_and_restart(
        &self,
        instance_id: &str,
        spec: &ProcessGroupSpec,
    ) -> Result<(), SupervisorError> {
        let op = SupervisorOp::ConfigureAndRestart;
        let fragment = self.fragment_path(instance_id);
        self.write(op, instance_id, &fragment, &self.render_fragment(instance_id, spec))?;
        self.ctl(op, instance_id, &["update"])?;
        let group = format!("{instance_id}:*");
        self.ctl(op, instance_id, &["restart", &group])
    }

    fn stop(&self, instance_id: &str) -> Result<(), SupervisorError> {
        let group = format!("{instance_id}:*");
        self.ctl(SupervisorOp::Stop, instance_id, &["stop", &group])
    }

    fn remove(&self, instance_id: &str) -> Result<(), SupervisorError> {
        let fragment = self.fragment_path(instance_id);
        let existed = remove_if_exists(&fragment).map_err(|err| {
            SupervisorError::new(SupervisorOp::Remove, instance_id, format!("{err:#}"))
        })?;
        if existed {
            if let Err(err) = self.ctl(SupervisorOp::Remove, instance_id, &["update"]) {
                warn!(instance = %instance_id, error = %err, "supervisorctl update failed after removal; supervisord may be down");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ProcessSpec;
    use tempfile::tempdir;

    fn backend(home: &std::path::Path) -> Supervisord {
        let config = SupervisorConfig {
            disable_ctl: true,
            ..SupervisorConfig::default()
        };
        Supervisord::new(HomeLayout::new(home), config)
    }

    fn spec(home: &std::path::Path) -> ProcessGroupSpec {
        let paths = HomeLayout::new(home).instance("abc123");
        ProcessGroupSpec {
            processes: vec![ProcessSpec {
                name: "daemon".into(),
                command: "./run --rate 100%".into(),
                directory: paths.folder.clone(),
                log_path: paths.log_path.clone(),
                autorestart: false,
                user: None,
                environment: [("SARGEAPP_CFG".to_owned(), "/x/appcfg.json".to_owned())]
                    .into_iter()
                    .collect(),
            }],
        }
    }

    #[test]
    fn initialize_writes_master_configuration() {
        let home = tempdir().expect("tempdir");
        let supervisord = backend(home.path());
        supervisord
            .initialize(&HomeLayout::new(home.path()))
            .expect("initialize");
        let conf = fs::read_to_string(home.path().join("etc/supervisor.conf")).expect("conf");
        assert!(conf.contains("[supervisorctl]"));
        assert!(conf.contains("supervisor.d/*.conf"));
        assert!(home.path().join("etc/supervisor.d").is_dir());
    }

    #[test]
    fn fragment_describes_group_and_programs() {
        let home = tempdir().expect("tempdir");
        let supervisord = backend(home.path());
        supervisord
            .configure_and_restart("abc123", &spec(home.path()))
            .expect("configure");
        let fragment =
            fs::read_to_string(supervisord.fragment_path("abc123")).expect("fragment");
        assert!(fragment.starts_with("[group:abc123]\nprograms = abc123-daemon\n"));
        assert!(fragment.contains("[program:abc123-daemon]"));
        assert!(fragment.contains("command = ./run --rate 100%%"));
        assert!(fragment.contains("autorestart = false"));
        assert!(fragment.contains("environment = SARGEAPP_CFG=\"/x/appcfg.json\""));
    }

    #[test]
    fn remove_is_idempotent() {
        let home = tempdir().expect("tempdir");
        let supervisord = backend(home.path());
        supervisord
            .configure_and_restart("abc123", &spec(home.path()))
            .expect("configure");
        supervisord.remove("abc123").expect("first remove");
        assert!(!supervisord.fragment_path("abc123").exists());
        supervisord.remove("abc123").expect("second remove");
    }

    #[test]
    fn failing_ctl_surfaces_supervisor_error() {
        let home = tempdir().expect("tempdir");
        let config = SupervisorConfig {
            ctl_path: home.path().join("no-such-supervisorctl"),
            ..SupervisorConfig::default()
        };
        let supervisord = Supervisord::new(HomeLayout::new(home.path()), config);
        if supervisord.ctl_disabled() {
            return;
        }
        let err = supervisord.stop("abc123").unwrap_err();
        assert_eq!(err.operation, SupervisorOp::Stop);
        assert!(err.detail.contains("cannot run"));
    }
}
