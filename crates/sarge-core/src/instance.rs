//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Instance lifecycle state machine."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use sarge_config::{remove_dir_if_exists, remove_if_exists, swap_symlink, write_atomic, DeclaredConfig};
use sarge_logging::{log_lifecycle_event, sarge_debug, LifecycleOutcome, LogContext};
use strum::Display;

use crate::appcfg::AppCfg;
use crate::error::{Result, SargeError};
use crate::layout::InstancePaths;
use crate::registry::Sarge;
use crate::signals::{Event, InstanceView, LaunchContext};
use crate::supervisor::ProcessGroupSpec;

/// Lifecycle state. Held in memory only; a freshly loaded instance is
/// `Unstarted` regardless of what its daemon is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum InstanceState {
    Unstarted,
    Starting,
    Running,
    Stopped,
    Destroyed,
}

/// One deployable instance, borrowing the registry that produced it.
#[derive(Debug)]
pub struct Instance<'s> {
    sarge: &'s Sarge,
    id: String,
    config: DeclaredConfig,
    paths: InstancePaths,
    state: InstanceState,
}

impl<'s> Instance<'s> {
    pub(crate) fn new(sarge: &'s Sarge, config: DeclaredConfig) -> Self {
        let id = config.name.clone();
        let paths = sarge.layout().instance(&id);
        Self {
            sarge,
            id,
            config,
            paths,
            state: InstanceState::Unstarted,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &DeclaredConfig {
        &self.config
    }

    pub fn paths(&self) -> &InstancePaths {
        &self.paths
    }

    pub fn folder(&self) -> &Path {
        &self.paths.folder
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    fn view(&self) -> InstanceView<'_> {
        InstanceView {
            id: &self.id,
            config: &self.config,
            paths: &self.paths,
            layout: self.sarge.layout(),
        }
    }

    fn invalid(&self, operation: &'static str) -> SargeError {
        SargeError::InvalidTransition {
            id: self.id.clone(),
            state: self.state,
            operation,
        }
    }

    fn record(&self, operation: &str, outcome: LifecycleOutcome, message: &str) {
        let ctx = LogContext::new()
            .with_instance(&self.id)
            .with_operation(operation);
        log_lifecycle_event(Some(&ctx), &format!("instance.{operation}"), message, outcome);
    }

    /// Configure and launch the instance.
    ///
    /// On failure the state returns to what it was before the call; side
    /// effects already on disk are left in place.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            InstanceState::Unstarted | InstanceState::Stopped => {}
            _ => return Err(self.invalid("start")),
        }
        let previous = self.state;
        self.state = InstanceState::Starting;
        match self.try_start() {
            Ok(()) => {
                self.state = InstanceState::Running;
                self.record("start", LifecycleOutcome::Success, "instance running");
                Ok(())
            }
            Err(err) => {
                self.state = previous;
                self.record("start", LifecycleOutcome::Fault, &format!("{err:#}"));
                Err(err)
            }
        }
    }

    fn try_start(&self) -> Result<()> {
        let sarge = self.sarge;
        let layout = sarge.layout();
        fs::create_dir_all(&self.paths.run_folder)
            .map_err(|err| SargeError::io(&self.paths.run_folder, err))?;

        let mut working = self.config.clone();
        let mut appcfg = AppCfg::new();
        sarge.bus().publish(&mut Event::Configuring(LaunchContext {
            id: &self.id,
            paths: &self.paths,
            layout,
            config: &mut working,
            appcfg: &mut appcfg,
        }))?;
        sarge.bus().publish(&mut Event::WillStart {
            instance: InstanceView {
                id: &self.id,
                config: &working,
                paths: &self.paths,
                layout,
            },
            appcfg: &mut appcfg,
        })?;

        let app_server = match &working.options.app_factory {
            Some(factory) => Some(self.write_app_server(factory)?),
            None => None,
        };
        appcfg
            .write_to(&self.paths.appcfg_path)
            .map_err(SargeError::Store)?;
        sarge_debug!(
            context = LogContext::new().with_instance(&self.id).with_operation("start"),
            "app config written with {} keys",
            appcfg.len()
        );

        let spec = ProcessGroupSpec::for_instance(&working.options, &self.paths, app_server.as_deref());
        sarge.supervisor().configure_and_restart(&self.id, &spec)?;

        fs::create_dir_all(layout.active_dir())
            .map_err(|err| SargeError::io(layout.active_dir(), err))?;
        swap_symlink(&self.paths.run_folder, &self.paths.active_link).map_err(SargeError::Store)?;
        Ok(())
    }

    /// Write the executable `server` script that runs an app factory behind
    /// the instance's FastCGI socket. Returns the command to supervise.
    fn write_app_server(&self, factory: &str) -> Result<String> {
        let launcher = &self.sarge.config().app_launcher;
        let script = format!(
            "#!/bin/sh\nexec {} --factory {} --socket {} --appcfg {}\n",
            shell_quote(launcher),
            shell_quote(factory),
            shell_quote(&self.paths.app_socket.display().to_string()),
            shell_quote(&self.paths.appcfg_path.display().to_string()),
        );
        let path = &self.paths.server_script;
        write_atomic(path, script.as_bytes()).map_err(SargeError::Store)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))
                .map_err(|err| SargeError::io(path, err))?;
        }
        Ok(format!("./{}", crate::layout::SERVER_SCRIPT))
    }

    /// Stop the daemon. A no-op when already stopped.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            InstanceState::Stopped => return Ok(()),
            InstanceState::Destroyed | InstanceState::Starting => return Err(self.invalid("stop")),
            InstanceState::Unstarted | InstanceState::Running => {}
        }
        let outcome = self.try_stop();
        match &outcome {
            Ok(()) => {
                self.state = InstanceState::Stopped;
                self.record("stop", LifecycleOutcome::Success, "instance stopped");
            }
            Err(err) => self.record("stop", LifecycleOutcome::Fault, &format!("{err:#}")),
        }
        outcome
    }

    fn try_stop(&self) -> Result<()> {
        self.sarge.supervisor().stop(&self.id)?;
        self.sarge
            .bus()
            .publish(&mut Event::HasStopped(self.view()))
    }

    /// Tear the instance down. Safe to call repeatedly.
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == InstanceState::Destroyed {
            return Ok(());
        }
        match self.try_destroy() {
            Ok(()) => {
                self.state = InstanceState::Destroyed;
                self.record("destroy", LifecycleOutcome::Success, "instance destroyed");
                Ok(())
            }
            Err(err) => {
                self.record("destroy", LifecycleOutcome::Fault, &format!("{err:#}"));
                Err(err)
            }
        }
    }

    fn try_destroy(&self) -> Result<()> {
        if self.sarge.layout().is_layout_dir(&self.paths.folder) {
            return Err(SargeError::UnknownInstance(self.id.clone()));
        }
        self.sarge.supervisor().remove(&self.id)?;
        self.sarge
            .bus()
            .publish(&mut Event::WillBeDestroyed(self.view()))?;
        remove_if_exists(&self.paths.active_link).map_err(SargeError::Store)?;
        remove_dir_if_exists(&self.paths.run_folder).map_err(SargeError::Store)?;
        remove_dir_if_exists(&self.paths.folder).map_err(SargeError::Store)?;
        self.sarge
            .store()
            .remove(&self.id)
            .map_err(SargeError::Store)?;
        Ok(())
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
