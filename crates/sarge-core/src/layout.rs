//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Deterministic on-disk layout of a sarge home."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
//! Everything here is a pure function of the home path and an instance ID;
//! nothing touches the filesystem.
use std::path::{Path, PathBuf};

use sarge_config::DEPLOYMENTS_DIR;

pub const APPCFG_FILE: &str = "appcfg.json";
pub const APP_SOCKET_FILE: &str = "app.sock";
pub const SERVER_SCRIPT: &str = "server";
pub const ACTIVE_DIR: &str = "active";
pub const ETC_DIR: &str = "etc";
pub const VAR_DIR: &str = "var";

/// Names of the host-wide directories directly under the home.
pub const TOP_LEVEL_DIRS: &[&str] = &[ETC_DIR, VAR_DIR, DEPLOYMENTS_DIR, ACTIVE_DIR];

/// Host-wide directories under the sarge home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeLayout {
    home: PathBuf,
}

impl HomeLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.home.join(ETC_DIR)
    }

    pub fn supervisor_conf(&self) -> PathBuf {
        self.etc_dir().join("supervisor.conf")
    }

    pub fn supervisor_dir(&self) -> PathBuf {
        self.etc_dir().join("supervisor.d")
    }

    pub fn nginx_dir(&self) -> PathBuf {
        self.etc_dir().join("nginx")
    }

    pub fn var_dir(&self) -> PathBuf {
        self.home.join(VAR_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.var_dir().join("log")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.var_dir().join("run")
    }

    /// Scratch area for ephemeral folders.
    pub fn tmp_dir(&self) -> PathBuf {
        self.var_dir().join("tmp")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.var_dir().join("data")
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.home.join(DEPLOYMENTS_DIR)
    }

    pub fn active_dir(&self) -> PathBuf {
        self.home.join(ACTIVE_DIR)
    }

    /// Directories `init` creates, parents first.
    pub fn skeleton(&self) -> Vec<PathBuf> {
        vec![
            self.etc_dir(),
            self.supervisor_dir(),
            self.var_dir(),
            self.log_dir(),
            self.run_dir(),
            self.tmp_dir(),
            self.data_dir(),
            self.deployments_dir(),
            self.active_dir(),
        ]
    }

    /// Whether `path` is the home itself or one of its host-wide directories.
    pub fn is_layout_dir(&self, path: &Path) -> bool {
        path == self.home
            || path == self.nginx_dir()
            || self.skeleton().iter().any(|dir| dir == path)
    }

    pub fn instance(&self, instance_id: &str) -> InstancePaths {
        InstancePaths::new(self, instance_id)
    }
}

/// Per-instance paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    /// `<home>/<id>`, created by the allocator as the ID claim.
    pub folder: PathBuf,
    /// `<home>/var/run/<id>`.
    pub run_folder: PathBuf,
    pub appcfg_path: PathBuf,
    pub log_path: PathBuf,
    /// `<home>/var/data/<id>`, parent of persistent folders.
    pub data_dir: PathBuf,
    pub active_link: PathBuf,
    pub server_script: PathBuf,
    pub app_socket: PathBuf,
    log_dir: PathBuf,
    id: String,
}

impl InstancePaths {
    fn new(layout: &HomeLayout, instance_id: &str) -> Self {
        let run_folder = layout.run_dir().join(instance_id);
        let folder = layout.home().join(instance_id);
        Self {
            appcfg_path: run_folder.join(APPCFG_FILE),
            app_socket: run_folder.join(APP_SOCKET_FILE),
            server_script: folder.join(SERVER_SCRIPT),
            log_path: layout.log_dir().join(format!("{instance_id}.log")),
            data_dir: layout.data_dir().join(instance_id),
            active_link: layout.active_dir().join(instance_id),
            log_dir: layout.log_dir(),
            id: instance_id.to_owned(),
            folder,
            run_folder,
        }
    }

    /// Log file for a named process; the `daemon` process uses the instance log.
    pub fn process_log_path(&self, process: &str) -> PathBuf {
        if process == crate::supervisor::DEFAULT_PROCESS {
            self.log_path.clone()
        } else {
            self.log_dir.join(format!("{}-{process}.log", self.id))
        }
    }
}
