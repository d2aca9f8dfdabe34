//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Process-wide registry of instances under one home."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sarge_common::{SargeConfig, CONFIG_FILE};
use sarge_config::{DeclaredConfigStore, InstanceRequest};
use sarge_logging::{log_lifecycle_event, sarge_info, LifecycleOutcome, LogContext};

use crate::allocator::{is_valid_id, IdAllocator};
use crate::error::{Result, SargeError};
use crate::instance::Instance;
use crate::layout::HomeLayout;
use crate::plugins::{self, Plugin};
use crate::signals::{Event, Handler, Signal, SignalBus};
use crate::supervisor::Supervisor;
use crate::supervisord::Supervisord;

/// Container for every instance under one home.
///
/// Owns the signal bus; plugins subscribe once while the registry is built
/// and every [`Instance`] borrows the registry for its lifetime.
pub struct Sarge {
    layout: HomeLayout,
    config: SargeConfig,
    bus: SignalBus,
    supervisor: Arc<dyn Supervisor>,
    store: DeclaredConfigStore,
    allocator: Mutex<IdAllocator>,
    plugins: Vec<String>,
}

impl Sarge {
    /// Boot from `<home>/etc/sarge.toml` (or `SARGE_CONFIG`) with the
    /// supervisord backend.
    pub fn open(home: impl AsRef<Path>) -> Result<Self> {
        let home = home.as_ref();
        let loaded = SargeConfig::load(home).map_err(SargeError::Config)?;
        Self::builder(home).with_config(loaded.config).build()
    }

    pub fn builder(home: impl Into<PathBuf>) -> SargeBuilder {
        SargeBuilder::new(home)
    }

    pub fn home(&self) -> &Path {
        self.layout.home()
    }

    pub fn layout(&self) -> &HomeLayout {
        &self.layout
    }

    pub fn config(&self) -> &SargeConfig {
        &self.config
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn supervisor(&self) -> &dyn Supervisor {
        self.supervisor.as_ref()
    }

    pub fn store(&self) -> &DeclaredConfigStore {
        &self.store
    }

    /// Plugin names in subscription order.
    pub fn plugin_names(&self) -> &[String] {
        &self.plugins
    }

    /// Create the home skeleton, let plugins prepare host-wide files and
    /// write the supervisor's master configuration.
    pub fn init(&self) -> Result<()> {
        for dir in self.layout.skeleton() {
            fs::create_dir_all(&dir).map_err(|err| SargeError::io(&dir, err))?;
        }
        let config_path = self.home().join(CONFIG_FILE);
        if !config_path.exists() {
            let rendered = self.config.to_toml().map_err(SargeError::Config)?;
            sarge_config::write_atomic(&config_path, rendered.as_bytes())
                .map_err(SargeError::Config)?;
        }
        self.bus.publish(&mut Event::Initializing {
            layout: &self.layout,
        })?;
        self.supervisor.initialize(&self.layout)?;
        let home = self.home().display().to_string();
        log_lifecycle_event(
            Some(&LogContext::new().with_operation("init")),
            "sarge.init",
            &format!("home initialised at {home}"),
            LifecycleOutcome::Success,
        );
        Ok(())
    }

    /// Allocate an ID, claim its folder and persist the declared config.
    pub fn new_instance(&self, request: InstanceRequest) -> Result<Instance<'_>> {
        fs::create_dir_all(self.home()).map_err(|err| SargeError::io(self.home(), err))?;
        let id = self.allocator.lock().allocate(&self.layout)?;
        let config = request.into_declared(id.as_str());
        self.store.persist(&config).map_err(SargeError::Store)?;
        sarge_info!(
            context = LogContext::new().with_instance(&id).with_operation("new"),
            "instance created"
        );
        Ok(Instance::new(self, config))
    }

    /// Load an instance from its persisted declared config.
    pub fn get_instance(&self, instance_id: &str) -> Result<Instance<'_>> {
        if !is_valid_id(instance_id) {
            return Err(SargeError::UnknownInstance(instance_id.to_owned()));
        }
        let config = self
            .store
            .load(instance_id)
            .map_err(SargeError::Store)?
            .ok_or_else(|| SargeError::UnknownInstance(instance_id.to_owned()))?;
        Ok(Instance::new(self, config))
    }

    /// Destroy by ID. An unknown but well-formed ID counts as already
    /// destroyed; its leftovers are still swept. Host directory names are
    /// never well-formed IDs.
    pub fn destroy_instance(&self, instance_id: &str) -> Result<()> {
        match self.get_instance(instance_id) {
            Ok(mut instance) => instance.destroy(),
            Err(SargeError::UnknownInstance(_)) if is_valid_id(instance_id) => {
                let bare = InstanceRequest::default().into_declared(instance_id);
                Instance::new(self, bare).destroy()
            }
            Err(err) => Err(err),
        }
    }

    /// IDs with a persisted declared config, sorted.
    pub fn instance_ids(&self) -> Result<Vec<String>> {
        self.store.ids().map_err(SargeError::Store)
    }
}

impl std::fmt::Debug for Sarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sarge")
            .field("home", &self.layout.home())
            .field("supervisor", &self.supervisor.name())
            .field("plugins", &self.plugins)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Sarge`]. Configured plugins subscribe first, then plugins
/// added with [`SargeBuilder::with_plugin`], then ad-hoc handlers.
pub struct SargeBuilder {
    home: PathBuf,
    config: Option<SargeConfig>,
    supervisor: Option<Arc<dyn Supervisor>>,
    allocator: Option<IdAllocator>,
    plugins: Vec<Arc<dyn Plugin>>,
    handlers: Vec<(Signal, String, Handler)>,
}

impl SargeBuilder {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            config: None,
            supervisor: None,
            allocator: None,
            plugins: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: SargeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn with_allocator(mut self, allocator: IdAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn subscribe<F>(mut self, signal: Signal, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Event<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler = Box::new(handler);
        self.handlers.push((signal, name.into(), handler));
        self
    }

    pub fn build(self) -> Result<Sarge> {
        let config = self.config.unwrap_or_default();
        config.validate().map_err(SargeError::Config)?;
        let layout = HomeLayout::new(self.home);

        let mut bus = SignalBus::new();
        let mut names = Vec::new();
        let configured = config
            .plugins
            .iter()
            .map(|name| plugins::instantiate(name, &config))
            .collect::<Result<Vec<_>>>()?;
        for plugin in configured.into_iter().chain(self.plugins) {
            names.push(plugin.name().to_owned());
            plugin.subscribe(&mut bus);
        }
        for (signal, name, handler) in self.handlers {
            bus.subscribe(signal, name, handler);
        }

        let supervisor = self.supervisor.unwrap_or_else(|| {
            Arc::new(Supervisord::new(layout.clone(), config.supervisor.clone()))
        });
        Ok(Sarge {
            store: DeclaredConfigStore::new(layout.home()),
            allocator: Mutex::new(self.allocator.unwrap_or_default()),
            plugins: names,
            layout,
            config,
            bus,
            supervisor,
        })
    }
}
