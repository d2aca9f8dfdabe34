//! ---
//! sarge_section: "01-core-lifecycle"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Instance lifecycle orchestration."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
//! Instance lifecycle for a single sarge home: ID allocation, the signal bus
//! plugins hook into, the instance state machine and the supervisor seam.

pub mod allocator;
pub mod appcfg;
pub mod error;
pub mod instance;
pub mod layout;
pub mod plugins;
pub mod registry;
pub mod signals;
pub mod supervisor;
pub mod supervisord;

pub use allocator::IdAllocator;
pub use appcfg::{service_key, AppCfg, AppValue};
pub use error::{Result, SargeError};
pub use instance::{Instance, InstanceState};
pub use layout::{HomeLayout, InstancePaths};
pub use plugins::{Plugin, PluginKind};
pub use registry::{Sarge, SargeBuilder};
pub use signals::{Event, InstanceView, LaunchContext, Signal, SignalBus};
pub use supervisor::{
    InMemorySupervisor, ProcessGroupSpec, ProcessSpec, Supervisor, SupervisorCall,
    SupervisorError, SupervisorOp, APPCFG_ENV,
};
pub use supervisord::{Supervisord, NO_SUPERVISORCTL_ENV};
