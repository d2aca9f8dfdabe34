//! ---
//! sarge_section: "04-declared-configuration"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Declared configuration persistence and activation helpers."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
pub mod activation;
pub mod declared;
pub mod store;

pub use activation::{remove_dir_if_exists, remove_if_exists, swap_symlink, write_atomic};
pub use declared::{
    DeclaredConfig, DynamicPort, InstanceRequest, LaunchOptions, PortSpec, RouteEntry,
    ServiceSpec,
};
pub use store::{
    hash_declared_config, DeclaredConfigStore, InstanceRecord, RecordMetadata, DEPLOYMENTS_DIR,
};
