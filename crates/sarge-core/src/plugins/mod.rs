//! ---
//! sarge_section: "05-plugins"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Plugin trait and built-in plugin catalog."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
//! Plugins hold host-wide settings only; everything instance-specific
//! arrives through the event payload.
use std::str::FromStr;
use std::sync::Arc;

use sarge_common::SargeConfig;
use strum::{AsRefStr, Display, EnumString};

use crate::error::{Result, SargeError};
use crate::signals::SignalBus;

pub mod folders;
pub mod listen;
pub mod routes;

pub use folders::FolderPlugin;
pub use listen::ListenPlugin;
pub use routes::{interpolate, NginxPlugin};

/// Extension that subscribes handlers to the bus once, at registry boot.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn subscribe(self: Arc<Self>, bus: &mut SignalBus);
}

/// Plugins that can be named in `sarge.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PluginKind {
    Folders,
    Listen,
    Nginx,
}

/// Instantiate the built-in plugin called `name`.
pub fn instantiate(name: &str, config: &SargeConfig) -> Result<Arc<dyn Plugin>> {
    let kind = PluginKind::from_str(name.trim())
        .map_err(|_| SargeError::UnknownPlugin(name.to_owned()))?;
    let plugin: Arc<dyn Plugin> = match kind {
        PluginKind::Folders => Arc::new(FolderPlugin::new()),
        PluginKind::Listen => Arc::new(ListenPlugin::new(config.listen.port_range)),
        PluginKind::Nginx => Arc::new(NginxPlugin::new(config.nginx.fcgi_params_path.clone())),
    };
    Ok(plugin)
}
