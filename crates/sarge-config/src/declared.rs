//! ---
//! sarge_section: "04-declared-configuration"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Declared instance configuration model."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Durable, user-authored description of one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeclaredConfig {
    /// Instance identifier; equal to the allocated ID.
    pub name: String,
    #[serde(default, rename = "require-services")]
    pub require_services: IndexMap<String, ServiceSpec>,
    /// Route entries, passed through to route-rendering plugins.
    #[serde(default)]
    pub urlmap: Vec<RouteEntry>,
    #[serde(default)]
    pub options: LaunchOptions,
}

/// Kind of a required service, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServiceSpec {
    /// Scratch directory created fresh on every start.
    #[serde(alias = "var-folder")]
    EphemeralFolder,
    /// Stable directory under the instance's data area.
    PersistentFolder,
    /// Host/port the daemon should bind.
    #[serde(alias = "listen")]
    NetworkListener {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<PortSpec>,
    },
}

/// A fixed port or a request for one drawn from the configured range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PortSpec {
    Fixed(u16),
    Dynamic(DynamicPort),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DynamicPort {
    #[serde(alias = "any")]
    Random,
}

/// One entry of the URL map, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RouteEntry {
    /// Serve `path` (relative to the instance folder) at `url`.
    Static { url: String, path: String },
    /// Forward to a FastCGI socket (`tcp://host:port` or `unix:///path`).
    Fcgi { url: String, socket: String },
    /// Reverse-proxy to an upstream URL.
    Proxy { url: String, upstream_url: String },
    /// Run `app_factory` (`module:callable`) behind a generated FastCGI socket.
    #[serde(alias = "wsgi")]
    App { url: String, app_factory: String },
}

impl RouteEntry {
    pub fn url(&self) -> &str {
        match self {
            RouteEntry::Static { url, .. }
            | RouteEntry::Fcgi { url, .. }
            | RouteEntry::Proxy { url, .. }
            | RouteEntry::App { url, .. } => url,
        }
    }
}

/// Free-form launch options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LaunchOptions {
    /// Command of the single `daemon` process when `processes` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Ordered process name → command map.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub processes: IndexMap<String, String>,
    #[serde(default)]
    pub autorestart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Set by route plugins while configuring; never persisted by sarge itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_factory: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub nginx_options: IndexMap<String, String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

/// Creation request accepted by `new`; becomes a [`DeclaredConfig`] once an ID exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceRequest {
    #[serde(default, alias = "require-services")]
    pub services: IndexMap<String, ServiceSpec>,
    #[serde(default)]
    pub urlmap: Vec<RouteEntry>,
    #[serde(default)]
    pub options: LaunchOptions,
}

impl InstanceRequest {
    pub fn into_declared(self, instance_id: impl Into<String>) -> DeclaredConfig {
        DeclaredConfig {
            name: instance_id.into(),
            require_services: self.services,
            urlmap: self.urlmap,
            options: self.options,
        }
    }
}

impl std::str::FromStr for InstanceRequest {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        use anyhow::Context;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).with_context(|| "instance request must be a JSON object")
    }
}
