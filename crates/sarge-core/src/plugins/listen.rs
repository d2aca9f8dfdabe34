//! ---
//! sarge_section: "05-plugins"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Host and port assignment for network listeners."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::sync::Arc;

use rand::Rng;
use sarge_common::PortRange;
use sarge_config::{PortSpec, ServiceSpec};
use tracing::debug;

use crate::appcfg::service_key;
use crate::plugins::Plugin;
use crate::signals::{Event, LaunchContext, Signal, SignalBus};

/// Writes `<NAME>_HOST` and `<NAME>_PORT` for listener services.
///
/// Dynamic ports are drawn uniformly from the configured range with no
/// check that the port is actually free.
#[derive(Debug, Clone)]
pub struct ListenPlugin {
    port_range: PortRange,
}

impl ListenPlugin {
    pub fn new(port_range: PortRange) -> Self {
        Self { port_range }
    }

    pub fn port_range(&self) -> PortRange {
        self.port_range
    }

    fn configure(&self, ctx: &mut LaunchContext<'_>) {
        let mut rng = rand::thread_rng();
        for (name, service) in &ctx.config.require_services {
            let ServiceSpec::NetworkListener { host, port } = service else {
                continue;
            };
            if let Some(host) = host {
                ctx.appcfg.insert(service_key(name, "HOST"), host.as_str());
            }
            let port = match port {
                Some(PortSpec::Fixed(port)) => *port,
                Some(PortSpec::Dynamic(_)) => {
                    rng.gen_range(self.port_range.start..=self.port_range.end)
                }
                None => continue,
            };
            debug!(instance = %ctx.id, service = %name, port, "listener port assigned");
            ctx.appcfg.insert(service_key(name, "PORT"), port);
        }
    }
}

impl Plugin for ListenPlugin {
    fn name(&self) -> &str {
        "listen"
    }

    fn subscribe(self: Arc<Self>, bus: &mut SignalBus) {
        bus.subscribe(Signal::Configuring, "listen", move |event| {
            if let Event::Configuring(ctx) = event {
                self.configure(ctx);
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appcfg::AppCfg;
    use crate::layout::HomeLayout;
    use sarge_config::InstanceRequest;

    fn configure(plugin: &ListenPlugin, request: &str) -> AppCfg {
        let layout = HomeLayout::new("/h");
        let paths = layout.instance("abc123");
        let mut config = request
            .parse::<InstanceRequest>()
            .expect("request")
            .into_declared("abc123");
        let mut appcfg = AppCfg::new();
        plugin.configure(&mut LaunchContext {
            id: "abc123",
            paths: &paths,
            layout: &layout,
            config: &mut config,
            appcfg: &mut appcfg,
        });
        appcfg
    }

    #[test]
    fn fixed_host_and_port_are_copied() {
        let plugin = ListenPlugin::new(PortRange::from([40000, 59999]));
        let appcfg = configure(
            &plugin,
            r#"{"services": {"web": {"type": "network-listener", "host": "127.0.0.1", "port": 8080}}}"#,
        );
        assert_eq!(appcfg.get("WEB_HOST").and_then(|v| v.as_str()), Some("127.0.0.1"));
        assert_eq!(appcfg.get("WEB_PORT").and_then(|v| v.as_i64()), Some(8080));
    }

    #[test]
    fn random_ports_stay_in_range() {
        let plugin = ListenPlugin::new(PortRange::from([50000, 50003]));
        for _ in 0..50 {
            let appcfg = configure(
                &plugin,
                r#"{"services": {"web": {"type": "network-listener", "port": "random"}}}"#,
            );
            let port = appcfg.get("WEB_PORT").and_then(|v| v.as_i64()).expect("port");
            assert!((50000..=50003).contains(&port), "port {port} out of range");
        }
    }

    #[test]
    fn listener_without_port_only_sets_host() {
        let plugin = ListenPlugin::new(PortRange::from([40000, 59999]));
        let appcfg = configure(
            &plugin,
            r#"{"services": {"admin": {"type": "listen", "host": "0.0.0.0"}}}"#,
        );
        assert_eq!(appcfg.len(), 1);
        assert!(!appcfg.contains_key("ADMIN_PORT"));
    }
}
