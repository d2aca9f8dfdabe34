//! ---
//! sarge_section: "05-plugins"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "nginx site rendering from the route map."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use sarge_config::{remove_if_exists, write_atomic, RouteEntry};
use tracing::debug;

use crate::appcfg::AppCfg;
use crate::layout::HomeLayout;
use crate::plugins::Plugin;
use crate::signals::{Event, InstanceView, LaunchContext, Signal, SignalBus};

pub const SITES_CONF: &str = "sarge_sites.conf";
/// Context key holding the generated app server socket.
pub const APP_SOCKET_KEY: &str = "APP_SOCKET";

/// Expand `$KEY` and `${KEY}` from `appcfg`; `$$` is a literal dollar.
pub fn interpolate(raw: &str, appcfg: &AppCfg) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }
        let (key, tail) = if let Some(braced) = after.strip_prefix('{') {
            let end = braced
                .find('}')
                .ok_or_else(|| anyhow!("unterminated placeholder in '{raw}'"))?;
            (&braced[..end], &braced[end + 1..])
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], &after[end..])
        };
        let valid = key
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid {
            bail!("invalid placeholder in '{raw}'");
        }
        let value = appcfg
            .get(key)
            .ok_or_else(|| anyhow!("no value for '{key}' in app config"))?;
        out.push_str(&value.to_string());
        rest = tail;
    }
    out.push_str(rest);
    Ok(out)
}

/// Maintains `etc/nginx/<id>-site` and `etc/nginx/<id>-urlmap`.
#[derive(Debug, Clone)]
pub struct NginxPlugin {
    fcgi_params_path: PathBuf,
}

impl NginxPlugin {
    pub fn new(fcgi_params_path: PathBuf) -> Self {
        Self { fcgi_params_path }
    }

    pub fn site_path(layout: &HomeLayout, instance_id: &str) -> PathBuf {
        layout.nginx_dir().join(format!("{instance_id}-site"))
    }

    pub fn urlmap_path(layout: &HomeLayout, instance_id: &str) -> PathBuf {
        layout.nginx_dir().join(format!("{instance_id}-urlmap"))
    }

    fn initialize(&self, layout: &HomeLayout) -> Result<()> {
        let dir = layout.nginx_dir();
        fs::create_dir_all(&dir).with_context(|| format!("unable to create {}", dir.display()))?;
        let sites = dir.join(SITES_CONF);
        if !sites.is_file() {
            write_atomic(&sites, format!("include {}/*-site;\n", dir.display()).as_bytes())?;
            debug!(path = %sites.display(), "nginx sites include written");
        }
        Ok(())
    }

    fn configure(&self, ctx: &mut LaunchContext<'_>) -> Result<()> {
        let mut factories = ctx.config.urlmap.iter().filter_map(|route| match route {
            RouteEntry::App { app_factory, .. } => Some(app_factory.clone()),
            _ => None,
        });
        let Some(factory) = factories.next() else {
            return Ok(());
        };
        if factories.next().is_some() {
            bail!("only one app route is supported per instance");
        }
        ctx.config.options.app_factory = Some(factory);
        ctx.appcfg.insert(APP_SOCKET_KEY, ctx.paths.app_socket.as_path());
        Ok(())
    }

    fn render_route(&self, route: &RouteEntry, folder: &Path, appcfg: &AppCfg) -> Result<String> {
        let url = interpolate(route.url(), appcfg)?;
        let rendered = match route {
            RouteEntry::Static { path, .. } => {
                let path = interpolate(path, appcfg)?;
                format!(
                    "location {url} {{\n    alias {}/{path};\n}}\n",
                    folder.display()
                )
            }
            RouteEntry::Fcgi { socket, .. } => {
                let socket = fcgi_pass_target(&interpolate(socket, appcfg)?)?;
                self.fcgi_location(&url, &socket)
            }
            RouteEntry::App { .. } => {
                let socket = appcfg
                    .get(APP_SOCKET_KEY)
                    .ok_or_else(|| anyhow!("no value for '{APP_SOCKET_KEY}' in app config"))?;
                self.fcgi_location(&url, &format!("unix:{socket}"))
            }
            RouteEntry::Proxy { upstream_url, .. } => {
                let upstream = interpolate(upstream_url, appcfg)?;
                format!(
                    "location {url} {{\n    \
                     proxy_pass {upstream};\n    \
                     proxy_redirect off;\n    \
                     proxy_set_header Host $host;\n    \
                     proxy_set_header X-Real-IP $remote_addr;\n    \
                     proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
                     }}\n"
                )
            }
        };
        Ok(rendered)
    }

    fn fcgi_location(&self, url: &str, socket: &str) -> String {
        format!(
            "location {url} {{\n    \
             include {};\n    \
             fastcgi_param PATH_INFO $fastcgi_script_name;\n    \
             fastcgi_param SCRIPT_NAME \"\";\n    \
             fastcgi_pass {socket};\n\
             }}\n",
            self.fcgi_params_path.display()
        )
    }

    fn render(&self, instance: &InstanceView<'_>, appcfg: &AppCfg) -> Result<()> {
        let mut urlmap = String::new();
        for route in &instance.config.urlmap {
            let rendered = self
                .render_route(route, &instance.paths.folder, appcfg)
                .with_context(|| format!("route '{}'", route.url()))?;
            urlmap.push_str(&rendered);
        }
        let urlmap_path = Self::urlmap_path(instance.layout, instance.id);
        let mut site = String::from("server {\n");
        let mut options: Vec<_> = instance.config.options.nginx_options.iter().collect();
        options.sort();
        for (key, value) in options {
            let _ = writeln!(site, "  {key} {value};");
        }
        let _ = writeln!(site, "  include {};", urlmap_path.display());
        site.push_str("}\n");

        let dir = instance.layout.nginx_dir();
        fs::create_dir_all(&dir).with_context(|| format!("unable to create {}", dir.display()))?;
        write_atomic(&urlmap_path, urlmap.as_bytes())?;
        write_atomic(Self::site_path(instance.layout, instance.id), site.as_bytes())?;
        debug!(instance = %instance.id, routes = instance.config.urlmap.len(), "nginx site rendered");
        Ok(())
    }

    fn remove(&self, instance: &InstanceView<'_>) -> Result<()> {
        remove_if_exists(Self::site_path(instance.layout, instance.id))?;
        remove_if_exists(Self::urlmap_path(instance.layout, instance.id))?;
        Ok(())
    }
}

/// `tcp://host:port` → `host:port`, `unix:///path` → `unix:/path`.
fn fcgi_pass_target(socket: &str) -> Result<String> {
    if let Some(address) = socket.strip_prefix("tcp://") {
        Ok(address.to_owned())
    } else if let Some(path) = socket.strip_prefix("unix://") {
        if !path.starts_with('/') {
            bail!("unix socket path must be absolute: '{socket}'");
        }
        Ok(format!("unix:{path}"))
    } else {
        bail!("cannot parse socket '{socket}'")
    }
}

impl Plugin for NginxPlugin {
    fn name(&self) -> &str {
        "nginx"
    }

    fn subscribe(self: Arc<Self>, bus: &mut SignalBus) {
        let this = Arc::clone(&self);
        bus.subscribe(Signal::Initializing, "nginx", move |event| match event {
            Event::Initializing { layout } => this.initialize(layout),
            _ => Ok(()),
        });
        let this = Arc::clone(&self);
        bus.subscribe(Signal::Configuring, "nginx", move |event| match event {
            Event::Configuring(ctx) => this.configure(ctx),
            _ => Ok(()),
        });
        let this = Arc::clone(&self);
        bus.subscribe(Signal::WillStart, "nginx", move |event| match event {
            Event::WillStart { instance, appcfg } => this.render(instance, appcfg),
            _ => Ok(()),
        });
        bus.subscribe(Signal::WillBeDestroyed, "nginx", move |event| match event {
            Event::WillBeDestroyed(instance) => self.remove(instance),
            _ => Ok(()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sarge_config::InstanceRequest;
    use tempfile::tempdir;

    fn appcfg() -> AppCfg {
        let mut cfg = AppCfg::new();
        cfg.insert("WEB_PORT", 45123_u16);
        cfg.insert("HOST", "10.0.0.1");
        cfg
    }

    #[test]
    fn interpolation_supports_both_forms() {
        let cfg = appcfg();
        assert_eq!(
            interpolate("tcp://${HOST}:$WEB_PORT/x", &cfg).expect("ok"),
            "tcp://10.0.0.1:45123/x"
        );
        assert_eq!(interpolate("cost $$5", &cfg).expect("ok"), "cost $5");
        assert_eq!(interpolate("plain", &cfg).expect("ok"), "plain");
    }

    #[test]
    fn interpolation_rejects_missing_and_malformed_keys() {
        let cfg = appcfg();
        assert!(interpolate("$MISSING", &cfg)
            .unwrap_err()
            .to_string()
            .contains("MISSING"));
        assert!(interpolate("${HOST", &cfg).is_err());
        assert!(interpolate("$5", &cfg).is_err());
    }

    #[test]
    fn socket_uris_map_to_fastcgi_pass() {
        assert_eq!(fcgi_pass_target("tcp://localhost:9000").expect("tcp"), "localhost:9000");
        assert_eq!(fcgi_pass_target("unix:///run/app.sock").expect("unix"), "unix:/run/app.sock");
        assert!(fcgi_pass_target("udp://x").is_err());
    }

    #[test]
    fn renders_site_and_urlmap_files() {
        let home = tempdir().expect("tempdir");
        let layout = HomeLayout::new(home.path());
        let plugin = NginxPlugin::new(PathBuf::from("/etc/nginx/fastcgi_params"));
        plugin.initialize(&layout).expect("initialize");
        let config = r#"{
            "urlmap": [
                {"type": "static", "url": "/media", "path": "media"},
                {"type": "fcgi", "url": "/", "socket": "tcp://localhost:$WEB_PORT"}
            ],
            "options": {"nginx_options": {"listen": "8080", "server_name": "testy"}}
        }"#
        .parse::<InstanceRequest>()
        .expect("request")
        .into_declared("abc123");
        let paths = layout.instance("abc123");
        let view = InstanceView {
            id: "abc123",
            config: &config,
            paths: &paths,
            layout: &layout,
        };
        plugin.render(&view, &appcfg()).expect("render");
        let urlmap =
            fs::read_to_string(NginxPlugin::urlmap_path(&layout, "abc123")).expect("urlmap");
        assert!(urlmap.contains(&format!("alias {}/media;", paths.folder.display())));
        assert!(urlmap.contains("fastcgi_pass localhost:45123;"));
        let site = fs::read_to_string(NginxPlugin::site_path(&layout, "abc123")).expect("site");
        assert!(site.starts_with("server {\n  listen 8080;\n  server_name testy;\n"));
        let sites = fs::read_to_string(layout.nginx_dir().join(SITES_CONF)).expect("sites");
        assert!(sites.contains("*-site"));

        plugin.remove(&view).expect("remove");
        plugin.remove(&view).expect("remove again");
        assert!(!NginxPlugin::site_path(&layout, "abc123").exists());
    }
}
