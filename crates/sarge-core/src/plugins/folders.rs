//! ---
//! sarge_section: "05-plugins"
//! sarge_subsection: "module"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Ephemeral and persistent folder provisioning."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use sarge_config::{remove_dir_if_exists, ServiceSpec};
use tracing::debug;

use crate::allocator::{claim_unique_dir, random_token, MAX_ATTEMPTS};
use crate::appcfg::service_key;
use crate::plugins::Plugin;
use crate::signals::{Event, InstanceView, LaunchContext, Signal, SignalBus};

const SCRATCH_TOKEN_LENGTH: usize = 8;

/// Provides `<NAME>_PATH` for folder services.
///
/// Ephemeral folders are fresh `var/tmp/<id>-<service>-<token>` directories on
/// every start and are removed when the instance is destroyed. Persistent
/// folders live at `var/data/<id>/<service>` and survive destroy.
#[derive(Debug, Default)]
pub struct FolderPlugin;

impl FolderPlugin {
    pub fn new() -> Self {
        Self
    }

    fn configure(&self, ctx: &mut LaunchContext<'_>) -> Result<()> {
        for (name, service) in &ctx.config.require_services {
            let path = match service {
                ServiceSpec::EphemeralFolder => {
                    let scratch = ctx.layout.tmp_dir();
                    fs::create_dir_all(&scratch)
                        .with_context(|| format!("unable to create {}", scratch.display()))?;
                    let prefix = format!("{}-{}", ctx.id, sanitize(name));
                    let (_, path) = claim_unique_dir(&scratch, MAX_ATTEMPTS, || {
                        format!("{prefix}-{}", random_token(SCRATCH_TOKEN_LENGTH))
                    })
                    .with_context(|| format!("unable to create scratch folder for '{name}'"))?;
                    path
                }
                ServiceSpec::PersistentFolder => {
                    let path = ctx.paths.data_dir.join(sanitize(name));
                    fs::create_dir_all(&path)
                        .with_context(|| format!("unable to create {}", path.display()))?;
                    path
                }
                ServiceSpec::NetworkListener { .. } => continue,
            };
            debug!(instance = %ctx.id, service = %name, path = %path.display(), "folder provisioned");
            ctx.appcfg.insert(service_key(name, "PATH"), path);
        }
        Ok(())
    }

    fn cleanup(&self, instance: &InstanceView<'_>) -> Result<()> {
        let scratch = instance.layout.tmp_dir();
        let entries = match fs::read_dir(&scratch) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err).with_context(|| format!("unable to list {}", scratch.display()))
            }
        };
        let prefix = format!("{}-", instance.id);
        for entry in entries {
            let entry = entry.with_context(|| format!("unable to list {}", scratch.display()))?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                remove_dir_if_exists(entry.path())?;
                debug!(instance = %instance.id, path = %entry.path().display(), "scratch folder removed");
            }
        }
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

impl Plugin for FolderPlugin {
    fn name(&self) -> &str {
        "folders"
    }

    fn subscribe(self: Arc<Self>, bus: &mut SignalBus) {
        let this = Arc::clone(&self);
        bus.subscribe(Signal::Configuring, "folders", move |event| match event {
            Event::Configuring(ctx) => this.configure(ctx),
            _ => Ok(()),
        });
        bus.subscribe(Signal::WillBeDestroyed, "folders", move |event| match event {
            Event::WillBeDestroyed(instance) => self.cleanup(instance),
            _ => Ok(()),
        });
    }
}
