//! ---
//! sarge_section: "06-cli"
//! sarge_subsection: "binary"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Subcommand handlers for sargectl."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use sarge_common::{init_tracing, SargeConfig};
use sarge_config::InstanceRequest;
use sarge_core::{HomeLayout, Instance, Sarge};
use tracing::info;

use crate::Commands;

pub fn run(home: &Path, command: Commands) -> Result<()> {
    let loaded = SargeConfig::load(home)?;
    init_tracing("sarge", &loaded.config.logging, &HomeLayout::new(home).log_dir())?;
    if let Some(source) = &loaded.source {
        info!(config = %source.display(), "configuration loaded");
    }
    let sarge = Sarge::builder(home)
        .with_config(loaded.config)
        .build()
        .context("failed to boot sarge")?;

    match command {
        Commands::Init => sarge
            .init()
            .with_context(|| format!("init of {} failed", home.display())),
        Commands::New { config } => {
            let request: InstanceRequest = config.parse()?;
            let instance = sarge.new_instance(request).context("new failed")?;
            println!("{}", instance.folder().display());
            Ok(())
        }
        Commands::Start { id } => lookup(&sarge, &id)?
            .start()
            .with_context(|| format!("start {id} failed")),
        Commands::Stop { id } => lookup(&sarge, &id)?
            .stop()
            .with_context(|| format!("stop {id} failed")),
        Commands::Destroy { id } => sarge
            .destroy_instance(&id)
            .with_context(|| format!("destroy {id} failed")),
        Commands::Shell { id } => shell(&lookup(&sarge, &id)?),
        Commands::List => {
            for id in sarge.instance_ids()? {
                println!("{id}");
            }
            Ok(())
        }
    }
}

fn lookup<'s>(sarge: &'s Sarge, id: &str) -> Result<Instance<'s>> {
    sarge
        .get_instance(id)
        .with_context(|| format!("lookup of {id} failed"))
}

#[cfg(unix)]
fn shell(instance: &Instance<'_>) -> Result<()> {
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    let err = Command::new("/bin/bash")
        .arg("--norc")
        .current_dir(instance.folder())
        .env(sarge_core::APPCFG_ENV, &instance.paths().appcfg_path)
        .exec();
    Err(err).context("unable to exec /bin/bash")
}

#[cfg(not(unix))]
fn shell(_instance: &Instance<'_>) -> Result<()> {
    anyhow::bail!("shell is only supported on unix hosts")
}
