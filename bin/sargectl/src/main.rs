//! ---
//! sarge_section: "06-cli"
//! sarge_subsection: "binary"
//! sarge_type: "source"
//! sarge_scope: "code"
//! sarge_description: "Control CLI for sarge homes and instances."
//! sarge_version: "v0.0.0-prealpha"
//! sarge_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use path_absolutize::Absolutize;

mod commands;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Instance lifecycle control for a sarge home",
    long_about = None
)]
struct Cli {
    /// Sarge home directory.
    #[arg(value_name = "SARGE_HOME", env = "SARGE_HOME")]
    home: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the home skeleton and supervisor configuration.
    Init,
    /// Create an instance from a JSON request and print its folder.
    New {
        /// e.g. '{"services": {"db": {"type": "ephemeral-folder"}}}'
        #[arg(value_name = "CONFIG", default_value = "{}")]
        config: String,
    },
    Start {
        id: String,
    },
    Stop {
        id: String,
    },
    Destroy {
        id: String,
    },
    /// Open a shell in the instance folder with SARGEAPP_CFG set.
    Shell {
        id: String,
    },
    /// Print the IDs of every known instance.
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = cli
        .home
        .absolutize()
        .with_context(|| format!("cannot resolve home {}", cli.home.display()))?
        .into_owned();
    commands::run(&home, cli.command)
}
