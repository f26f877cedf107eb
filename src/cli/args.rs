//! CLI argument definitions using clap
//!
//! Commands:
//! - promoctl run --config <path> --fixtures <path> [--until-idle]
//! - promoctl check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// promoctl - serialized Promotion scheduling per Stage
#[derive(Parser, Debug)]
#[command(name = "promoctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the controller against Stages and Promotions loaded from a file
    Run {
        /// Path to configuration file
        #[arg(long, default_value = "./promoctl.json")]
        config: PathBuf,

        /// Path to a JSON file of stages, applications and promotions
        #[arg(long)]
        fixtures: PathBuf,

        /// Stop once no work remains instead of waiting for Ctrl-C
        #[arg(long)]
        until_idle: bool,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./promoctl.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
