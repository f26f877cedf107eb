//! CLI module for promoctl
//!
//! Provides command-line interface for:
//! - run: Run the controller over a fixtures file
//! - check-config: Validate a configuration file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    check_config, execute, run, run_command, run_controller, Fixtures, PromotionSummary,
    RunReport,
};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_json_file, write_response};
