mod commands;
pub mod exit_codes;
pub mod output;

pub use commands::{Cli, Commands, RulesCommands};

use anyhow::Result;

pub fn run(cli: Cli) -> Result<()> {
    crate::logging::init(cli.verbose);
    commands::execute(cli)
}
