//! Teardown command

use anyhow::Result;
use camino::Utf8Path;
use dialoguer::Confirm;

use super::{open_system, print_report};
use crate::cli::TeardownArgs;
use crate::output;

pub fn run(args: TeardownArgs, config: Option<&Utf8Path>) -> Result<()> {
    let mut system = open_system(config)?;

    if !args.force {
        let confirmed = Confirm::new()
            .with_prompt("Revert every migration and drop all ledgers?")
            .default(false)
            .interact()?;

        if !confirmed {
            output::info("Cancelled");
            std::process::exit(1);
        }
    }

    output::header("Tearing down extensions");
    let report = system.tear_down()?;
    print_report(&report)?;

    output::success("All ledgers dropped");
    Ok(())
}
