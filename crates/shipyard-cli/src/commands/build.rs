//! `shipyard build` command implementation.

use miette::Result;
use shipyard_core::{BuildError, Pipeline};

use super::{outcome_json, print_report, BuildAction};

/// Run one full build.
pub fn run(action: BuildAction, json: bool) -> Result<()> {
    let result = action
        .load_config()
        .map_err(BuildError::from)
        .and_then(|config| Pipeline::new(config)?.build());

    if json {
        println!("{}", outcome_json(&result));
        if result.is_err() {
            std::process::exit(1);
        }
        return Ok(());
    }

    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => Err(miette::miette!(code = e.code(), "{e}")),
    }
}
