//! Removes a user and everything derived from it
use anyhow::Result;
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Remove a user's container, storage and registry row
#[derive(Parser, Debug)]
pub struct Remove {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

pub fn remove(args: Remove, lifecycle: &Lifecycle) -> Result<()> {
    let report = lifecycle.remove(&args.username)?;
    if !report.was_registered {
        println!("{} was not registered", report.username);
    }
    print!("{}", report.teardown);

    let failures = report.teardown.failures().count();
    if failures > 0 {
        log::warn!(
            "{} teardown steps failed for {}; leftovers may need manual cleanup",
            failures,
            report.username
        );
    }
    println!("removed {} from the registry", report.username);
    Ok(())
}
