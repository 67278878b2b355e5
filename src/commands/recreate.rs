//! Rebuilds a user's container from the current descriptor
use anyhow::{Context, Result};
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Discard and recreate a user's container, applying changed limits
#[derive(Parser, Debug)]
pub struct Recreate {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

pub fn recreate(args: Recreate, lifecycle: &Lifecycle) -> Result<()> {
    let storage = lifecycle
        .recreate(&args.username)
        .with_context(|| format!("failed to recreate {}", args.username))?;
    println!("recreated {} (home: {})", args.username, storage);
    Ok(())
}
