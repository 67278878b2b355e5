//! Starts the container of a registered user
use anyhow::{Context, Result};
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Start a user's container, provisioning its storage first
#[derive(Parser, Debug)]
pub struct Start {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

pub fn start(args: Start, lifecycle: &Lifecycle) -> Result<()> {
    let storage = lifecycle
        .start(&args.username)
        .with_context(|| format!("failed to start {}", args.username))?;
    println!("started {} (home: {})", args.username, storage);
    Ok(())
}
