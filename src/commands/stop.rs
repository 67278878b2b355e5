use anyhow::{Context, Result};
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Stop a user's container without removing it
#[derive(Parser, Debug)]
pub struct Stop {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

pub fn stop(args: Stop, lifecycle: &Lifecycle) -> Result<()> {
    lifecycle
        .stop(&args.username)
        .with_context(|| format!("failed to stop {}", args.username))?;
    println!("stopped {}", args.username);
    Ok(())
}
