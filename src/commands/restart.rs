use anyhow::{Context, Result};
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Restart a user's container in place. Limit changes need `recreate`
#[derive(Parser, Debug)]
pub struct Restart {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

pub fn restart(args: Restart, lifecycle: &Lifecycle) -> Result<()> {
    lifecycle
        .restart(&args.username)
        .with_context(|| format!("failed to restart {}", args.username))?;
    println!("restarted {}", args.username);
    Ok(())
}
