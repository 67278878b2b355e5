use anyhow::Result;
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Regenerate and print the compose descriptor
#[derive(Parser, Debug)]
pub struct Config {
    /// print the resolved sshbox settings instead
    #[clap(long)]
    pub settings: bool,
}

pub fn config(args: Config, lifecycle: &Lifecycle) -> Result<()> {
    if args.settings {
        println!("{}", serde_json::to_string_pretty(lifecycle.settings())?);
        return Ok(());
    }
    print!("{}", lifecycle.config()?);
    Ok(())
}
