use anyhow::Result;
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Open an interactive shell in a user's container
#[derive(Parser, Debug)]
pub struct Shell {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

pub fn shell(args: Shell, lifecycle: &Lifecycle) -> Result<()> {
    lifecycle.shell(&args.username)?;
    Ok(())
}
