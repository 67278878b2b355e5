use anyhow::Result;
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Show the logs of a user's container
#[derive(Parser, Debug)]
pub struct Logs {
    /// keep streaming new output
    #[clap(short, long)]
    pub follow: bool,
    /// number of lines to show from the end of the logs
    #[clap(long)]
    pub tail: Option<usize>,
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

pub fn logs(args: Logs, lifecycle: &Lifecycle) -> Result<()> {
    lifecycle.logs(&args.username, args.follow, args.tail)?;
    Ok(())
}
