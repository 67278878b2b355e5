use anyhow::Result;
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Print how to connect to a user's container
#[derive(Parser, Debug)]
pub struct SshInfo {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

pub fn ssh_info(args: SshInfo, lifecycle: &Lifecycle) -> Result<()> {
    print!("{}", lifecycle.ssh_info(&args.username)?);
    Ok(())
}
