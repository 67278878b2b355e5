use std::io;
use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tabwriter::TabWriter;

use sshbox::lifecycle::Lifecycle;

/// Show runtime state of all containers, or of one user's
#[derive(Parser, Debug)]
pub struct Status {
    pub username: Option<String>,
}

pub fn status(args: Status, lifecycle: &Lifecycle) -> Result<()> {
    let statuses = lifecycle.status(args.username.as_deref())?;

    let mut tab_writer = TabWriter::new(io::stdout());
    writeln!(&mut tab_writer, "NAME\tSERVICE\tSTATE\tSTATUS\tHEALTH")?;
    for status in statuses {
        writeln!(
            &mut tab_writer,
            "{}\t{}\t{}\t{}\t{}",
            status.name, status.service, status.state, status.status, status.health
        )?;
    }
    tab_writer.flush()?;
    Ok(())
}
