use anyhow::Result;
use clap::Parser;

use sshbox::lifecycle::Lifecycle;

/// Write the compose descriptor without touching any container
#[derive(Parser, Debug)]
pub struct Generate {}

pub fn generate(_: Generate, lifecycle: &Lifecycle) -> Result<()> {
    let descriptor = lifecycle.generate()?;
    println!(
        "wrote {} with {} services",
        lifecycle.settings().compose_file.display(),
        descriptor.services.len()
    );
    Ok(())
}
