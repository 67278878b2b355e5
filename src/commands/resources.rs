//! Compares configured limits with the ones the runtime enforces
use std::io;
use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tabwriter::TabWriter;

use sshbox::lifecycle::{Lifecycle, ResourceReport};
use sshbox::limits::{format_bytes, UNLIMITED};

/// Show configured and live resource limits of a user's container
#[derive(Parser, Debug)]
pub struct Resources {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
}

const NOT_RUNNING: &str = "(not running)";

fn rows(report: &ResourceReport) -> Vec<(&'static str, String, String)> {
    let record = &report.record;
    let configured = |v: Option<String>| v.unwrap_or_else(|| UNLIMITED.to_owned());

    let (cpus, memory) = match &report.live {
        Some(live) => (live.cpus_display(), live.memory_display()),
        None => (NOT_RUNNING.to_owned(), NOT_RUNNING.to_owned()),
    };
    let mut rows = vec![
        (
            "cpus",
            configured(record.cpus.as_ref().map(|c| c.to_string())),
            cpus,
        ),
        (
            "memory",
            configured(record.memory.as_ref().map(|m| m.to_string())),
            memory,
        ),
    ];

    let storage = match &report.storage {
        Some(usage) => {
            let size = usage
                .image_bytes
                .map(|b| format_bytes(b as i64))
                .unwrap_or_else(|| "no image".to_owned());
            if usage.mounted {
                format!("{} mounted at {}", size, usage.mount.display())
            } else {
                format!("{} (not mounted)", size)
            }
        }
        None => "anonymous volume".to_owned(),
    };
    let requested = record.storage.to_string();
    rows.push((
        "storage",
        if requested.is_empty() {
            "-".to_owned()
        } else {
            requested
        },
        storage,
    ));
    rows
}

pub fn resources(args: Resources, lifecycle: &Lifecycle) -> Result<()> {
    let report = lifecycle.resources(&args.username)?;

    let mut tab_writer = TabWriter::new(io::stdout());
    writeln!(&mut tab_writer, "RESOURCE\tCONFIGURED\tLIVE")?;
    for (name, configured, live) in rows(&report) {
        writeln!(&mut tab_writer, "{}\t{}\t{}", name, configured, live)?;
    }
    tab_writer.flush()?;
    Ok(())
}
