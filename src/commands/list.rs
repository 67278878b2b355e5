//! Contains Functionality of list users command
use std::fmt::Write as _;
use std::io;
use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tabwriter::TabWriter;

use sshbox::lifecycle::Lifecycle;
use sshbox::registry::UserRecord;

/// List registered users
#[derive(Parser, Debug)]
pub struct List {}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "-".to_owned())
}

fn row(record: &UserRecord) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        record.username,
        record.username.service_name(),
        record.ssh_port,
        record.web_port,
        or_dash(record.cpus.as_ref()),
        or_dash(record.memory.as_ref()),
        or_dash(Some(&record.storage)),
    )
}

/// lists every registry row; invalid rows go to stderr
pub fn list(_: List, lifecycle: &Lifecycle) -> Result<()> {
    let mut content = String::new();
    let mut invalid = 0;
    for entry in lifecycle.list()? {
        match entry {
            Ok(record) => {
                let _ = writeln!(content, "{}", row(&record));
            }
            Err(err) => {
                invalid += 1;
                eprintln!("invalid {}", err);
            }
        }
    }

    let mut tab_writer = TabWriter::new(io::stdout());
    writeln!(&mut tab_writer, "USER\tSERVICE\tSSH\tWEB\tCPUS\tMEMORY\tSTORAGE")?;
    write!(&mut tab_writer, "{content}")?;
    tab_writer.flush()?;

    if invalid > 0 {
        log::warn!("{} registry rows are invalid", invalid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_dashes_empty_columns() {
        let record = UserRecord::parse_fields(&["alice", "2222", "0", "pw", "1.5", "", ""]).unwrap();
        assert_eq!(row(&record), "alice\talice-ssh\t2222\t0\t1.5\t-\t-");
    }
}
