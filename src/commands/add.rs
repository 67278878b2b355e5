//! Registers a user, or updates an existing one, and starts its container
use anyhow::Result;
use clap::Parser;

use sshbox::lifecycle::{AddRequest, Lifecycle};

/// Add or update a user and start its container
#[derive(Parser, Debug)]
pub struct Add {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub username: String,
    /// host port published to the container's sshd (0 or empty: not published)
    pub ssh_port: Option<String>,
    /// host port published to the container's web service (0 or empty: not published)
    pub web_port: Option<String>,
    /// login password, generated when empty
    pub password: Option<String>,
    /// CPU limit in cores, e.g. 1.5
    pub cpus: Option<String>,
    /// memory limit, e.g. 512m or 2g
    pub memory: Option<String>,
    /// size of a dedicated home filesystem, e.g. 10G
    pub storage: Option<String>,
}

impl From<Add> for AddRequest {
    fn from(args: Add) -> Self {
        let non_empty = |v: Option<String>| v.filter(|v| !v.trim().is_empty());
        AddRequest {
            username: args.username,
            ssh_port: args.ssh_port.unwrap_or_default(),
            web_port: args.web_port.unwrap_or_default(),
            password: non_empty(args.password),
            cpus: non_empty(args.cpus),
            memory: non_empty(args.memory),
            storage: non_empty(args.storage),
        }
    }
}

pub fn add(args: Add, lifecycle: &Lifecycle) -> Result<()> {
    let report = lifecycle.add(&AddRequest::from(args))?;
    let record = &report.record;

    println!(
        "{} is up as service {}",
        record.username,
        record.username.service_name()
    );
    if report.password_generated {
        println!("generated password: {}", record.password);
    }
    println!("home: {}", report.storage);
    print!("{}", lifecycle.ssh_info(record.username.as_str())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_trailing_fields() {
        let args = Add::try_parse_from(["add", "alice", "2222"]).unwrap();
        let request = AddRequest::from(args);
        assert_eq!(request.username, "alice");
        assert_eq!(request.ssh_port, "2222");
        assert_eq!(request.web_port, "");
        assert_eq!(request.password, None);
    }

    #[test]
    fn test_empty_positionals_are_absent() {
        let args = Add::try_parse_from(["add", "alice", "2222", "8001", "", "1", "", "5G"]).unwrap();
        let request = AddRequest::from(args);
        assert_eq!(request.password, None);
        assert_eq!(request.cpus.as_deref(), Some("1"));
        assert_eq!(request.memory, None);
        assert_eq!(request.storage.as_deref(), Some("5G"));
    }

    #[test]
    fn test_username_required() {
        assert!(Add::try_parse_from(["add"]).is_err());
        assert!(Add::try_parse_from(["add", ""]).is_err());
    }
}
