//! # sshbox
//! Provisions and operates per-user SSH sandbox containers from a flat
//! user registry, driving `docker compose` to match it.
mod commands;

use anyhow::Result;
use clap::{crate_version, Parser, Subcommand};

use sshbox::error::SshboxError;
use sshbox::lifecycle::Lifecycle;
use sshbox::logger;

use crate::commands::GlobalOpts;

#[derive(Parser, Debug)]
#[clap(version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    Add(commands::add::Add),
    Remove(commands::remove::Remove),
    Start(commands::start::Start),
    Stop(commands::stop::Stop),
    Restart(commands::restart::Restart),
    Recreate(commands::recreate::Recreate),
    Resources(commands::resources::Resources),
    Logs(commands::logs::Logs),
    Shell(commands::shell::Shell),
    SshInfo(commands::ssh_info::SshInfo),
    Config(commands::config::Config),
    Doctor(commands::doctor::Doctor),
    List(commands::list::List),
    Status(commands::status::Status),
    Generate(commands::generate::Generate),
}

fn run(opts: Opts) -> Result<()> {
    let settings = commands::load_settings(&opts.global)?;
    let lifecycle = Lifecycle::new(settings);

    match opts.subcmd {
        SubCommand::Add(add) => commands::add::add(add, &lifecycle),
        SubCommand::Remove(remove) => commands::remove::remove(remove, &lifecycle),
        SubCommand::Start(start) => commands::start::start(start, &lifecycle),
        SubCommand::Stop(stop) => commands::stop::stop(stop, &lifecycle),
        SubCommand::Restart(restart) => commands::restart::restart(restart, &lifecycle),
        SubCommand::Recreate(recreate) => commands::recreate::recreate(recreate, &lifecycle),
        SubCommand::Resources(resources) => {
            commands::resources::resources(resources, &lifecycle)
        }
        SubCommand::Logs(logs) => commands::logs::logs(logs, &lifecycle),
        SubCommand::Shell(shell) => commands::shell::shell(shell, &lifecycle),
        SubCommand::SshInfo(ssh_info) => commands::ssh_info::ssh_info(ssh_info, &lifecycle),
        SubCommand::Config(config) => commands::config::config(config, &lifecycle),
        SubCommand::Doctor(doctor) => commands::doctor::doctor(doctor, &lifecycle),
        SubCommand::List(list) => commands::list::list(list, &lifecycle),
        SubCommand::Status(status) => commands::status::status(status, &lifecycle),
        SubCommand::Generate(generate) => commands::generate::generate(generate, &lifecycle),
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<SshboxError>()
        .map(SshboxError::exit_code)
        .unwrap_or(1)
}

fn main() {
    let opts = Opts::parse();

    if let Err(e) = logger::init(
        opts.global.debug,
        opts.global.log.clone(),
        opts.global.log_format.clone(),
    ) {
        eprintln!("log init failed: {:?}", e);
    }

    log::debug!(
        "started by user {} with {:?}",
        nix::unistd::geteuid(),
        std::env::args_os()
    );

    if let Err(err) = run(opts) {
        eprintln!("error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_subcommand_names() {
        let opts = Opts::try_parse_from(["sshbox", "--root", "/srv", "ssh-info", "alice"]).unwrap();
        assert!(matches!(opts.subcmd, SubCommand::SshInfo(_)));
        assert!(Opts::try_parse_from(["sshbox", "start"]).is_err());
        assert!(Opts::try_parse_from(["sshbox", "launch", "alice"]).is_err());
    }

    #[test]
    fn test_exit_code_survives_context() {
        let err = anyhow::Error::from(SshboxError::NotFound {
            username: "alice".to_string(),
            service: "alice-ssh".to_string(),
            registry: "users.csv".into(),
        })
        .context("failed to start alice");
        assert_eq!(exit_code(&err), 3);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }
}
