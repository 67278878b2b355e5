use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use sshbox::config::Settings;

pub mod add;
pub mod config;
pub mod doctor;
pub mod generate;
pub mod list;
pub mod logs;
pub mod recreate;
pub mod remove;
pub mod resources;
pub mod restart;
pub mod shell;
pub mod ssh_info;
pub mod start;
pub mod status;
pub mod stop;

pub const ROOT_ENV: &str = "SSHBOX_ROOT";

/// Flags accepted by every subcommand.
#[derive(Parser, Debug)]
pub struct GlobalOpts {
    /// base directory holding the registry, descriptor and storage (default: $SSHBOX_ROOT or the current directory)
    #[clap(short, long)]
    pub root: Option<PathBuf>,
    /// user registry file, relative to the root unless absolute
    #[clap(long)]
    pub registry: Option<PathBuf>,
    /// generated compose file, relative to the root unless absolute
    #[clap(long)]
    pub compose_file: Option<PathBuf>,
    /// set the log file to write sshbox logs to (default is '/dev/stderr')
    #[clap(short, long, overrides_with("log"))]
    pub log: Option<PathBuf>,
    /// set the log format ('text' (default), or 'json')
    #[clap(long)]
    pub log_format: Option<String>,
    /// change log level to debug, `SSHBOX_LOG_LEVEL` takes precedence
    #[clap(long)]
    pub debug: bool,
}

fn determine_root(root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root);
    }
    if let Some(root) = env::var_os(ROOT_ENV).filter(|r| !r.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    env::current_dir().context("failed to determine the current directory")
}

/// Settings from defaults, `sshbox.json`, the environment and finally flags.
pub fn load_settings(global: &GlobalOpts) -> Result<Settings> {
    let root = determine_root(global.root.clone())?;
    let mut settings = Settings::load(&root)
        .with_context(|| format!("failed to load settings for {:?}", root))?;
    if let Some(registry) = &global.registry {
        settings.registry = settings.resolve(registry);
    }
    if let Some(compose_file) = &global.compose_file {
        settings.compose_file = settings.resolve(compose_file);
    }
    log::debug!("settings: {:?}", settings);
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn global(root: Option<PathBuf>) -> GlobalOpts {
        GlobalOpts {
            root,
            registry: None,
            compose_file: None,
            log: None,
            log_format: None,
            debug: false,
        }
    }

    #[test]
    #[serial]
    fn test_root_precedence() -> Result<()> {
        env::set_var(ROOT_ENV, "/from/env");
        assert_eq!(
            determine_root(Some(PathBuf::from("/from/flag")))?,
            PathBuf::from("/from/flag")
        );
        assert_eq!(determine_root(None)?, PathBuf::from("/from/env"));
        env::remove_var(ROOT_ENV);
        assert_eq!(determine_root(None)?, env::current_dir()?);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_flags_override_settings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut opts = global(Some(dir.path().to_path_buf()));
        opts.registry = Some(PathBuf::from("people.csv"));
        opts.compose_file = Some(PathBuf::from("/etc/sshbox/compose.json"));

        let settings = load_settings(&opts)?;
        assert_eq!(settings.registry, dir.path().join("people.csv"));
        assert_eq!(
            settings.compose_file,
            PathBuf::from("/etc/sshbox/compose.json")
        );
        Ok(())
    }
}
