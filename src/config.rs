//! Paths and runtime settings.
//!
//! Settings are resolved from built-in defaults, then an optional
//! `sshbox.json` in the root directory, then `SSHBOX_*` environment
//! variables. Command line flags are applied last by the caller.
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "sshbox.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    /// Base directory every relative path is resolved against.
    pub root: PathBuf,
    pub registry: PathBuf,
    pub compose_file: PathBuf,
    /// Holds `images/<user>.img` and `mounts/<user>`.
    pub storage_dir: PathBuf,
    /// Host directory mounted read-only into every container.
    pub shared_dir: PathBuf,
    pub project: String,
    pub image: String,
    pub network: String,
    /// Program and leading arguments used to drive compose.
    pub compose_command: Vec<String>,
    /// Program used for `inspect`.
    pub docker_command: String,
    /// Host name printed by `ssh-info`.
    pub ssh_host: String,
    pub shell: String,
}

/// On-disk form of [`Settings`]; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    registry: Option<PathBuf>,
    compose_file: Option<PathBuf>,
    storage_dir: Option<PathBuf>,
    shared_dir: Option<PathBuf>,
    project: Option<String>,
    image: Option<String>,
    network: Option<String>,
    compose_command: Option<Vec<String>>,
    docker_command: Option<String>,
    ssh_host: Option<String>,
    shell: Option<String>,
}

impl Settings {
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self {
            registry: root.join("users.csv"),
            compose_file: root.join("compose.json"),
            storage_dir: root.join("storage"),
            shared_dir: root.join("shared"),
            root,
            project: "sshbox".to_owned(),
            image: "sshbox:latest".to_owned(),
            network: "sshbox-net".to_owned(),
            compose_command: vec!["docker".to_owned(), "compose".to_owned()],
            docker_command: "docker".to_owned(),
            ssh_host: "localhost".to_owned(),
            shell: "/bin/bash".to_owned(),
        }
    }

    /// Loads settings for `root`, applying the config file and environment.
    pub fn load<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let mut settings = Self::with_root(root);

        let config_path = settings.root.join(CONFIG_FILE);
        if config_path.exists() {
            log::debug!("loading settings from {:?}", config_path);
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {:?}", config_path))?;
            let file: SettingsFile = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {:?}", config_path))?;
            settings.apply_file(file);
        }

        settings.apply_env(|key| env::var(key).ok());
        Ok(settings)
    }

    fn apply_file(&mut self, file: SettingsFile) {
        if let Some(p) = file.registry {
            self.registry = self.resolve(p);
        }
        if let Some(p) = file.compose_file {
            self.compose_file = self.resolve(p);
        }
        if let Some(p) = file.storage_dir {
            self.storage_dir = self.resolve(p);
        }
        if let Some(p) = file.shared_dir {
            self.shared_dir = self.resolve(p);
        }
        if let Some(v) = file.project {
            self.project = v;
        }
        if let Some(v) = file.image {
            self.image = v;
        }
        if let Some(v) = file.network {
            self.network = v;
        }
        if let Some(v) = file.compose_command.filter(|c| !c.is_empty()) {
            self.compose_command = v;
        }
        if let Some(v) = file.docker_command {
            self.docker_command = v;
        }
        if let Some(v) = file.ssh_host {
            self.ssh_host = v;
        }
        if let Some(v) = file.shell {
            self.shell = v;
        }
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(p) = lookup("SSHBOX_REGISTRY") {
            self.registry = self.resolve(p);
        }
        if let Some(p) = lookup("SSHBOX_COMPOSE_FILE") {
            self.compose_file = self.resolve(p);
        }
        if let Some(p) = lookup("SSHBOX_STORAGE_DIR") {
            self.storage_dir = self.resolve(p);
        }
        if let Some(p) = lookup("SSHBOX_SHARED_DIR") {
            self.shared_dir = self.resolve(p);
        }
        if let Some(v) = lookup("SSHBOX_PROJECT") {
            self.project = v;
        }
        if let Some(v) = lookup("SSHBOX_IMAGE") {
            self.image = v;
        }
        if let Some(v) = lookup("SSHBOX_NETWORK") {
            self.network = v;
        }
        if let Some(v) = lookup("SSHBOX_SSH_HOST") {
            self.ssh_host = v;
        }
    }

    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.storage_dir.join("images")
    }

    pub fn mounts_dir(&self) -> PathBuf {
        self.storage_dir.join("mounts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_relative_to_root() {
        let settings = Settings::with_root("/srv/sshbox");
        assert_eq!(settings.registry, PathBuf::from("/srv/sshbox/users.csv"));
        assert_eq!(settings.compose_file, PathBuf::from("/srv/sshbox/compose.json"));
        assert_eq!(settings.images_dir(), PathBuf::from("/srv/sshbox/storage/images"));
        assert_eq!(settings.mounts_dir(), PathBuf::from("/srv/sshbox/storage/mounts"));
        assert_eq!(settings.compose_command, vec!["docker", "compose"]);
    }

    #[test]
    fn test_config_file_overrides_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"image": "registry.local/ssh:2", "storage_dir": "/data/sshbox", "shared_dir": "common"}"#,
        )?;
        let settings = Settings::load(dir.path())?;
        assert_eq!(settings.image, "registry.local/ssh:2");
        assert_eq!(settings.storage_dir, PathBuf::from("/data/sshbox"));
        assert_eq!(settings.shared_dir, dir.path().join("common"));
        assert_eq!(settings.project, "sshbox");
        Ok(())
    }

    #[test]
    fn test_config_file_rejects_unknown_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(CONFIG_FILE), r#"{"imgae": "typo"}"#)?;
        assert!(Settings::load(dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_env_lookup_overrides() {
        let mut settings = Settings::with_root("/srv/sshbox");
        settings.apply_env(|key| match key {
            "SSHBOX_PROJECT" => Some("lab".to_string()),
            "SSHBOX_REGISTRY" => Some("people.csv".to_string()),
            "SSHBOX_IMAGE" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(settings.project, "lab");
        assert_eq!(settings.registry, PathBuf::from("/srv/sshbox/people.csv"));
        assert_eq!(settings.image, "sshbox:latest");
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() -> Result<()> {
        let dir = tempfile::tempdir()?;
        env::set_var("SSHBOX_NETWORK", "labnet");
        let settings = Settings::load(dir.path());
        env::remove_var("SSHBOX_NETWORK");
        assert_eq!(settings?.network, "labnet");
        Ok(())
    }
}
