//! Compiles a registry snapshot into a compose descriptor.
//!
//! The descriptor is always regenerated as a whole from the registry and
//! serialized from ordered maps, so compiling the same registry twice gives
//! byte-identical output.
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::Settings;
use crate::limits::LimitClauses;
use crate::registry::UserRecord;
use crate::storage;
use crate::utils;

/// Port sshd listens on inside the container.
pub const CONTAINER_SSH_PORT: u16 = 22;
/// Port the in-container web service listens on.
pub const CONTAINER_WEB_PORT: u16 = 8000;
pub const SHARED_MOUNT: &str = "/shared";
pub const USER_ENV: &str = "SSH_USER";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    pub name: String,
    pub services: BTreeMap<String, Service>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeDecl>,
    pub networks: BTreeMap<String, NetworkDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub image: String,
    pub container_name: String,
    pub hostname: String,
    pub restart: String,
    pub environment: Vec<String>,
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    pub healthcheck: Healthcheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_reservation: Option<u64>,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Healthcheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: String,
}

impl Default for Healthcheck {
    fn default() -> Self {
        Self {
            test: vec![
                "CMD-SHELL".to_owned(),
                "pgrep -x sshd > /dev/null || exit 1".to_owned(),
            ],
            interval: "30s".to_owned(),
            timeout: "5s".to_owned(),
            retries: 3,
            start_period: "10s".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VolumeDecl {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkDecl {
    pub driver: String,
}

impl Descriptor {
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn contains_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json =
            serde_json::to_string_pretty(self).context("failed to serialize descriptor")?;
        json.push('\n');
        Ok(json)
    }

    /// Replaces the descriptor file at `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        log::debug!("writing descriptor {:?}", path);
        utils::write_atomic(path, self.to_json()?)
    }
}

pub fn compile(records: &[UserRecord], settings: &Settings) -> Descriptor {
    let mut services = BTreeMap::new();
    let mut volumes = BTreeMap::new();

    for record in records {
        let service_name = record.username.service_name();
        if services.contains_key(&service_name) {
            log::warn!("duplicate registry entries for {}, using the last", record.username);
        }

        let home = if record.storage.is_dedicated() {
            volumes.remove(&record.username.volume_name());
            format!(
                "{}:{}",
                storage::mount_path(settings, &record.username).display(),
                record.username.home_dir()
            )
        } else {
            volumes.insert(record.username.volume_name(), VolumeDecl::default());
            format!("{}:{}", record.username.volume_name(), record.username.home_dir())
        };

        services.insert(service_name, compile_service(record, settings, home));
    }

    let mut networks = BTreeMap::new();
    networks.insert(
        settings.network.clone(),
        NetworkDecl {
            driver: "bridge".to_owned(),
        },
    );

    Descriptor {
        name: settings.project.clone(),
        services,
        volumes,
        networks,
    }
}

fn compile_service(record: &UserRecord, settings: &Settings, home: String) -> Service {
    if record.password.is_empty() {
        log::warn!("{} has no password in the registry", record.username);
    }

    let mut ports = Vec::new();
    if record.ssh_port.is_published() {
        ports.push(format!("{}:{}", record.ssh_port, CONTAINER_SSH_PORT));
    }
    if record.web_port.is_published() {
        ports.push(format!("{}:{}", record.web_port, CONTAINER_WEB_PORT));
    }

    let limits = LimitClauses::new(record.cpus.as_ref(), record.memory.as_ref());

    Service {
        image: settings.image.clone(),
        container_name: record.username.service_name(),
        hostname: record.username.hostname().to_owned(),
        restart: "unless-stopped".to_owned(),
        environment: vec![format!(
            "{}={}:{}",
            USER_ENV, record.username, record.password
        )],
        volumes: vec![
            format!("{}:{}:ro", settings.shared_dir.display(), SHARED_MOUNT),
            home,
        ],
        ports,
        healthcheck: Healthcheck::default(),
        cpus: limits.cpus,
        mem_limit: limits.mem_limit,
        mem_reservation: limits.mem_reservation,
        networks: vec![settings.network.clone()],
    }
}
