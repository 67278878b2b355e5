//! User container lifecycle: the operations the command line exposes,
//! composed from the registry, the compiler, the storage provisioner and
//! the runtime driver.
//!
//! Each operation is a strictly ordered sequence of blocking calls. The
//! registry is always written before the runtime is touched, so a failed
//! runtime call can be retried by re-running the same operation.
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::fs;
use std::path::PathBuf;

use crate::compose::{self, Descriptor};
use crate::config::Settings;
use crate::error::{Result, SshboxError, ValidationError};
use crate::host::HostOps;
use crate::ident::{self, Username};
use crate::limits::LiveLimits;
use crate::password;
use crate::quantity::Port;
use crate::registry::{Registry, RowError, UserRecord};
use crate::runtime::{ComposeCli, Runtime, ServiceStatus};
use crate::storage::{Storage, StorageOutcome, StorageUsage};
use crate::teardown::{StepOutcome, TeardownReport};

/// Raw `add` arguments as the user typed them.
#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    pub username: String,
    pub ssh_port: String,
    pub web_port: String,
    pub password: Option<String>,
    pub cpus: Option<String>,
    pub memory: Option<String>,
    pub storage: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AddReport {
    pub record: UserRecord,
    pub password_generated: bool,
    pub storage: StorageOutcome,
}

#[derive(Debug, Clone)]
pub struct RemoveReport {
    pub username: Username,
    pub was_registered: bool,
    pub teardown: TeardownReport,
}

#[derive(Debug, Clone)]
pub struct ResourceReport {
    pub record: UserRecord,
    /// `None` when the container is not running.
    pub live: Option<LiveLimits>,
    pub storage: Option<StorageUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshInfo {
    pub username: Username,
    pub host: String,
    pub ssh_port: Port,
    pub web_port: Port,
}

impl Display for SshInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssh_port.is_published() {
            writeln!(f, "ssh -p {} {}@{}", self.ssh_port, self.username, self.host)?;
        } else {
            writeln!(
                f,
                "ssh port is not published; use `sshbox shell {}`",
                self.username
            )?;
        }
        if self.web_port.is_published() {
            writeln!(f, "http://{}:{}/", self.host, self.web_port)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    Missing,
    Stale,
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCheck {
    pub username: Username,
    pub service: String,
    pub registry_rows: usize,
    pub invalid_rows: Vec<RowError>,
    pub in_descriptor: bool,
}

#[derive(Debug, Clone)]
pub struct DoctorReport {
    pub registry: PathBuf,
    pub registry_exists: bool,
    pub crlf_lines: usize,
    pub rows: Vec<std::result::Result<UserRecord, RowError>>,
    pub compiled_services: Vec<String>,
    pub descriptor: PathBuf,
    pub descriptor_state: DescriptorState,
    /// Services the runtime reads from the descriptor on disk.
    pub runtime_services: Option<std::result::Result<Vec<String>, String>>,
    pub target: Option<TargetCheck>,
    pub hints: Vec<String>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.hints.is_empty()
    }
}

pub struct Lifecycle {
    settings: Settings,
    registry: Registry,
    storage: Storage,
    runtime: Box<dyn Runtime>,
}

impl Lifecycle {
    pub fn new(settings: Settings) -> Self {
        let runtime = Box::new(ComposeCli::new(&settings));
        let storage = Storage::new(&settings);
        Self::from_parts(settings, storage, runtime)
    }

    pub fn with_backends(
        settings: Settings,
        host: Box<dyn HostOps>,
        runtime: Box<dyn Runtime>,
    ) -> Self {
        let storage = Storage::with_host(&settings, host);
        Self::from_parts(settings, storage, runtime)
    }

    fn from_parts(settings: Settings, storage: Storage, runtime: Box<dyn Runtime>) -> Self {
        Self {
            registry: Registry::new(&settings.registry),
            settings,
            storage,
            runtime,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn runtime(&self) -> &dyn Any {
        self.runtime.as_any()
    }

    fn registry_error(&self, source: anyhow::Error) -> SshboxError {
        SshboxError::Registry {
            path: self.registry.path().to_owned(),
            source,
        }
    }

    fn not_found(&self, username: &Username) -> SshboxError {
        SshboxError::NotFound {
            username: username.to_string(),
            service: username.service_name(),
            registry: self.registry.path().to_owned(),
        }
    }

    fn lookup(&self, username: &Username) -> Result<UserRecord> {
        self.registry
            .get(username)
            .map_err(|e| self.registry_error(e))?
            .ok_or_else(|| self.not_found(username))
    }

    /// Valid registry records, with a password generated and persisted for
    /// every record that has none so the compiled output stays stable.
    fn records_with_passwords(&self) -> Result<Vec<UserRecord>> {
        let mut records = self.registry.records().map_err(|e| self.registry_error(e))?;
        for record in records.iter_mut().filter(|r| r.password.is_empty()) {
            record.password = password::generate();
            log::info!("generated a password for {}", record.username);
            self.registry
                .upsert(record)
                .map_err(|e| self.registry_error(e))?;
        }
        Ok(records)
    }

    /// Recompiles the descriptor from the registry and writes it.
    pub fn generate(&self) -> Result<Descriptor> {
        let records = self.records_with_passwords()?;
        let descriptor = compose::compile(&records, &self.settings);
        descriptor.write(&self.settings.compose_file)?;
        log::debug!(
            "descriptor {:?} declares {} services",
            self.settings.compose_file,
            descriptor.services.len()
        );
        Ok(descriptor)
    }

    /// The compiled descriptor as written to disk.
    pub fn config(&self) -> Result<String> {
        Ok(self.generate()?.to_json()?)
    }

    /// Validates the user and regenerates the descriptor, failing with
    /// `NotFound` when the user has no service in it.
    fn require_service(&self, name: &str) -> Result<Username> {
        let username = validate_username(name)?;
        let descriptor = self.generate()?;
        if !descriptor.contains_service(&username.service_name()) {
            return Err(self.not_found(&username));
        }
        Ok(username)
    }

    pub fn add(&self, request: &AddRequest) -> Result<AddReport> {
        let fields = [
            request.username.as_str(),
            request.ssh_port.as_str(),
            request.web_port.as_str(),
            request.password.as_deref().unwrap_or(""),
            request.cpus.as_deref().unwrap_or(""),
            request.memory.as_deref().unwrap_or(""),
            request.storage.as_deref().unwrap_or(""),
        ];
        let mut record = UserRecord::parse_fields(&fields)?;
        self.check_port_conflicts(&record)?;

        let password_generated = record.password.is_empty();
        if password_generated {
            record.password = password::generate();
        }
        self.registry
            .upsert(&record)
            .map_err(|e| self.registry_error(e))?;
        log::info!("registered {}", record.username);

        self.generate()?;
        let storage = self.storage.ensure(&record.username, &record.storage)?;
        self.runtime.up(&record.username.service_name(), false)?;

        Ok(AddReport {
            record,
            password_generated,
            storage,
        })
    }

    fn check_port_conflicts(&self, record: &UserRecord) -> Result<()> {
        let requested = [record.ssh_port, record.web_port];
        if record.ssh_port.is_published() && record.ssh_port == record.web_port {
            return Err(ValidationError::PortConflict {
                port: record.ssh_port.get(),
                owner: record.username.to_string(),
            }
            .into());
        }

        let others = self.registry.records().map_err(|e| self.registry_error(e))?;
        for other in others.iter().filter(|o| o.username != record.username) {
            for port in requested.iter().filter(|p| p.is_published()) {
                if *port == other.ssh_port || *port == other.web_port {
                    return Err(ValidationError::PortConflict {
                        port: port.get(),
                        owner: other.username.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn start(&self, name: &str) -> Result<StorageOutcome> {
        let username = self.require_service(name)?;
        let record = self.lookup(&username)?;
        let storage = self.storage.ensure(&username, &record.storage)?;
        self.runtime.up(&username.service_name(), false)?;
        log::info!("started {}", username.service_name());
        Ok(storage)
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        let username = self.require_service(name)?;
        self.runtime.stop(&username.service_name())?;
        log::info!("stopped {}", username.service_name());
        Ok(())
    }

    pub fn restart(&self, name: &str) -> Result<()> {
        let username = self.require_service(name)?;
        self.runtime.restart(&username.service_name())?;
        log::info!("restarted {}", username.service_name());
        Ok(())
    }

    /// Discards the container and builds a new one from the current image
    /// and descriptor, picking up limit changes a restart would not.
    pub fn recreate(&self, name: &str) -> Result<StorageOutcome> {
        let username = self.require_service(name)?;
        let record = self.lookup(&username)?;
        let storage = self.storage.ensure(&username, &record.storage)?;
        self.runtime.up(&username.service_name(), true)?;
        log::info!("recreated {}", username.service_name());
        Ok(storage)
    }

    /// Tears down everything derived from the user and deletes the registry
    /// row. Teardown failures are reported but never prevent the deletion.
    pub fn remove(&self, name: &str) -> Result<RemoveReport> {
        let username = validate_username(name)?;
        let service = username.service_name();
        let record = self
            .registry
            .get(&username)
            .map_err(|e| self.registry_error(e))?;
        let mut teardown = TeardownReport::new();

        match &record {
            Some(record) => {
                // compose can only address services the descriptor declares
                teardown.step("write descriptor", || {
                    self.generate()?;
                    Ok(StepOutcome::Done)
                });
                teardown.step("stop container", || {
                    self.runtime.stop(&service)?;
                    Ok(StepOutcome::Done)
                });
                teardown.step("remove container", || {
                    self.runtime.remove(&service)?;
                    Ok(StepOutcome::Done)
                });
                teardown.step("remove home volume", || {
                    if record.storage.is_dedicated() {
                        return Ok(StepOutcome::Skipped("dedicated storage".to_owned()));
                    }
                    self.runtime.remove_volume(&username.volume_name())?;
                    Ok(StepOutcome::Done)
                });
            }
            None => {
                log::warn!("{} is not in the registry, cleaning up storage only", username);
                teardown.step("remove container", || {
                    Ok(StepOutcome::Skipped("not in registry".to_owned()))
                });
            }
        }

        teardown.extend(self.storage.teardown(&username));

        self.registry
            .delete(&username)
            .map_err(|e| self.registry_error(e))?;
        self.generate()?;
        log::info!("removed {}", username);

        Ok(RemoveReport {
            username,
            was_registered: record.is_some(),
            teardown,
        })
    }

    /// Configured limits beside the limits the runtime applies right now.
    pub fn resources(&self, name: &str) -> Result<ResourceReport> {
        let username = validate_username(name)?;
        let record = self.lookup(&username)?;

        let live = match self.runtime.container_id(&username.service_name())? {
            Some(id) => {
                let info = self.runtime.inspect(&id)?;
                if info.running {
                    Some(info.limits)
                } else {
                    None
                }
            }
            None => None,
        };

        let storage = if record.storage.is_dedicated() {
            Some(self.storage.usage(&username)?)
        } else {
            None
        };

        Ok(ResourceReport {
            record,
            live,
            storage,
        })
    }

    /// Every registry row, valid or not.
    pub fn list(&self) -> Result<Vec<std::result::Result<UserRecord, RowError>>> {
        Ok(self
            .registry
            .scan()
            .map_err(|e| self.registry_error(e))?
            .collect())
    }

    pub fn status(&self, name: Option<&str>) -> Result<Vec<ServiceStatus>> {
        match name {
            Some(name) => {
                let username = self.require_service(name)?;
                self.runtime.status(Some(&username.service_name()))
            }
            None => {
                self.generate()?;
                self.runtime.status(None)
            }
        }
    }

    pub fn logs(&self, name: &str, follow: bool, tail: Option<usize>) -> Result<()> {
        let username = self.require_service(name)?;
        self.runtime.logs(&username.service_name(), follow, tail)
    }

    pub fn shell(&self, name: &str) -> Result<()> {
        let username = self.require_service(name)?;
        let command = vec![self.settings.shell.clone()];
        self.runtime
            .exec_interactive(&username.service_name(), &command)
    }

    pub fn ssh_info(&self, name: &str) -> Result<SshInfo> {
        let username = validate_username(name)?;
        let record = self.lookup(&username)?;
        Ok(SshInfo {
            username,
            host: self.settings.ssh_host.clone(),
            ssh_port: record.ssh_port,
            web_port: record.web_port,
        })
    }

    /// Read-only consistency check of the registry and the descriptor.
    pub fn doctor(&self, name: Option<&str>) -> Result<DoctorReport> {
        let target = name.map(validate_username).transpose()?;
        let registry_path = self.registry.path().to_owned();
        let registry_exists = registry_path.exists();
        let mut hints = Vec::new();

        let (raw, rows) = if registry_exists {
            let raw = self.registry.read_raw().map_err(|e| self.registry_error(e))?;
            let rows: Vec<_> = self
                .registry
                .scan()
                .map_err(|e| self.registry_error(e))?
                .collect();
            (raw, rows)
        } else {
            hints.push(format!(
                "registry {:?} does not exist; `sshbox add` creates it",
                registry_path
            ));
            (String::new(), Vec::new())
        };

        let crlf_lines = raw.split('\n').filter(|l| l.ends_with('\r')).count();
        if crlf_lines > 0 {
            hints.push(format!(
                "{} registry lines end in CR (Windows line endings); they are trimmed when read, \
                 but editors may add stray characters",
                crlf_lines
            ));
        }

        let records: Vec<UserRecord> = rows.iter().filter_map(|r| r.as_ref().ok()).cloned().collect();
        let invalid: Vec<&RowError> = rows.iter().filter_map(|r| r.as_ref().err()).collect();
        if !invalid.is_empty() {
            hints.push(format!(
                "{} registry rows are invalid and left out of the descriptor",
                invalid.len()
            ));
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &records {
            *counts.entry(record.username.as_str()).or_default() += 1;
        }
        for (username, count) in counts.iter().filter(|(_, c)| **c > 1) {
            hints.push(format!(
                "{} has {} registry rows; re-run `sshbox add` to collapse them",
                username, count
            ));
        }

        let missing_passwords = records.iter().filter(|r| r.password.is_empty()).count();
        if missing_passwords > 0 {
            hints.push(format!(
                "{} users have no password yet; the next compiling command assigns one",
                missing_passwords
            ));
        }

        let compiled = compose::compile(&records, &self.settings);
        let compiled_services: Vec<String> =
            compiled.service_names().map(str::to_owned).collect();

        let descriptor = self.settings.compose_file.clone();
        let expected = compiled.to_json().ok();
        let descriptor_state = match fs::read_to_string(&descriptor) {
            Err(_) => DescriptorState::Missing,
            Ok(on_disk) if expected.as_deref() == Some(on_disk.as_str()) => {
                DescriptorState::Current
            }
            Ok(_) => DescriptorState::Stale,
        };
        match descriptor_state {
            DescriptorState::Missing => hints.push(format!(
                "descriptor {:?} has not been generated yet; run `sshbox generate`",
                descriptor
            )),
            DescriptorState::Stale => hints.push(format!(
                "descriptor {:?} is out of date with the registry; run `sshbox generate`",
                descriptor
            )),
            DescriptorState::Current => {}
        }

        let runtime_services = match descriptor_state {
            DescriptorState::Missing => None,
            _ => Some(self.runtime.services().map_err(|e| e.to_string())),
        };

        let target = target.map(|username| {
            let service = username.service_name();
            let registry_rows = counts.get(username.as_str()).copied().unwrap_or(0);
            let invalid_rows: Vec<RowError> = invalid
                .iter()
                .filter(|e| e.text.split(',').next().map(str::trim) == Some(username.as_str()))
                .map(|e| (*e).clone())
                .collect();
            let in_descriptor = compiled.contains_service(&service);

            if !in_descriptor {
                if !invalid_rows.is_empty() {
                    hints.push(format!(
                        "the registry row for {} is invalid: {}",
                        username, invalid_rows[0].reason
                    ));
                } else if raw
                    .lines()
                    .any(|l| l.trim_start().starts_with(&format!("{},", username)))
                {
                    hints.push(format!(
                        "{} appears in the registry but was not parsed; check for stray characters",
                        username
                    ));
                } else {
                    hints.push(format!(
                        "no registry row for {}; run `sshbox add {}`",
                        username, username
                    ));
                }
            }

            TargetCheck {
                username,
                service,
                registry_rows,
                invalid_rows,
                in_descriptor,
            }
        });

        Ok(DoctorReport {
            registry: registry_path,
            registry_exists,
            crlf_lines,
            rows,
            compiled_services,
            descriptor,
            descriptor_state,
            runtime_services,
            target,
            hints,
        })
    }
}

pub fn validate_username(name: &str) -> Result<Username> {
    ident::validate(name).map_err(|source| {
        ValidationError::Username {
            name: name.to_owned(),
            source,
        }
        .into()
    })
}
