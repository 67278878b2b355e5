use std::{
    any::Any,
    cell::RefCell,
    collections::{BTreeMap, HashSet},
};

use super::{ContainerInfo, Runtime, ServiceStatus};
use crate::error::{Result, SshboxError};
use crate::limits::LiveLimits;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RuntimeCall {
    Services,
    Up { service: String, force_recreate: bool },
    Stop(String),
    Restart(String),
    Remove(String),
    RemoveVolume(String),
    Logs { service: String, follow: bool },
    Exec { service: String, command: Vec<String> },
}

impl RuntimeCall {
    fn kind(&self) -> &'static str {
        match self {
            RuntimeCall::Services => "services",
            RuntimeCall::Up { .. } => "up",
            RuntimeCall::Stop(_) => "stop",
            RuntimeCall::Restart(_) => "restart",
            RuntimeCall::Remove(_) => "remove",
            RuntimeCall::RemoveVolume(_) => "remove_volume",
            RuntimeCall::Logs { .. } => "logs",
            RuntimeCall::Exec { .. } => "exec",
        }
    }
}

#[derive(Clone, Debug, Default)]
struct TestContainer {
    id: String,
    running: bool,
    limits: LiveLimits,
}

/// In-memory runtime that records every mutating call. `up` creates a
/// running container; limits reported by `inspect` are set with
/// [`TestRuntime::set_limits`].
#[derive(Default)]
pub struct TestRuntime {
    calls: RefCell<Vec<RuntimeCall>>,
    containers: RefCell<BTreeMap<String, TestContainer>>,
    limits: RefCell<BTreeMap<String, LiveLimits>>,
    failing: RefCell<HashSet<&'static str>>,
    next_id: RefCell<u32>,
}

impl TestRuntime {
    pub fn get_calls(&self) -> Vec<RuntimeCall> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn is_running(&self, service: &str) -> bool {
        self.containers
            .borrow()
            .get(service)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    pub fn has_container(&self, service: &str) -> bool {
        self.containers.borrow().contains_key(service)
    }

    /// Limits the runtime reports for `service` from its next `up` on.
    pub fn set_limits(&self, service: &str, limits: LiveLimits) {
        self.limits.borrow_mut().insert(service.to_owned(), limits.clone());
        if let Some(container) = self.containers.borrow_mut().get_mut(service) {
            container.limits = limits;
        }
    }

    /// Makes every call of `kind` fail, e.g. "up", "stop" or "remove".
    pub fn fail_on(&self, kind: &'static str) {
        self.failing.borrow_mut().insert(kind);
    }

    fn record(&self, call: RuntimeCall) -> Result<()> {
        let kind = call.kind();
        self.calls.borrow_mut().push(call);
        if self.failing.borrow().contains(kind) {
            return Err(SshboxError::Runtime {
                command: kind.to_owned(),
                stderr: "injected failure".to_owned(),
            });
        }
        Ok(())
    }
}

impl Runtime for TestRuntime {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn services(&self) -> Result<Vec<String>> {
        self.record(RuntimeCall::Services)?;
        Ok(self.containers.borrow().keys().cloned().collect())
    }

    fn up(&self, service: &str, force_recreate: bool) -> Result<()> {
        self.record(RuntimeCall::Up {
            service: service.to_owned(),
            force_recreate,
        })?;
        let limits = self
            .limits
            .borrow()
            .get(service)
            .cloned()
            .unwrap_or_default();
        let mut containers = self.containers.borrow_mut();
        let recreate = force_recreate || !containers.contains_key(service);
        if recreate {
            let mut next_id = self.next_id.borrow_mut();
            *next_id += 1;
            containers.insert(
                service.to_owned(),
                TestContainer {
                    id: format!("{:012x}", *next_id),
                    running: true,
                    limits,
                },
            );
        } else if let Some(container) = containers.get_mut(service) {
            container.running = true;
        }
        Ok(())
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.record(RuntimeCall::Stop(service.to_owned()))?;
        if let Some(container) = self.containers.borrow_mut().get_mut(service) {
            container.running = false;
        }
        Ok(())
    }

    fn restart(&self, service: &str) -> Result<()> {
        self.record(RuntimeCall::Restart(service.to_owned()))?;
        if let Some(container) = self.containers.borrow_mut().get_mut(service) {
            container.running = true;
        }
        Ok(())
    }

    fn remove(&self, service: &str) -> Result<()> {
        self.record(RuntimeCall::Remove(service.to_owned()))?;
        self.containers.borrow_mut().remove(service);
        Ok(())
    }

    fn remove_volume(&self, volume: &str) -> Result<()> {
        self.record(RuntimeCall::RemoveVolume(volume.to_owned()))
    }

    fn container_id(&self, service: &str) -> Result<Option<String>> {
        Ok(self.containers.borrow().get(service).map(|c| c.id.clone()))
    }

    fn inspect(&self, container_id: &str) -> Result<ContainerInfo> {
        self.containers
            .borrow()
            .values()
            .find(|c| c.id == container_id)
            .map(|c| ContainerInfo {
                running: c.running,
                limits: c.limits.clone(),
            })
            .ok_or_else(|| SshboxError::Runtime {
                command: format!("inspect {}", container_id),
                stderr: "no such container".to_owned(),
            })
    }

    fn status(&self, service: Option<&str>) -> Result<Vec<ServiceStatus>> {
        Ok(self
            .containers
            .borrow()
            .iter()
            .filter(|(name, _)| service.map(|s| s == name.as_str()).unwrap_or(true))
            .map(|(name, c)| ServiceStatus {
                name: name.clone(),
                service: name.clone(),
                state: if c.running { "running" } else { "exited" }.to_owned(),
                status: String::new(),
                health: String::new(),
            })
            .collect())
    }

    fn logs(&self, service: &str, follow: bool, _tail: Option<usize>) -> Result<()> {
        self.record(RuntimeCall::Logs {
            service: service.to_owned(),
            follow,
        })
    }

    fn exec_interactive(&self, service: &str, command: &[String]) -> Result<()> {
        self.record(RuntimeCall::Exec {
            service: service.to_owned(),
            command: command.to_vec(),
        })
    }
}
