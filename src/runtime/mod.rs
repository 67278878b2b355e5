//! Synchronous driver for the external container runtime.
//!
//! Every call blocks until the runtime command exits. Failures are returned
//! as they are, with the runtime's own diagnostic text; nothing is retried.

pub mod compose;
pub mod test;

use std::any::Any;

use serde::Deserialize;

use crate::error::Result;
use crate::limits::LiveLimits;

pub use compose::ComposeCli;
pub use test::TestRuntime;

/// One row of `compose ps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub health: String,
}

/// What the runtime reports about a live container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub running: bool,
    pub limits: LiveLimits,
}

pub trait Runtime {
    fn as_any(&self) -> &dyn Any;
    /// Services the runtime parses out of the descriptor file on disk.
    fn services(&self) -> Result<Vec<String>>;
    /// Creates and starts `service` from the descriptor, recreating it when
    /// its configuration changed or when `force_recreate` is set.
    fn up(&self, service: &str, force_recreate: bool) -> Result<()>;
    fn stop(&self, service: &str) -> Result<()>;
    fn restart(&self, service: &str) -> Result<()>;
    /// Stops and deletes the container of `service`.
    fn remove(&self, service: &str) -> Result<()>;
    /// Deletes a named volume declared in the descriptor.
    fn remove_volume(&self, volume: &str) -> Result<()>;
    fn container_id(&self, service: &str) -> Result<Option<String>>;
    fn inspect(&self, container_id: &str) -> Result<ContainerInfo>;
    fn status(&self, service: Option<&str>) -> Result<Vec<ServiceStatus>>;
    /// Streams logs to the caller's terminal until the runtime exits.
    fn logs(&self, service: &str, follow: bool, tail: Option<usize>) -> Result<()>;
    /// Runs an interactive command inside the container of `service`.
    fn exec_interactive(&self, service: &str, command: &[String]) -> Result<()>;
}
