//! Translation between configured CPU/memory quantities and the limits the
//! container runtime applies and reports.
use serde::Deserialize;

use crate::quantity::{ByteSize, CpuCount, GIB, KIB, MIB, TIB};

pub const UNLIMITED: &str = "unlimited";

/// Limit clauses for one service. A `None` field means the clause is not
/// emitted at all; `Some(0)` is an explicit zero and is emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitClauses {
    pub cpus: Option<f64>,
    pub mem_limit: Option<u64>,
    pub mem_reservation: Option<u64>,
}

impl LimitClauses {
    pub fn new(cpus: Option<&CpuCount>, memory: Option<&ByteSize>) -> Self {
        Self {
            cpus: cpus.map(CpuCount::cores),
            mem_limit: memory.map(ByteSize::bytes),
            // no soft limit is modelled, the reservation mirrors the hard limit
            mem_reservation: memory.map(ByteSize::bytes),
        }
    }
}

/// The subset of `HostConfig` the runtime reports for a live container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LiveLimits {
    #[serde(default)]
    pub nano_cpus: i64,
    #[serde(default)]
    pub cpu_quota: i64,
    #[serde(default)]
    pub cpu_period: i64,
    #[serde(default)]
    pub memory: i64,
}

impl LiveLimits {
    /// CPU allocation in cores, from either the nano-CPU count or the
    /// quota/period pair. `None` when neither carries a positive value.
    pub fn cpus(&self) -> Option<f64> {
        if self.nano_cpus > 0 {
            return Some(self.nano_cpus as f64 / 1e9);
        }
        if self.cpu_quota > 0 && self.cpu_period > 0 {
            return Some(self.cpu_quota as f64 / self.cpu_period as f64);
        }
        None
    }

    pub fn cpus_display(&self) -> String {
        format_cpus(self.cpus())
    }

    pub fn memory_display(&self) -> String {
        format_bytes(self.memory)
    }
}

pub fn format_cpus(cpus: Option<f64>) -> String {
    match cpus {
        Some(cores) => format!("{:.3}", cores),
        None => UNLIMITED.to_owned(),
    }
}

/// Renders a byte count in the largest unit for which it is at least 1.
pub fn format_bytes(bytes: i64) -> String {
    if bytes <= 0 {
        return UNLIMITED.to_owned();
    }

    let bytes = bytes as u64;
    let (divisor, unit) = [(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")]
        .into_iter()
        .find(|(divisor, _)| bytes >= *divisor)
        .unwrap_or((1, "B"));

    format!("{:.2} {}", bytes as f64 / divisor as f64, unit)
}
