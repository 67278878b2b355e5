//! Typed quantities parsed from the loosely formatted text users type and
//! the registry stores: ports, CPU counts and byte sizes.
use std::fmt::{self, Display};
use std::str::FromStr;

pub const KIB: u64 = 1024;
pub const MIB: u64 = KIB * 1024;
pub const GIB: u64 = MIB * 1024;
pub const TIB: u64 = GIB * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("value is empty")]
    Empty,
    #[error("{0:?} is not a non-negative number")]
    InvalidNumber(String),
    #[error("unknown unit {0:?}, expected one of b, k, m, g, t")]
    UnknownUnit(String),
    #[error("{0} does not fit in 64 bits")]
    Overflow(String),
}

/// A published port. `0` means the port is not published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Port(u16);

impl Port {
    pub const UNPUBLISHED: Port = Port(0);

    pub fn new(port: u16) -> Self {
        Port(port)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn is_published(self) -> bool {
        self.0 != 0
    }
}

impl FromStr for Port {
    type Err = std::num::ParseIntError;

    /// An empty string is the unpublished port.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Port::UNPUBLISHED);
        }
        s.parse::<u16>().map(Port)
    }
}

impl Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decimal number of CPU cores, e.g. `1.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuCount {
    cores: f64,
    original: String,
}

impl CpuCount {
    pub fn cores(&self) -> f64 {
        self.cores
    }

    /// Runtime representation in billionths of a CPU.
    pub fn nano_cpus(&self) -> i64 {
        (self.cores * 1e9).round() as i64
    }
}

impl FromStr for CpuCount {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let cores = parse_decimal(s)?;
        Ok(CpuCount {
            cores,
            original: s.to_owned(),
        })
    }
}

impl Display for CpuCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// A size in bytes together with the text it was parsed from, so the
/// registry can be written back exactly as the user entered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteSize {
    bytes: u64,
    original: String,
}

impl ByteSize {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn original(&self) -> &str {
        &self.original
    }
}

impl FromStr for ByteSize {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let value = parse_decimal(number)?;
        let multiplier = unit_multiplier(unit.trim())?;

        let bytes = (value * multiplier as f64).round();
        if bytes >= u64::MAX as f64 {
            return Err(QuantityError::Overflow(s.to_owned()));
        }

        Ok(ByteSize {
            bytes: bytes as u64,
            original: s.to_owned(),
        })
    }
}

impl Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

fn parse_decimal(number: &str) -> Result<f64, QuantityError> {
    let well_formed = !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.chars().filter(|c| *c == '.').count() <= 1
        && number.chars().any(|c| c.is_ascii_digit());
    if !well_formed {
        return Err(QuantityError::InvalidNumber(number.to_owned()));
    }
    number
        .parse::<f64>()
        .map_err(|_| QuantityError::InvalidNumber(number.to_owned()))
}

// Units are binary multiples, which is how the container runtime reads them.
fn unit_multiplier(unit: &str) -> Result<u64, QuantityError> {
    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        "t" | "tb" | "tib" => TIB,
        _ => return Err(QuantityError::UnknownUnit(unit.to_owned())),
    };
    Ok(multiplier)
}
