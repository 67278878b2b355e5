//! Default sshbox logger

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

pub static SSHBOX_LOGGER: OnceCell<SshboxLogger> = OnceCell::new();
pub static LOG_FILE: OnceCell<Option<File>> = OnceCell::new();

pub const LOG_LEVEL_ENV: &str = "SSHBOX_LOG_LEVEL";

/// Operators mostly care about warnings: skipped rows, failed teardown steps.
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Warn;

const LOG_FORMAT_TEXT: &str = "text";
const LOG_FORMAT_JSON: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            LOG_FORMAT_TEXT => Ok(LogFormat::Text),
            LOG_FORMAT_JSON => Ok(LogFormat::Json),
            unknown => bail!("unknown log format: {}", unknown),
        }
    }
}

/// Level from `SSHBOX_LOG_LEVEL` if set, else debug when `debug` is set,
/// else the default.
fn detect_level(debug: bool, env_level: Option<String>) -> LevelFilter {
    match env_level {
        Some(level) => LevelFilter::from_str(&level).unwrap_or(DEFAULT_LOG_LEVEL),
        None if debug => LevelFilter::Debug,
        None => DEFAULT_LOG_LEVEL,
    }
}

/// Initialize the logger. Only the first call has any effect.
pub fn init(debug: bool, log_file: Option<PathBuf>, log_format: Option<String>) -> Result<()> {
    let level_filter = detect_level(debug, env::var(LOG_LEVEL_ENV).ok());
    let format = match log_format.as_deref() {
        None => LogFormat::Text,
        Some(format) => format.parse()?,
    };

    let file = match &log_file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {:?}", path))?,
        ),
        None => None,
    };
    if LOG_FILE.set(file).is_err() {
        return Ok(());
    }

    let logger = SSHBOX_LOGGER.get_or_init(|| SshboxLogger::new(level_filter.to_level(), format));
    log::set_logger(logger)
        .map(|()| log::set_max_level(level_filter))
        .context("failed to install logger")?;

    Ok(())
}

pub struct SshboxLogger {
    level: Option<log::Level>,
    format: LogFormat,
}

impl SshboxLogger {
    pub fn new(level: Option<log::Level>, format: LogFormat) -> Self {
        Self { level, format }
    }

    fn format(&self, record: &Record) -> String {
        let now = chrono::Local::now().to_rfc3339();
        match self.format {
            LogFormat::Text => match (record.file(), record.line()) {
                (Some(file), Some(line)) => format!(
                    "[{} {}:{}] {} {}",
                    record.level(),
                    file,
                    line,
                    now,
                    record.args()
                ),
                (_, _) => format!("[{}] {} {}", record.level(), now, record.args()),
            },
            LogFormat::Json => serde_json::json!({
                "level": record.level().to_string(),
                "time": now,
                "target": record.target(),
                "msg": record.args().to_string(),
            })
            .to_string(),
        }
    }
}

impl Log for SshboxLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if let Some(level) = self.level {
            metadata.level() <= level
        } else {
            false
        }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_msg = self.format(record);
            // if log file is set, write to it, else write to stderr
            if let Some(mut log_file) = LOG_FILE.get().and_then(Option::as_ref) {
                let _ = writeln!(log_file, "{}", log_msg);
            } else {
                let _ = writeln!(stderr(), "{}", log_msg);
            }
        }
    }

    fn flush(&self) {
        if let Some(mut log_file) = LOG_FILE.get().and_then(Option::as_ref) {
            let _ = log_file.flush();
        } else {
            let _ = stderr().flush();
        }
    }
}
