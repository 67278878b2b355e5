//! The user registry: one comma separated row per user.
//!
//! ```text
//! user,ssh_port,web_port,password,cpus,memory,storage
//! alice,2222,8001,secret,1,512m,
//! ```
//!
//! Every mutation holds an exclusive advisory lock on `<registry>.lock` for
//! the whole read-modify-write window and replaces the file by renaming a
//! fully written temporary file over it.
use std::fmt::{self, Display};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Lines, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::fcntl::{flock, FlockArg};

use crate::error::ValidationError;
use crate::ident::{self, Username};
use crate::quantity::{ByteSize, CpuCount, Port};

pub const HEADER: &str = "user,ssh_port,web_port,password,cpus,memory,storage";
const COLUMNS: usize = 7;

/// Dedicated storage requested for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRequest {
    /// Runtime managed anonymous volume.
    None,
    Sized(ByteSize),
    /// Kept verbatim so the row round-trips, treated like `None` downstream.
    Unparseable(String),
}

impl StorageRequest {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return StorageRequest::None;
        }
        match s.parse::<ByteSize>() {
            Ok(size) => StorageRequest::Sized(size),
            Err(_) => StorageRequest::Unparseable(s.to_owned()),
        }
    }

    pub fn size(&self) -> Option<&ByteSize> {
        match self {
            StorageRequest::Sized(size) => Some(size),
            _ => None,
        }
    }

    /// Whether the user gets a provisioned filesystem instead of a volume.
    pub fn is_dedicated(&self) -> bool {
        self.size().map(|s| s.bytes() > 0).unwrap_or(false)
    }
}

impl Display for StorageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageRequest::None => Ok(()),
            StorageRequest::Sized(size) => write!(f, "{}", size),
            StorageRequest::Unparseable(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub username: Username,
    pub ssh_port: Port,
    pub web_port: Port,
    pub password: String,
    pub cpus: Option<CpuCount>,
    pub memory: Option<ByteSize>,
    pub storage: StorageRequest,
}

impl UserRecord {
    /// Builds a record from raw text fields, rejecting anything malformed.
    pub fn parse_fields(fields: &[&str]) -> Result<Self, ValidationError> {
        let field = |i: usize| fields.get(i).map(|f| f.trim()).unwrap_or("");

        let name = field(0);
        let username = ident::validate(name).map_err(|source| ValidationError::Username {
            name: name.to_owned(),
            source,
        })?;
        let ssh_port = parse_port("ssh", field(1))?;
        let web_port = parse_port("web", field(2))?;
        let password = field(3).to_owned();
        validate_password(&password)?;
        let cpus = parse_optional("cpus", field(4))?;
        let memory = parse_optional("memory", field(5))?;
        let storage = StorageRequest::parse(field(6));

        Ok(UserRecord {
            username,
            ssh_port,
            web_port,
            password,
            cpus,
            memory,
            storage,
        })
    }

    pub fn to_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.username,
            self.ssh_port,
            self.web_port,
            self.password,
            self.cpus.as_ref().map(|c| c.to_string()).unwrap_or_default(),
            self.memory.as_ref().map(|m| m.to_string()).unwrap_or_default(),
            self.storage,
        )
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.contains(|c: char| matches!(c, ',' | '\n' | '\r')) {
        return Err(ValidationError::Password);
    }
    Ok(())
}

fn parse_port(field: &'static str, value: &str) -> Result<Port, ValidationError> {
    value.parse::<Port>().map_err(|_| ValidationError::Port {
        field,
        value: value.to_owned(),
    })
}

fn parse_optional<T>(field: &'static str, value: &str) -> Result<Option<T>, ValidationError>
where
    T: std::str::FromStr<Err = crate::quantity::QuantityError>,
{
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<T>()
        .map(Some)
        .map_err(|source| ValidationError::Quantity {
            field,
            value: value.to_owned(),
            source,
        })
}

/// A data row that could not be turned into a [`UserRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub text: String,
    pub reason: String,
}

impl Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line, self.reason, self.text)
    }
}

enum Line<'a> {
    Skip,
    Header,
    Data(&'a str),
}

fn classify(line: &str, seen_data: bool) -> Line<'_> {
    let line = line.trim_matches(|c: char| c.is_whitespace() || c == '\r');
    if line.is_empty() || line.starts_with('#') {
        return Line::Skip;
    }
    if !seen_data && line.split(',').next().map(str::trim) == Some("user") {
        return Line::Header;
    }
    Line::Data(line)
}

fn row_key(row: &str) -> &str {
    row.split(',').next().unwrap_or("").trim()
}

struct RegistryLock {
    file: File,
}

impl RegistryLock {
    fn acquire(path: &Path, arg: FlockArg) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open lock file {:?}", path))?;
        Self::lock(file, path, arg)
    }

    /// Shared lock for readers. Never creates the lock file: without one no
    /// writer has run, and writers replace the registry by rename anyway.
    fn acquire_shared(path: &Path) -> Result<Option<Self>> {
        match File::open(path) {
            Ok(file) => Self::lock(file, path, FlockArg::LockShared).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to open lock file {:?}", path)),
        }
    }

    fn lock(file: File, path: &Path, arg: FlockArg) -> Result<Self> {
        flock(file.as_raw_fd(), arg).with_context(|| format!("failed to lock {:?}", path))?;
        Ok(Self { file })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}

/// Lazily parsed registry rows. Holds a shared lock until dropped.
pub struct Scan {
    lines: Lines<BufReader<File>>,
    line_no: usize,
    seen_data: bool,
    _lock: Option<RegistryLock>,
}

impl Iterator for Scan {
    type Item = Result<UserRecord, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.lines.next()?;
            self.line_no += 1;
            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => {
                    return Some(Err(RowError {
                        line: self.line_no,
                        text: String::new(),
                        reason: format!("read error: {}", err),
                    }))
                }
            };

            match classify(&raw, self.seen_data) {
                Line::Skip => continue,
                Line::Header => {
                    self.seen_data = true;
                    continue;
                }
                Line::Data(row) => {
                    self.seen_data = true;
                    let fields: Vec<&str> = row.split(',').collect();
                    if fields.len() > COLUMNS {
                        return Some(Err(RowError {
                            line: self.line_no,
                            text: row.to_owned(),
                            reason: format!(
                                "expected at most {} columns, found {}",
                                COLUMNS,
                                fields.len()
                            ),
                        }));
                    }
                    return Some(UserRecord::parse_fields(&fields).map_err(|err| RowError {
                        line: self.line_no,
                        text: row.to_owned(),
                        reason: err.to_string(),
                    }));
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Creates the registry with a header row if it does not exist yet.
    pub fn ensure_exists(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {:?}", parent))?;
            }
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                log::debug!("creating registry {:?}", self.path);
                writeln!(file, "{}", HEADER)
                    .with_context(|| format!("failed to write header to {:?}", self.path))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to create registry {:?}", self.path))
            }
        }
    }

    pub fn scan(&self) -> Result<Scan> {
        self.ensure_exists()?;
        let lock = RegistryLock::acquire_shared(&self.lock_path())?;
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open registry {:?}", self.path))?;
        Ok(Scan {
            lines: BufReader::new(file).lines(),
            line_no: 0,
            seen_data: false,
            _lock: lock,
        })
    }

    /// All valid records. Malformed rows are logged and skipped.
    pub fn records(&self) -> Result<Vec<UserRecord>> {
        let mut records = Vec::new();
        for entry in self.scan()? {
            match entry {
                Ok(record) => records.push(record),
                Err(err) => log::warn!("skipping registry row in {:?}: {}", self.path, err),
            }
        }
        Ok(records)
    }

    pub fn get(&self, username: &Username) -> Result<Option<UserRecord>> {
        Ok(self
            .scan()?
            .filter_map(|entry| entry.ok())
            .find(|record| &record.username == username))
    }

    /// Raw registry text, for diagnostics.
    pub fn read_raw(&self) -> Result<String> {
        self.ensure_exists()?;
        fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read registry {:?}", self.path))
    }

    /// Replaces any row for `record.username` with `record`.
    pub fn upsert(&self, record: &UserRecord) -> Result<()> {
        let row = record.to_row();
        log::debug!("upserting {} into {:?}", record.username, self.path);
        self.rewrite(|lines| {
            remove_rows(lines, record.username.as_str());
            lines.push(row);
        })?;
        Ok(())
    }

    /// Removes the row for `username`. Returns whether a row was removed.
    pub fn delete(&self, username: &Username) -> Result<bool> {
        let mut removed = false;
        self.rewrite(|lines| removed = remove_rows(lines, username.as_str()))?;
        log::debug!("deleted {} from {:?}: {}", username, self.path, removed);
        Ok(removed)
    }

    fn rewrite<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<String>),
    {
        self.ensure_exists()?;
        let _lock = RegistryLock::acquire(&self.lock_path(), FlockArg::LockExclusive)?;

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read registry {:?}", self.path))?;
        let mut lines: Vec<String> = content
            .lines()
            .map(|l| l.trim_end_matches('\r').to_owned())
            .collect();
        if lines.iter().all(|l| l.trim().is_empty()) {
            lines = vec![HEADER.to_owned()];
        }
        ensure_header(&mut lines);

        edit(&mut lines);

        let mut output = lines.join("\n");
        output.push('\n');

        let temp_path = self.temp_path();
        {
            let mut temp = File::create(&temp_path)
                .with_context(|| format!("failed to create {:?}", temp_path))?;
            temp.write_all(output.as_bytes())
                .with_context(|| format!("failed to write {:?}", temp_path))?;
            temp.sync_all()
                .with_context(|| format!("failed to sync {:?}", temp_path))?;
        }
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("failed to replace {:?}", self.path))?;
        Ok(())
    }
}

/// Puts the header ahead of the first row, so a user named like the header's
/// first column is never taken for it.
fn ensure_header(lines: &mut Vec<String>) {
    let first = lines
        .iter()
        .position(|line| !matches!(classify(line, false), Line::Skip));
    match first {
        Some(index) => {
            if let Line::Data(_) = classify(&lines[index], false) {
                lines.insert(index, HEADER.to_owned());
            }
        }
        None => lines.push(HEADER.to_owned()),
    }
}

fn remove_rows(lines: &mut Vec<String>, username: &str) -> bool {
    let before = lines.len();
    let mut seen_data = false;
    lines.retain(|line| match classify(line, seen_data) {
        Line::Skip => true,
        Line::Header => {
            seen_data = true;
            true
        }
        Line::Data(row) => {
            seen_data = true;
            row_key(row) != username
        }
    });
    lines.len() != before
}
