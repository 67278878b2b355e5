//! Utility functionality

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};

use crate::error::SshboxError;

/// Human readable form of a command line, for logs and error messages.
pub fn display_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Runs `cmd` to completion with captured output. A non-zero exit status
/// becomes [`SshboxError::Runtime`] carrying the command's stderr.
pub fn run_captured(cmd: &mut Command) -> Result<Output, SshboxError> {
    let command = display_command(cmd);
    log::debug!("running {}", command);
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|err| SshboxError::Runtime {
            command: command.clone(),
            stderr: err.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let stderr = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        return Err(SshboxError::Runtime { command, stderr });
    }

    Ok(output)
}

/// Runs `cmd` attached to the caller's terminal, blocking until it exits.
pub fn run_attached(cmd: &mut Command) -> Result<(), SshboxError> {
    let command = display_command(cmd);
    log::debug!("running attached {}", command);
    let status = cmd.status().map_err(|err| SshboxError::Runtime {
        command: command.clone(),
        stderr: err.to_string(),
    })?;

    if !status.success() {
        return Err(SshboxError::Runtime {
            command,
            stderr: format!("exited with {}", status),
        });
    }
    Ok(())
}

/// Writes `contents` to a sibling temporary file and renames it over `path`.
pub fn write_atomic<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {:?}", parent))?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);
    {
        let mut file =
            File::create(temp_path).with_context(|| format!("failed to create {:?}", temp_path))?;
        file.write_all(contents.as_ref())
            .with_context(|| format!("failed to write {:?}", temp_path))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {:?}", temp_path))?;
    }
    fs::rename(temp_path, path).with_context(|| format!("failed to replace {:?}", path))
}
