//! Implements HostOps with the standard e2fsprogs and util-linux tools.
use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use procfs::process::Process;

use super::HostOps;
use crate::error::{Result, SshboxError};
use crate::utils::{display_command, run_captured};

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxHost;

impl HostOps for LinuxHost {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mount_source(&self, target: &Path) -> Result<Option<PathBuf>> {
        // mountinfo lists canonical paths
        let target = match fs::canonicalize(target) {
            Ok(target) => target,
            Err(_) => return Ok(None),
        };
        let mount_infos = Process::myself()
            .and_then(|p| p.mountinfo())
            .map_err(|err| anyhow::anyhow!("failed to read mountinfo: {}", err))?;

        Ok(mount_infos
            .into_iter()
            .rev()
            .find(|info| info.mount_point == target)
            .map(|info| PathBuf::from(info.mount_source.unwrap_or_default())))
    }

    fn make_filesystem(&self, image: &Path) -> Result<()> {
        run_captured(Command::new("mkfs.ext4").arg("-F").arg("-q").arg(image))?;
        Ok(())
    }

    fn check_filesystem(&self, image: &Path) -> Result<()> {
        let mut cmd = Command::new("e2fsck");
        cmd.arg("-f").arg("-y").arg(image);
        let command = display_command(&cmd);
        log::debug!("running {}", command);
        let output = cmd.output().map_err(|err| SshboxError::Runtime {
            command: command.clone(),
            stderr: err.to_string(),
        })?;

        // exit status 1 means errors were found and corrected
        match output.status.code() {
            Some(0) => Ok(()),
            Some(1) => {
                log::warn!("e2fsck corrected errors on {:?}", image);
                Ok(())
            }
            _ => Err(SshboxError::Runtime {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }),
        }
    }

    fn grow_filesystem(&self, device: &Path) -> Result<()> {
        run_captured(Command::new("resize2fs").arg(device))?;
        Ok(())
    }

    fn refresh_loop_capacity(&self, device: &Path) -> Result<()> {
        run_captured(Command::new("losetup").arg("--set-capacity").arg(device))?;
        Ok(())
    }

    fn mount_loop(&self, image: &Path, target: &Path) -> Result<()> {
        run_captured(Command::new("mount").args(["-o", "loop"]).arg(image).arg(target))?;
        Ok(())
    }

    fn unmount_lazy(&self, target: &Path) -> Result<()> {
        run_captured(Command::new("umount").arg("-l").arg(target))?;
        Ok(())
    }
}
