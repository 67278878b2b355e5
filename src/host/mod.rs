//! Contains a wrapper of the host tooling the storage provisioner drives
//! (filesystem creation, checks, resizing and loop mounts) so the rest of
//! sshbox can be exercised in unit tests without root.

pub mod linux;

use std::any::Any;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use linux::LinuxHost;
pub use test::TestHost;

/// Host operations needed to manage loopback-backed user filesystems.
pub trait HostOps {
    fn as_any(&self) -> &dyn Any;
    /// Source device of the mount at `target`, or `None` when nothing is mounted there.
    fn mount_source(&self, target: &Path) -> Result<Option<PathBuf>>;
    fn make_filesystem(&self, image: &Path) -> Result<()>;
    fn check_filesystem(&self, image: &Path) -> Result<()>;
    /// Grows the filesystem on `device` (an image file or a loop device) to fill it.
    fn grow_filesystem(&self, device: &Path) -> Result<()>;
    /// Makes a loop device pick up the new size of its backing file.
    fn refresh_loop_capacity(&self, device: &Path) -> Result<()>;
    fn mount_loop(&self, image: &Path, target: &Path) -> Result<()>;
    fn unmount_lazy(&self, target: &Path) -> Result<()>;
}

pub fn create_host() -> Box<dyn HostOps> {
    if cfg!(test) {
        Box::new(TestHost::default())
    } else {
        Box::new(LinuxHost)
    }
}
