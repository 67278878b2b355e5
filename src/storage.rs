//! Per-user loopback filesystems.
//!
//! A user with a storage request gets `images/<user>.img`, an ext4 image
//! sized to the request, loop-mounted on `mounts/<user>` and bind mounted
//! into the container's home directory. Images only ever grow.
use std::any::Any;
use std::fmt::{self, Display};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::Settings;
use crate::error::{Result, SshboxError};
use crate::host::{create_host, HostOps};
use crate::ident::Username;
use crate::limits::format_bytes;
use crate::registry::StorageRequest;
use crate::teardown::{StepOutcome, TeardownReport};

/// Where the filesystem for `username` is mounted on the host.
pub fn mount_path(settings: &Settings, username: &Username) -> PathBuf {
    settings.mounts_dir().join(username.as_str())
}

pub fn image_path(settings: &Settings, username: &Username) -> PathBuf {
    settings.images_dir().join(format!("{}.img", username))
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Present while a grow of the image has not completed; holds the size
/// before the grow.
fn grow_marker_path(image: &Path) -> PathBuf {
    sibling_path(image, ".grow")
}

fn read_grow_marker(marker: &Path) -> Result<Option<u64>> {
    match fs::read_to_string(marker) {
        Ok(content) => Ok(Some(content.trim().parse().unwrap_or(0))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("failed to read {:?}", marker))
            .into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOutcome {
    /// No dedicated storage requested.
    Anonymous,
    /// The request could not be used; the user falls back to an anonymous volume.
    Skipped(String),
    Created { bytes: u64 },
    Grown { from: u64, to: u64 },
    Unchanged { bytes: u64 },
}

impl Display for StorageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageOutcome::Anonymous => f.write_str("anonymous volume"),
            StorageOutcome::Skipped(why) => write!(f, "anonymous volume ({})", why),
            StorageOutcome::Created { bytes } => {
                write!(f, "created {}", format_bytes(*bytes as i64))
            }
            StorageOutcome::Grown { from, to } => write!(
                f,
                "grown from {} to {}",
                format_bytes(*from as i64),
                format_bytes(*to as i64)
            ),
            StorageOutcome::Unchanged { bytes } => {
                write!(f, "{} (unchanged)", format_bytes(*bytes as i64))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUsage {
    pub image: PathBuf,
    pub image_bytes: Option<u64>,
    pub mount: PathBuf,
    pub mounted: bool,
}

pub struct Storage {
    host: Box<dyn HostOps>,
    settings: Settings,
}

impl Storage {
    pub fn new(settings: &Settings) -> Self {
        Self::with_host(settings, create_host())
    }

    pub fn with_host(settings: &Settings, host: Box<dyn HostOps>) -> Self {
        Self {
            host,
            settings: settings.clone(),
        }
    }

    pub fn host(&self) -> &dyn Any {
        self.host.as_any()
    }

    pub fn image_path(&self, username: &Username) -> PathBuf {
        image_path(&self.settings, username)
    }

    pub fn mount_path(&self, username: &Username) -> PathBuf {
        mount_path(&self.settings, username)
    }

    /// Makes the user's filesystem exist, be at least the requested size and
    /// be mounted. Safe to call repeatedly.
    pub fn ensure(&self, username: &Username, request: &StorageRequest) -> Result<StorageOutcome> {
        let size = match request {
            StorageRequest::None => return Ok(StorageOutcome::Anonymous),
            StorageRequest::Unparseable(raw) => {
                log::warn!(
                    "cannot parse storage size {:?} for {}, using an anonymous volume",
                    raw,
                    username
                );
                return Ok(StorageOutcome::Skipped(format!("unparseable size {:?}", raw)));
            }
            StorageRequest::Sized(size) => size,
        };
        let bytes = size.bytes();
        if bytes == 0 {
            log::warn!("storage size for {} is zero, using an anonymous volume", username);
            return Ok(StorageOutcome::Skipped("zero size".to_owned()));
        }

        self.ensure_sized(username, bytes)
            .map_err(|err| match err {
                SshboxError::Other(source) => SshboxError::Storage {
                    username: username.to_string(),
                    source,
                },
                other => other,
            })
    }

    fn ensure_sized(&self, username: &Username, bytes: u64) -> Result<StorageOutcome> {
        let image = self.image_path(username);
        let mount = self.mount_path(username);
        let images_dir = self.settings.images_dir();
        fs::create_dir_all(&images_dir)
            .with_context(|| format!("failed to create directory {:?}", images_dir))?;

        let mount_source = self.host.mount_source(&mount)?;

        let outcome = if !image.exists() {
            self.create(&image, bytes)?;
            StorageOutcome::Created { bytes }
        } else {
            let current = fs::metadata(&image)
                .with_context(|| format!("failed to stat image {:?}", image))?
                .len();
            let marker = grow_marker_path(&image);
            let pending = read_grow_marker(&marker)?;
            if current < bytes || pending.is_some() {
                let from = pending.unwrap_or(current);
                let to = bytes.max(current);
                log::info!("growing {:?} from {} to {} bytes", image, from, to);
                self.grow(&image, from, to, mount_source.as_deref())?;
                StorageOutcome::Grown { from, to }
            } else {
                if current > bytes {
                    log::warn!(
                        "{:?} is {} bytes, ignoring request to shrink it to {}",
                        image,
                        current,
                        bytes
                    );
                }
                StorageOutcome::Unchanged { bytes: current }
            }
        };

        fs::create_dir_all(&mount)
            .with_context(|| format!("failed to create mount point {:?}", mount))?;
        if mount_source.is_none() {
            log::debug!("mounting {:?} on {:?}", image, mount);
            self.host.mount_loop(&image, &mount)?;
        }

        Ok(outcome)
    }

    /// Formats a new image under a temporary name and moves it into place,
    /// so a failed mkfs never leaves an unformatted image behind.
    fn create(&self, image: &Path, bytes: u64) -> Result<()> {
        let temp = sibling_path(image, ".tmp");
        log::info!("creating {} byte filesystem image {:?}", bytes, image);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)
            .with_context(|| format!("failed to create image {:?}", temp))?;
        file.set_len(bytes)
            .with_context(|| format!("failed to size image {:?}", temp))?;
        drop(file);

        if let Err(err) = self.host.make_filesystem(&temp) {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
        fs::rename(&temp, image)
            .with_context(|| format!("failed to move {:?} to {:?}", temp, image))?;
        Ok(())
    }

    /// Extends the image to `to` bytes and resizes its filesystem. The grow
    /// marker records `from` until the resize succeeds, so an interrupted
    /// grow is finished by the next call.
    fn grow(&self, image: &Path, from: u64, to: u64, mounted_on: Option<&Path>) -> Result<()> {
        let marker = grow_marker_path(image);
        fs::write(&marker, from.to_string())
            .with_context(|| format!("failed to write {:?}", marker))?;

        let file = OpenOptions::new()
            .write(true)
            .open(image)
            .with_context(|| format!("failed to open image {:?}", image))?;
        file.set_len(to)
            .with_context(|| format!("failed to grow image {:?}", image))?;
        drop(file);

        match mounted_on {
            // ext4 grows online; fsck is only safe on an unmounted image
            Some(device) => {
                self.host.refresh_loop_capacity(device)?;
                self.host.grow_filesystem(device)?;
            }
            None => {
                self.host.check_filesystem(image)?;
                self.host.grow_filesystem(image)?;
            }
        }

        fs::remove_file(&marker).with_context(|| format!("failed to remove {:?}", marker))?;
        Ok(())
    }

    /// Unmounts and deletes the user's filesystem. Every step runs even if
    /// an earlier one failed.
    pub fn teardown(&self, username: &Username) -> TeardownReport {
        let image = self.image_path(username);
        let mount = self.mount_path(username);
        let mut report = TeardownReport::new();

        report.step("unmount storage", || match self.host.mount_source(&mount)? {
            Some(_) => {
                self.host.unmount_lazy(&mount)?;
                Ok(StepOutcome::Done)
            }
            None => Ok(StepOutcome::Skipped("not mounted".to_owned())),
        });

        report.step("remove mount point", || {
            if !mount.exists() {
                return Ok(StepOutcome::Skipped("absent".to_owned()));
            }
            fs::remove_dir(&mount).with_context(|| format!("failed to remove {:?}", mount))?;
            Ok(StepOutcome::Done)
        });

        report.step("delete image", || {
            for leftover in [sibling_path(&image, ".tmp"), grow_marker_path(&image)] {
                if leftover.exists() {
                    fs::remove_file(&leftover)
                        .with_context(|| format!("failed to delete {:?}", leftover))?;
                }
            }
            if !image.exists() {
                return Ok(StepOutcome::Skipped("absent".to_owned()));
            }
            fs::remove_file(&image).with_context(|| format!("failed to delete {:?}", image))?;
            Ok(StepOutcome::Done)
        });

        report
    }

    pub fn usage(&self, username: &Username) -> Result<StorageUsage> {
        let image = self.image_path(username);
        let mount = self.mount_path(username);
        let image_bytes = fs::metadata(&image).ok().map(|m| m.len());
        let mounted = self.host.mount_source(&mount)?.is_some();
        Ok(StorageUsage {
            image,
            image_bytes,
            mount,
            mounted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test::{HostCall, TestHost};
    use crate::ident;
    use crate::quantity::GIB;
    use std::io::{Read, Seek, SeekFrom, Write};

    fn setup() -> (tempfile::TempDir, Storage, Username) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_root(dir.path());
        let storage = Storage::with_host(&settings, Box::new(TestHost::default()));
        (dir, storage, ident::validate("alice").unwrap())
    }

    fn host(storage: &Storage) -> &TestHost {
        storage.host().downcast_ref::<TestHost>().unwrap()
    }

    fn sized(s: &str) -> StorageRequest {
        StorageRequest::parse(s)
    }

    #[test]
    fn test_no_request_is_a_noop() {
        let (_dir, storage, alice) = setup();
        let outcome = storage.ensure(&alice, &StorageRequest::None).unwrap();
        assert_eq!(outcome, StorageOutcome::Anonymous);
        assert!(host(&storage).get_calls().is_empty());
        assert!(!storage.image_path(&alice).exists());
    }

    #[test]
    fn test_unparseable_request_is_skipped() {
        let (_dir, storage, alice) = setup();
        let outcome = storage.ensure(&alice, &sized("5 parsecs")).unwrap();
        assert!(matches!(outcome, StorageOutcome::Skipped(_)));
        assert!(host(&storage).get_calls().is_empty());
    }

    #[test]
    fn test_create_formats_and_mounts() {
        let (_dir, storage, alice) = setup();
        let image = storage.image_path(&alice);
        let mount = storage.mount_path(&alice);

        let outcome = storage.ensure(&alice, &sized("5G")).unwrap();
        assert_eq!(outcome, StorageOutcome::Created { bytes: 5 * GIB });
        assert_eq!(fs::metadata(&image).unwrap().len(), 5 * GIB);
        assert!(mount.is_dir());
        assert_eq!(
            host(&storage).get_calls(),
            vec![
                HostCall::MakeFilesystem(sibling_path(&image, ".tmp")),
                HostCall::MountLoop {
                    image,
                    target: mount
                },
            ]
        );
    }

    fn reopen(dir: &tempfile::TempDir) -> Storage {
        Storage::with_host(
            &Settings::with_root(dir.path()),
            Box::new(TestHost::default()),
        )
    }

    #[test]
    fn test_failed_mkfs_leaves_no_image() {
        let (dir, storage, alice) = setup();
        let image = storage.image_path(&alice);
        host(&storage).fail_on("mkfs");

        assert!(storage.ensure(&alice, &sized("1G")).is_err());
        assert!(!image.exists());
        assert!(!sibling_path(&image, ".tmp").exists());

        let retry = reopen(&dir);
        let outcome = retry.ensure(&alice, &sized("1G")).unwrap();
        assert_eq!(outcome, StorageOutcome::Created { bytes: GIB });
        assert!(host(&retry)
            .get_calls()
            .contains(&HostCall::MakeFilesystem(sibling_path(&image, ".tmp"))));
        assert!(image.exists());
    }

    #[test]
    fn test_failed_grow_is_finished_on_retry() {
        let (dir, storage, alice) = setup();
        let image = storage.image_path(&alice);
        let mount = storage.mount_path(&alice);
        storage.ensure(&alice, &sized("1G")).unwrap();
        host(&storage).unmount_lazy(&mount).unwrap();
        host(&storage).fail_on("fsck");

        assert!(storage.ensure(&alice, &sized("2G")).is_err());
        assert!(grow_marker_path(&image).exists());

        let retry = reopen(&dir);
        let outcome = retry.ensure(&alice, &sized("2G")).unwrap();
        assert_eq!(
            outcome,
            StorageOutcome::Grown {
                from: GIB,
                to: 2 * GIB
            }
        );
        assert_eq!(
            host(&retry).get_calls(),
            vec![
                HostCall::CheckFilesystem(image.clone()),
                HostCall::GrowFilesystem(image.clone()),
                HostCall::MountLoop {
                    image: image.clone(),
                    target: mount
                },
            ]
        );
        assert!(!grow_marker_path(&image).exists());

        host(&retry).clear_calls();
        let outcome = retry.ensure(&alice, &sized("2G")).unwrap();
        assert_eq!(outcome, StorageOutcome::Unchanged { bytes: 2 * GIB });
        assert!(host(&retry).get_calls().is_empty());
    }

    #[test]
    fn test_repeated_ensure_is_idempotent() {
        let (_dir, storage, alice) = setup();
        storage.ensure(&alice, &sized("1G")).unwrap();
        host(&storage).clear_calls();

        let outcome = storage.ensure(&alice, &sized("1G")).unwrap();
        assert_eq!(outcome, StorageOutcome::Unchanged { bytes: GIB });
        assert!(host(&storage).get_calls().is_empty());
    }

    #[test]
    fn test_never_shrinks() {
        let (_dir, storage, alice) = setup();
        storage.ensure(&alice, &sized("5G")).unwrap();
        let outcome = storage.ensure(&alice, &sized("2G")).unwrap();
        assert_eq!(outcome, StorageOutcome::Unchanged { bytes: 5 * GIB });
        assert_eq!(
            fs::metadata(storage.image_path(&alice)).unwrap().len(),
            5 * GIB
        );
    }

    #[test]
    fn test_grow_preserves_data() {
        let (_dir, storage, alice) = setup();
        let image = storage.image_path(&alice);
        let mount = storage.mount_path(&alice);
        storage.ensure(&alice, &sized("5G")).unwrap();

        fs::write(mount.join("notes.txt"), "keep me").unwrap();
        let mut file = OpenOptions::new().write(true).open(&image).unwrap();
        file.write_all(b"superblock").unwrap();
        drop(file);

        // unmounted images are checked before resizing
        host(&storage).unmount_lazy(&mount).unwrap();
        host(&storage).clear_calls();

        let outcome = storage.ensure(&alice, &sized("10G")).unwrap();
        assert_eq!(
            outcome,
            StorageOutcome::Grown {
                from: 5 * GIB,
                to: 10 * GIB
            }
        );
        assert_eq!(fs::metadata(&image).unwrap().len(), 10 * GIB);
        assert_eq!(fs::read_to_string(mount.join("notes.txt")).unwrap(), "keep me");

        let mut head = [0u8; 10];
        let mut file = fs::File::open(&image).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"superblock");

        assert_eq!(
            host(&storage).get_calls(),
            vec![
                HostCall::CheckFilesystem(image.clone()),
                HostCall::GrowFilesystem(image.clone()),
                HostCall::MountLoop {
                    image,
                    target: mount
                },
            ]
        );
    }

    #[test]
    fn test_grow_while_mounted_resizes_online() {
        let (_dir, storage, alice) = setup();
        storage.ensure(&alice, &sized("1G")).unwrap();
        host(&storage).clear_calls();

        storage.ensure(&alice, &sized("2G")).unwrap();
        let loop_dev = PathBuf::from("/dev/loop7");
        assert_eq!(
            host(&storage).get_calls(),
            vec![
                HostCall::RefreshLoopCapacity(loop_dev.clone()),
                HostCall::GrowFilesystem(loop_dev),
            ]
        );
    }

    #[test]
    fn test_teardown_removes_everything() {
        let (_dir, storage, alice) = setup();
        storage.ensure(&alice, &sized("1G")).unwrap();

        fs::write(grow_marker_path(&storage.image_path(&alice)), "0").unwrap();

        let report = storage.teardown(&alice);
        assert!(report.is_clean(), "{}", report);
        assert!(!storage.image_path(&alice).exists());
        assert!(!grow_marker_path(&storage.image_path(&alice)).exists());
        assert!(!storage.mount_path(&alice).exists());
        assert!(!host(&storage).is_mounted(&storage.mount_path(&alice)));
    }

    #[test]
    fn test_teardown_continues_after_failure() {
        let (_dir, storage, alice) = setup();
        storage.ensure(&alice, &sized("1G")).unwrap();
        host(&storage).fail_on("umount");

        let report = storage.teardown(&alice);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.steps().len(), 3);
        assert!(!storage.image_path(&alice).exists());
    }

    #[test]
    fn test_teardown_without_storage_skips() {
        let (_dir, storage, alice) = setup();
        let report = storage.teardown(&alice);
        assert!(report.is_clean());
        assert!(report
            .steps()
            .iter()
            .all(|s| matches!(s.outcome, StepOutcome::Skipped(_))));
    }

    #[test]
    fn test_usage() {
        let (_dir, storage, alice) = setup();
        assert_eq!(storage.usage(&alice).unwrap().image_bytes, None);
        storage.ensure(&alice, &sized("1G")).unwrap();
        let usage = storage.usage(&alice).unwrap();
        assert_eq!(usage.image_bytes, Some(GIB));
        assert!(usage.mounted);
    }
}
