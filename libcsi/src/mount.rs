//! Mount table access and mount / unmount primitives.
//!
//! [`Mounter`] abstracts the host's mount table so that orchestration code can
//! be exercised against a fake in tests.  [`LinuxMounter`] is the production
//! implementation: it reads `/proc/self/mounts` and calls `mount(2)` /
//! `umount(2)` through `nix`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::mount::MsFlags;
use tracing::debug;

use crate::error::CsiError;

/// One line of the system mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Source device (e.g. `beegfs_nodev`).
    pub device: String,
    /// Mount point.
    pub path: PathBuf,
    /// File system type.
    pub fs_type: String,
    /// Mount options, split on commas.
    pub opts: Vec<String>,
}

/// Mount table and mount primitives.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Return every entry of the current mount table.
    async fn list(&self) -> Result<Vec<MountEntry>, CsiError>;

    /// Whether `path` is currently a mount point.
    async fn is_mount_point(&self, path: &Path) -> Result<bool, CsiError> {
        Ok(self.list().await?.iter().any(|entry| entry.path == path))
    }

    /// Mount `source` of type `fs_type` at `target` with the given options.
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError>;

    /// Unmount `target`.  Unmounting a path that is not mounted succeeds.
    async fn unmount(&self, target: &Path) -> Result<(), CsiError>;
}

/// Undo the octal escaping `/proc/self/mounts` applies to whitespace and
/// backslashes (`\040` for space, `\011` for tab, ...).
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = (bytes[i] == b'\\' && i + 3 < bytes.len())
            .then(|| &bytes[i + 1..i + 4])
            .filter(|digits| digits.iter().all(|b| (b'0'..=b'7').contains(b)))
            .map(|d| {
                u32::from(d[0] - b'0') * 64 + u32::from(d[1] - b'0') * 8 + u32::from(d[2] - b'0')
            })
            .and_then(|value| u8::try_from(value).ok());
        if let Some(value) = octal {
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse the contents of `/proc/self/mounts` (or `/proc/mounts`).
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`.
/// Malformed lines are skipped.
pub fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let path = fields.next()?;
            let fs_type = fields.next()?;
            let opts = fields.next()?;
            Some(MountEntry {
                device: unescape_mount_field(device),
                path: PathBuf::from(unescape_mount_field(path)),
                fs_type: unescape_mount_field(fs_type),
                opts: opts.split(',').map(unescape_mount_field).collect(),
            })
        })
        .collect()
}

/// [`Mounter`] for Linux hosts.
#[derive(Debug, Clone)]
pub struct LinuxMounter {
    mount_table: PathBuf,
}

impl Default for LinuxMounter {
    fn default() -> Self {
        Self {
            mount_table: PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl LinuxMounter {
    /// Create a mounter reading the calling process's mount table.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Split generic mount options into kernel flags and the file-system specific
/// data string passed to `mount(2)`.
fn split_mount_options(options: &[String]) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for opt in options {
        match opt.as_str() {
            "rw" | "defaults" => {}
            "ro" => flags |= MsFlags::MS_RDONLY,
            "relatime" => flags |= MsFlags::MS_RELATIME,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            "nodiratime" => flags |= MsFlags::MS_NODIRATIME,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            other => data.push(other),
        }
    }
    (flags, data.join(","))
}

#[async_trait]
impl Mounter for LinuxMounter {
    async fn list(&self) -> Result<Vec<MountEntry>, CsiError> {
        let contents = tokio::fs::read_to_string(&self.mount_table)
            .await
            .map_err(|e| {
                CsiError::Internal(format!("read {}: {e}", self.mount_table.display()))
            })?;
        Ok(parse_mount_table(&contents))
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        let (flags, data) = split_mount_options(options);
        debug!(source, target = %target.display(), fs_type, ?flags, "mounting");
        nix::mount::mount(
            Some(source),
            target,
            Some(fs_type),
            flags,
            (!data.is_empty()).then_some(data.as_str()),
        )
        .map_err(|e| CsiError::MountFailed {
            path: target.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn unmount(&self, target: &Path) -> Result<(), CsiError> {
        match nix::mount::umount(target) {
            Ok(()) => Ok(()),
            // EINVAL: not a mount point, ENOENT: mount point is gone.
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => {
                debug!(target = %target.display(), "not mounted, nothing to unmount");
                Ok(())
            }
            Err(e) => Err(CsiError::UnmountFailed {
                path: target.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
