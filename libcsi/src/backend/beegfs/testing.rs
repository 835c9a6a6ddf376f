//! In-memory BeeGFS cluster for unit tests.
//!
//! [`FakeCluster`] plays both the administration tool and the mount table.
//! Directories created through `beegfs-ctl` live in a map of remote paths;
//! mounting copies them below the mount point in a [`MemFs`] and unmounting
//! copies deletions and mode changes back.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::ctl::CtlExecutor;
use super::params::{PermissionsConfig, StripePatternConfig};
use super::volume::BeegfsVolume;
use crate::error::CsiError;
use crate::fs::{Filesystem, MemFs};
use crate::mount::{MountEntry, Mounter};

pub const TEMPLATE_PATH: &str = "/etc/beegfs/beegfs-client.conf";

pub const TEMPLATE: &str = "\
# BeeGFS client configuration template
sysMgmtdHost                  =
connClientPortUDP             = 8004
connMgmtdPortTCP              = 8008
connUseRDMA                   = true
connInterfacesFile            =
connNetFilterFile             =
connTcpOnlyFilterFile         =
connAuthFile                  =
";

/// A directory on the fake BeeGFS file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDir {
    pub mode: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub pattern: StripePatternConfig,
}

impl RemoteDir {
    fn with_mode(mode: u32) -> Self {
        Self {
            mode,
            uid: None,
            gid: None,
            pattern: StripePatternConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    remote: BTreeMap<String, RemoteDir>,
    mounts: Vec<MountEntry>,
    mount_calls: usize,
}

#[derive(Debug)]
pub struct FakeCluster {
    fs: Arc<MemFs>,
    state: Mutex<State>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    /// A cluster with an empty file system and a client template in place.
    pub fn new() -> Self {
        let fs = MemFs::new();
        fs.insert_file(Path::new(TEMPLATE_PATH), TEMPLATE.as_bytes(), 0o644);
        Self {
            fs: Arc::new(fs),
            state: Mutex::default(),
        }
    }

    pub fn fs(&self) -> Arc<MemFs> {
        Arc::clone(&self.fs)
    }

    pub fn mount_calls(&self) -> usize {
        self.lock().mount_calls
    }

    pub fn add_mount(&self, entry: MountEntry) {
        self.lock().mounts.push(entry);
    }

    pub fn add_remote_dir(&self, path: &str, mode: u32) {
        self.lock()
            .remote
            .insert(path.to_owned(), RemoteDir::with_mode(mode));
    }

    pub fn remote_dir(&self, path: &str) -> Option<RemoteDir> {
        self.lock().remote.get(path).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn require_client_conf(&self, vol: &BeegfsVolume) -> Result<(), CsiError> {
        if self.fs.is_file(&vol.client_conf_path) {
            Ok(())
        } else {
            Err(CsiError::BackendError(format!(
                "cfgFile {} does not exist",
                vol.client_conf_path.display()
            )))
        }
    }
}

#[async_trait]
impl CtlExecutor for FakeCluster {
    async fn create_directory_for_volume(
        &self,
        vol: &BeegfsVolume,
        permissions: &PermissionsConfig,
    ) -> Result<(), CsiError> {
        self.require_client_conf(vol)?;
        let mut state = self.lock();
        for parent in Path::new(&vol.vol_dir_path_beegfs_root)
            .ancestors()
            .skip(1)
            .filter(|p| p.parent().is_some())
        {
            state
                .remote
                .entry(parent.to_string_lossy().into_owned())
                .or_insert_with(|| RemoteDir::with_mode(0o755));
        }
        state
            .remote
            .entry(vol.vol_dir_path_beegfs_root.clone())
            .or_insert_with(|| RemoteDir {
                mode: u32::from(permissions.mode & 0o777),
                uid: permissions.uid,
                gid: permissions.gid,
                pattern: StripePatternConfig::default(),
            });
        Ok(())
    }

    async fn set_pattern_for_volume(
        &self,
        vol: &BeegfsVolume,
        pattern: &StripePatternConfig,
    ) -> Result<(), CsiError> {
        self.require_client_conf(vol)?;
        if pattern.is_empty() {
            return Ok(());
        }
        match self.lock().remote.get_mut(&vol.vol_dir_path_beegfs_root) {
            Some(dir) => {
                dir.pattern = pattern.clone();
                Ok(())
            }
            None => Err(CsiError::VolumeNotFound(vol.volume_id.to_string())),
        }
    }

    async fn stat_directory_for_volume(&self, vol: &BeegfsVolume) -> Result<String, CsiError> {
        self.require_client_conf(vol)?;
        if self.lock().remote.contains_key(&vol.vol_dir_path_beegfs_root) {
            Ok(format!(
                "Entry type: directory\nPath: {}\n",
                vol.vol_dir_path_beegfs_root
            ))
        } else {
            Err(CsiError::VolumeNotFound(vol.volume_id.to_string()))
        }
    }
}

#[async_trait]
impl Mounter for FakeCluster {
    async fn list(&self) -> Result<Vec<MountEntry>, CsiError> {
        Ok(self.lock().mounts.clone())
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        if !self.fs.is_dir(target) {
            return Err(CsiError::MountFailed {
                path: target.display().to_string(),
                reason: "mount point does not exist".to_owned(),
            });
        }
        let remote: Vec<(String, u32)> = {
            let mut state = self.lock();
            state.mount_calls += 1;
            state.mounts.push(MountEntry {
                device: source.to_owned(),
                path: target.to_path_buf(),
                fs_type: fs_type.to_owned(),
                opts: options.to_vec(),
            });
            state
                .remote
                .iter()
                .map(|(path, dir)| (path.clone(), dir.mode))
                .collect()
        };
        for (path, mode) in remote {
            let local = target.join(path.trim_start_matches('/'));
            self.fs
                .create_dir_all(&local)
                .await
                .map_err(CsiError::internal)?;
            self.fs
                .set_mode(&local, mode)
                .await
                .map_err(CsiError::internal)?;
        }
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), CsiError> {
        let was_mounted = {
            let mut state = self.lock();
            let before = state.mounts.len();
            state.mounts.retain(|m| m.path != target);
            state.mounts.len() != before
        };
        if !was_mounted {
            return Ok(());
        }

        {
            let mut state = self.lock();
            let fs = &self.fs;
            state.remote.retain(|path, _| {
                fs.is_dir(&target.join(path.trim_start_matches('/')))
            });
            for (path, dir) in state.remote.iter_mut() {
                if let Some(mode) = fs.mode(&target.join(path.trim_start_matches('/'))) {
                    dir.mode = mode;
                }
            }
        }

        for child in self
            .fs
            .read_dir(target)
            .await
            .map_err(CsiError::internal)?
        {
            self.fs
                .remove_all(&child)
                .await
                .map_err(CsiError::internal)?;
        }
        Ok(())
    }
}
