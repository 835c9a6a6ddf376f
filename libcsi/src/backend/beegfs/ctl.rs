//! `beegfs-ctl` administration tool.
//!
//! The controller never mounts a file system just to create or inspect a
//! directory.  It runs `beegfs-ctl` against the volume's generated
//! `beegfs-client.conf` in unmounted mode instead, which also gives access to
//! striping settings a plain mount cannot express.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::params::{PermissionsConfig, StripePatternConfig};
use super::volume::BeegfsVolume;
use crate::error::CsiError;

/// Default location of the administration tool.
pub const DEFAULT_CTL_PATH: &str = "beegfs-ctl";

const ENTRY_EXISTS: &str = "entry exists already";
const PATH_NOT_FOUND: &str = "does not exist";

/// Directory operations on a BeeGFS file system.
#[async_trait]
pub trait CtlExecutor: Send + Sync {
    /// Create the volume directory (and every missing parent) with the given
    /// ownership and the lower 9 bits of the mode.  An existing directory is
    /// not an error.
    async fn create_directory_for_volume(
        &self,
        vol: &BeegfsVolume,
        permissions: &PermissionsConfig,
    ) -> Result<(), CsiError>;

    /// Apply `pattern` to the volume directory.  Does nothing when the
    /// pattern is empty.
    async fn set_pattern_for_volume(
        &self,
        vol: &BeegfsVolume,
        pattern: &StripePatternConfig,
    ) -> Result<(), CsiError>;

    /// Return the entry info of the volume directory, or
    /// [`CsiError::VolumeNotFound`] if it does not exist.
    async fn stat_directory_for_volume(&self, vol: &BeegfsVolume) -> Result<String, CsiError>;
}

/// Failure of a single `beegfs-ctl` invocation.
#[derive(Debug)]
enum CtlFailure {
    EntryExists,
    NotFound,
    Other(String),
}

/// [`CtlExecutor`] that shells out to `beegfs-ctl`.
#[derive(Debug, Clone)]
pub struct BeegfsCtl {
    program: PathBuf,
    /// Arguments placed before the generated ones, for wrappers such as
    /// `chroot /host beegfs-ctl`.
    prefix: Vec<String>,
}

impl Default for BeegfsCtl {
    fn default() -> Self {
        Self::new(DEFAULT_CTL_PATH)
    }
}

impl BeegfsCtl {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix: Vec::new(),
        }
    }

    /// Run `program prefix... <beegfs-ctl arguments>`.
    pub fn wrapped(program: impl Into<PathBuf>, prefix: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix,
        }
    }

    async fn run(&self, client_conf: &Path, args: &[String]) -> Result<String, CtlFailure> {
        let mut full_args = self.prefix.clone();
        full_args.push(format!("--cfgFile={}", client_conf.display()));
        full_args.push("--unmounted".to_owned());
        full_args.extend_from_slice(args);
        debug!(program = %self.program.display(), args = ?full_args, "executing beegfs-ctl");

        let output = tokio::process::Command::new(&self.program)
            .args(&full_args)
            .output()
            .await
            .map_err(|e| {
                CtlFailure::Other(format!("failed to run {}: {e}", self.program.display()))
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let combined = format!("{stdout}{stderr}");
        let lower = combined.to_lowercase();
        if lower.contains(ENTRY_EXISTS) {
            Err(CtlFailure::EntryExists)
        } else if lower.contains(PATH_NOT_FOUND) {
            Err(CtlFailure::NotFound)
        } else {
            Err(CtlFailure::Other(format!(
                "beegfs-ctl failed with {}: {}",
                output.status,
                combined.trim()
            )))
        }
    }

    async fn create_dir(
        &self,
        vol: &BeegfsVolume,
        path: &str,
        permissions: Option<&PermissionsConfig>,
    ) -> Result<(), CsiError> {
        let mut args = vec!["--createdir".to_owned(), "--nomirror".to_owned()];
        if let Some(p) = permissions {
            args.push(format!("--access={:04o}", p.mode & 0o777));
            if let Some(uid) = p.uid {
                args.push(format!("--uid={uid}"));
            }
            if let Some(gid) = p.gid {
                args.push(format!("--gid={gid}"));
            }
        }
        args.push(path.to_owned());

        match self.run(&vol.client_conf_path, &args).await {
            Ok(_) => Ok(()),
            Err(CtlFailure::EntryExists) => {
                debug!(path, volume_id = %vol.volume_id, "directory exists already");
                Ok(())
            }
            Err(CtlFailure::NotFound) => Err(CsiError::BackendError(format!(
                "parent of {path} does not exist"
            ))),
            Err(CtlFailure::Other(e)) => Err(CsiError::BackendError(e)),
        }
    }
}

/// Every proper ancestor of an absolute BeeGFS path, outermost first,
/// excluding the root.
fn parents(path: &str) -> Vec<String> {
    let mut parents: Vec<String> = Path::new(path)
        .ancestors()
        .skip(1)
        .filter(|p| p.parent().is_some())
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    parents.reverse();
    parents
}

#[async_trait]
impl CtlExecutor for BeegfsCtl {
    #[instrument(skip(self, vol), fields(volume_id = %vol.volume_id))]
    async fn create_directory_for_volume(
        &self,
        vol: &BeegfsVolume,
        permissions: &PermissionsConfig,
    ) -> Result<(), CsiError> {
        for parent in parents(&vol.vol_dir_path_beegfs_root) {
            self.create_dir(vol, &parent, None).await?;
        }
        self.create_dir(vol, &vol.vol_dir_path_beegfs_root, Some(permissions))
            .await
    }

    #[instrument(skip(self, vol), fields(volume_id = %vol.volume_id))]
    async fn set_pattern_for_volume(
        &self,
        vol: &BeegfsVolume,
        pattern: &StripePatternConfig,
    ) -> Result<(), CsiError> {
        if pattern.is_empty() {
            return Ok(());
        }
        let mut args = vec!["--setpattern".to_owned()];
        if let Some(chunk_size) = &pattern.chunk_size {
            args.push(format!("--chunksize={chunk_size}"));
        }
        if let Some(num_targets) = &pattern.num_targets {
            args.push(format!("--numtargets={num_targets}"));
        }
        if let Some(pool) = &pattern.storage_pool_id {
            args.push(format!("--storagepoolid={pool}"));
        }
        args.push(vol.vol_dir_path_beegfs_root.clone());

        self.run(&vol.client_conf_path, &args)
            .await
            .map(drop)
            .map_err(|e| match e {
                CtlFailure::Other(e) => CsiError::BackendError(e),
                CtlFailure::NotFound => {
                    CsiError::VolumeNotFound(vol.volume_id.to_string())
                }
                CtlFailure::EntryExists => {
                    CsiError::BackendError("unexpected beegfs-ctl output".to_owned())
                }
            })
    }

    #[instrument(skip(self, vol), fields(volume_id = %vol.volume_id))]
    async fn stat_directory_for_volume(&self, vol: &BeegfsVolume) -> Result<String, CsiError> {
        let args = vec![
            "--getentryinfo".to_owned(),
            vol.vol_dir_path_beegfs_root.clone(),
        ];
        self.run(&vol.client_conf_path, &args)
            .await
            .map_err(|e| match e {
                CtlFailure::NotFound => CsiError::VolumeNotFound(vol.volume_id.to_string()),
                CtlFailure::Other(e) => CsiError::BackendError(e),
                CtlFailure::EntryExists => {
                    CsiError::BackendError("unexpected beegfs-ctl output".to_owned())
                }
            })
    }
}
