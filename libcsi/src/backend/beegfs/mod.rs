//! BeeGFS storage backend for CSI.
//!
//! [`BeegfsBackend`] implements [`CsiIdentity`] and [`CsiController`] for
//! BeeGFS file systems.  A volume is a directory on some BeeGFS instance;
//! the instance is named by its management host and the directory by its
//! absolute path, both encoded in the volume ID (`beegfs://host/path`).
//!
//! The controller keeps no state between requests.  For every request it
//! derives a working directory from the volume ID, writes a
//! `beegfs-client.conf` into it, does its work through `beegfs-ctl` (and a
//! short lived mount where unavoidable) and removes the working directory
//! again.
//!
//! # Working directory layout
//!
//! ```text
//! <cs_data_dir>/
//!   <sanitized volume id>/
//!     beegfs-client.conf
//!     connInterfacesFile      # only if configured
//!     connNetFilterFile       # only if configured
//!     connTcpOnlyFilterFile   # only if configured
//!     connAuthFile            # only if configured
//!     mount/                  # only while mounted
//! ```

pub mod client_conf;
pub mod config;
pub mod ctl;
pub mod orchestrator;
pub mod params;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

pub use config::{BeegfsConfig, PluginConfig};
pub use ctl::{BeegfsCtl, CtlExecutor};
pub use volume::BeegfsVolume;

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::fs::{Filesystem, OsFs};
use crate::identity::CsiIdentity;
use crate::inflight::InFlight;
use crate::mount::{LinuxMounter, Mounter};
use crate::types::*;
use params::{PermissionsConfig, StripePatternConfig};

/// Name reported by `GetPluginInfo`.
pub const PLUGIN_NAME: &str = "rk8s.beegfs.csi";

/// Where the client configuration template usually lives.
pub const DEFAULT_CLIENT_CONF_TEMPLATE_PATH: &str = "/etc/beegfs/beegfs-client.conf";

/// Check `capabilities` against what BeeGFS volumes can offer.
///
/// Every access mode works on a shared file system, but only as a mount.
pub fn check_volume_capabilities(capabilities: &[VolumeCapability]) -> Result<(), String> {
    for cap in capabilities {
        if cap.access_type == AccessType::Block {
            return Err("block access type is not supported".to_owned());
        }
        if cap.access_mode == AccessMode::Unknown {
            return Err(format!(
                "access mode {:?} is not supported",
                cap.access_mode
            ));
        }
    }
    Ok(())
}

fn required_param<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, CsiError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| CsiError::InvalidArgument(format!("{key} not provided")))
}

/// CSI controller for BeeGFS.
pub struct BeegfsBackend {
    ctl: Arc<dyn CtlExecutor>,
    fs: Arc<dyn Filesystem>,
    mounter: Arc<dyn Mounter>,
    node_id: String,
    plugin_config: PluginConfig,
    client_conf_template_path: PathBuf,
    /// Parent of every working directory.
    cs_data_dir: PathBuf,
    in_flight: InFlight,
}

impl BeegfsBackend {
    /// Create a backend that uses `beegfs-ctl`, the host file system and the
    /// host mount table.
    pub fn new(
        node_id: impl Into<String>,
        plugin_config: PluginConfig,
        client_conf_template_path: impl Into<PathBuf>,
        cs_data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ctl: Arc::new(BeegfsCtl::default()),
            fs: Arc::new(OsFs),
            mounter: Arc::new(LinuxMounter::new()),
            node_id: node_id.into(),
            plugin_config,
            client_conf_template_path: client_conf_template_path.into(),
            cs_data_dir: cs_data_dir.into(),
            in_flight: InFlight::new(),
        }
    }

    pub fn with_ctl(mut self, ctl: Arc<dyn CtlExecutor>) -> Self {
        self.ctl = ctl;
        self
    }

    pub fn with_filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounter = mounter;
        self
    }

    fn volume_from_id(&self, volume_id: &VolumeId) -> Result<BeegfsVolume, CsiError> {
        if volume_id.as_str().is_empty() {
            return Err(CsiError::InvalidArgument("volume ID not provided".to_owned()));
        }
        BeegfsVolume::from_id(&self.cs_data_dir, volume_id, &self.plugin_config)
    }

    /// Create the working directory and write the client files into it.
    async fn stage_client_files(&self, vol: &BeegfsVolume) -> Result<(), CsiError> {
        self.fs
            .create_dir_all(&vol.mount_dir_path)
            .await
            .map_err(|e| {
                CsiError::Internal(format!("create {}: {e}", vol.mount_dir_path.display()))
            })?;
        orchestrator::write_client_files(
            self.fs.as_ref(),
            vol,
            &self.client_conf_template_path,
        )
        .await
    }

    async fn provision(
        &self,
        vol: &BeegfsVolume,
        permissions: &PermissionsConfig,
        pattern: &StripePatternConfig,
    ) -> Result<(), CsiError> {
        self.stage_client_files(vol).await?;
        self.ctl.create_directory_for_volume(vol, permissions).await?;
        self.ctl.set_pattern_for_volume(vol, pattern).await?;

        // beegfs-ctl cannot set setuid, setgid or sticky.
        if permissions.has_special_permissions() {
            orchestrator::mount_if_necessary(self.fs.as_ref(), self.mounter.as_ref(), vol)
                .await?;
            debug!(
                mode = %format!("{:04o}", permissions.mode),
                vol_dir_path = %vol.vol_dir_path.display(),
                "applying permissions"
            );
            self.fs
                .set_mode(&vol.vol_dir_path, u32::from(permissions.mode))
                .await
                .map_err(|e| {
                    CsiError::Internal(format!("chmod {}: {e}", vol.vol_dir_path.display()))
                })?;
        }
        Ok(())
    }

    async fn remove_volume_dir(&self, vol: &BeegfsVolume) -> Result<(), CsiError> {
        self.stage_client_files(vol).await?;
        orchestrator::mount_if_necessary(self.fs.as_ref(), self.mounter.as_ref(), vol).await?;
        debug!(
            vol_dir_base_path = %vol.vol_dir_base_path_beegfs_root,
            "deleting BeeGFS directory"
        );
        match self.fs.remove_all(&vol.vol_dir_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("volume directory already gone");
                Ok(())
            }
            Err(e) => Err(CsiError::Internal(format!(
                "remove {}: {e}",
                vol.vol_dir_path.display()
            ))),
        }
    }

    async fn stat_volume(&self, vol: &BeegfsVolume) -> Result<(), CsiError> {
        self.stage_client_files(vol).await?;
        self.ctl.stat_directory_for_volume(vol).await.map(drop)
    }

    /// Deferred teardown.  Failures are logged only; the working directory
    /// may then be left behind.
    async fn tear_down(&self, vol: &BeegfsVolume, unmount: bool) {
        let result = if unmount {
            orchestrator::unmount_and_clean_up(
                self.fs.as_ref(),
                self.mounter.as_ref(),
                vol,
                true,
            )
            .await
        } else {
            orchestrator::clean_up(self.fs.as_ref(), self.mounter.as_ref(), vol, true).await
        };
        if let Err(e) = result {
            error!(
                path = %vol.mount_dir_path.display(),
                volume_id = %vol.volume_id,
                error = %e,
                "failed to clean up path for volume"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for BeegfsBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: PLUGIN_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        // Healthy as long as working directories can be created.
        let healthy = self.fs.exists(&self.cs_data_dir).await.unwrap_or(false);
        if !healthy {
            debug!(cs_data_dir = %self.cs_data_dir.display(), "probe failed");
        }
        Ok(healthy)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for BeegfsBackend {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("volume name not provided".to_owned()));
        }
        if req.name.contains('/') || req.name == "." || req.name == ".." {
            return Err(CsiError::InvalidArgument(format!(
                "volume name {} is not a valid directory name",
                req.name
            )));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities not provided".to_owned(),
            ));
        }
        check_volume_capabilities(&req.volume_capabilities).map_err(|reason| {
            CsiError::InvalidArgument(format!("volume capabilities not supported: {reason}"))
        })?;
        if req.parameters.is_empty() {
            return Err(CsiError::InvalidArgument(
                "request parameters not provided".to_owned(),
            ));
        }
        let sys_mgmtd_host = required_param(&req.parameters, params::SYS_MGMTD_HOST_KEY)?;
        if !config::is_valid_host(sys_mgmtd_host) {
            return Err(CsiError::InvalidArgument(format!(
                "invalid {} {sys_mgmtd_host}",
                params::SYS_MGMTD_HOST_KEY
            )));
        }
        let base_path = volume::clean_path(required_param(
            &req.parameters,
            params::VOL_DIR_BASE_PATH_KEY,
        )?);
        let permissions = params::permissions_from_params(&req.parameters)?;
        let pattern = params::stripe_pattern_from_params(&req.parameters)?;

        let vol = BeegfsVolume::new(
            &self.cs_data_dir,
            sys_mgmtd_host,
            &format!("{base_path}/{}", req.name),
            &self.plugin_config,
        );
        let _guard = self.in_flight.lock(vol.volume_id.as_str())?;

        let result = self.provision(&vol, &permissions, &pattern).await;
        self.tear_down(&vol, true).await;
        result?;

        info!(node_id = %self.node_id, volume_id = %vol.volume_id, "volume created");
        Ok(Volume {
            volume_id: vol.volume_id,
            capacity_bytes: 0,
            volume_context: HashMap::new(),
        })
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        let vol = self.volume_from_id(volume_id)?;
        let _guard = self.in_flight.lock(vol.volume_id.as_str())?;

        let result = self.remove_volume_dir(&vol).await;
        self.tear_down(&vol, true).await;
        result?;

        info!(node_id = %self.node_id, %volume_id, "volume deleted");
        Ok(())
    }

    #[instrument(skip(self, capabilities))]
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        if capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities not provided".to_owned(),
            ));
        }
        let vol = self.volume_from_id(volume_id)?;
        let _guard = self.in_flight.lock(vol.volume_id.as_str())?;

        let result = self.stat_volume(&vol).await;
        self.tear_down(&vol, false).await;
        result?;

        Ok(match check_volume_capabilities(capabilities) {
            Ok(()) => ValidateVolumeCapabilitiesResponse {
                confirmed: Some(capabilities.to_vec()),
                message: String::new(),
            },
            Err(reason) => {
                debug!(%reason, "capabilities not confirmed");
                ValidateVolumeCapabilitiesResponse {
                    confirmed: None,
                    message: reason,
                }
            }
        })
    }

    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![ControllerCapability::CreateDeleteVolume])
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::error::Code;
    use crate::fs::MemFs;
    use testing::{FakeCluster, TEMPLATE_PATH};

    const DATA_DIR: &str = "/var/lib/beegfs-csi";

    fn backend_with_config(cluster: &Arc<FakeCluster>, config: PluginConfig) -> BeegfsBackend {
        BeegfsBackend::new("node-a", config, TEMPLATE_PATH, DATA_DIR)
            .with_ctl(cluster.clone())
            .with_filesystem(cluster.fs())
            .with_mounter(cluster.clone())
    }

    fn backend(cluster: &Arc<FakeCluster>) -> BeegfsBackend {
        backend_with_config(cluster, PluginConfig::default())
    }

    fn create_request(name: &str, extra: &[(&str, &str)]) -> CreateVolumeRequest {
        let mut parameters: HashMap<String, String> = HashMap::from([
            ("sysMgmtdHost".to_owned(), "10.0.0.1".to_owned()),
            ("volDirBasePath".to_owned(), "/data".to_owned()),
        ]);
        for (k, v) in extra {
            parameters.insert((*k).to_owned(), (*v).to_owned());
        }
        CreateVolumeRequest {
            name: name.to_owned(),
            capacity_bytes: 1 << 30,
            volume_capabilities: vec![VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)],
            parameters,
        }
    }

    async fn working_dirs(fs: &MemFs) -> Vec<PathBuf> {
        fs.read_dir(Path::new(DATA_DIR)).await.unwrap_or_default()
    }

    #[tokio::test]
    async fn create_then_delete_volume() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);

        let vol = backend
            .create_volume(create_request("vol1", &[]))
            .await
            .unwrap();
        assert_eq!(vol.volume_id.as_str(), "beegfs://10.0.0.1/data/vol1");

        let dir = cluster.remote_dir("/data/vol1").unwrap();
        assert_eq!(dir.mode, 0o777);
        assert!(cluster.remote_dir("/data").is_some());
        // No mount needed without special permissions.
        assert_eq!(cluster.mount_calls(), 0);
        assert!(working_dirs(&cluster.fs()).await.is_empty());

        backend.delete_volume(&vol.volume_id).await.unwrap();
        assert!(cluster.remote_dir("/data/vol1").is_none());
        assert!(cluster.remote_dir("/data").is_some());
        assert_eq!(cluster.mount_calls(), 1);
        assert!(cluster.list().await.unwrap().is_empty());
        assert!(working_dirs(&cluster.fs()).await.is_empty());
    }

    #[tokio::test]
    async fn create_applies_ownership_and_stripe_pattern() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        backend
            .create_volume(create_request(
                "vol1",
                &[
                    ("permissions/uid", "1000"),
                    ("permissions/gid", "100"),
                    ("permissions/mode", "750"),
                    ("stripePattern/numTargets", "4"),
                ],
            ))
            .await
            .unwrap();

        let dir = cluster.remote_dir("/data/vol1").unwrap();
        assert_eq!(dir.mode, 0o750);
        assert_eq!(dir.uid, Some(1000));
        assert_eq!(dir.gid, Some(100));
        assert_eq!(dir.pattern.num_targets.as_deref(), Some("4"));
        assert_eq!(cluster.mount_calls(), 0);
    }

    #[tokio::test]
    async fn special_permissions_are_applied_through_a_mount() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        backend
            .create_volume(create_request("vol1", &[("permissions/mode", "2775")]))
            .await
            .unwrap();

        assert_eq!(cluster.mount_calls(), 1);
        assert_eq!(cluster.remote_dir("/data/vol1").unwrap().mode, 0o2775);
        assert!(cluster.list().await.unwrap().is_empty());
        assert!(working_dirs(&cluster.fs()).await.is_empty());
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        let first = backend
            .create_volume(create_request("vol1", &[]))
            .await
            .unwrap();
        let second = backend
            .create_volume(create_request("vol1", &[]))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn base_path_is_cleaned() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        let mut req = create_request("vol1", &[]);
        req.parameters
            .insert("volDirBasePath".to_owned(), "scratch//k8s/".to_owned());
        let vol = backend.create_volume(req).await.unwrap();
        assert_eq!(vol.volume_id.as_str(), "beegfs://10.0.0.1/scratch/k8s/vol1");
    }

    #[tokio::test]
    async fn volume_in_flight_is_aborted() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        let id = VolumeId::from("beegfs://10.0.0.1/data/vol1");

        let guard = backend.in_flight.lock(id.as_str()).unwrap();
        let err = backend
            .create_volume(create_request("vol1", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Aborted);
        let err = backend.delete_volume(&id).await.unwrap_err();
        assert!(matches!(err, CsiError::InFlight(_)));
        assert!(cluster.remote_dir("/data/vol1").is_none());
        assert!(working_dirs(&cluster.fs()).await.is_empty());

        drop(guard);
        backend
            .create_volume(create_request("vol1", &[]))
            .await
            .unwrap();
        assert!(!backend.in_flight.is_held(id.as_str()));
    }

    #[tokio::test]
    async fn invalid_create_requests() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);

        let mut no_caps = create_request("vol1", &[]);
        no_caps.volume_capabilities.clear();
        let mut block = create_request("vol1", &[]);
        block.volume_capabilities = vec![VolumeCapability {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: AccessType::Block,
        }];
        let mut no_params = create_request("vol1", &[]);
        no_params.parameters.clear();
        let mut no_host = create_request("vol1", &[]);
        no_host.parameters.remove("sysMgmtdHost");
        let mut no_base = create_request("vol1", &[]);
        no_base.parameters.remove("volDirBasePath");
        let mut bad_host = create_request("vol1", &[]);
        bad_host
            .parameters
            .insert("sysMgmtdHost".to_owned(), "not a host!!".to_owned());
        let mut numeric_host = create_request("vol1", &[]);
        numeric_host
            .parameters
            .insert("sysMgmtdHost".to_owned(), "999.999.999.999".to_owned());

        let requests = [
            create_request("", &[]),
            create_request("a/b", &[]),
            no_caps,
            block,
            no_params,
            no_host,
            no_base,
            bad_host,
            numeric_host,
            create_request("vol1", &[("permissions/mode", "99")]),
            create_request("vol1", &[("stripePattern/bogus", "1")]),
        ];
        for req in requests {
            let err = backend.create_volume(req).await.unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "{err}");
        }
        assert!(working_dirs(&cluster.fs()).await.is_empty());
        assert!(cluster.remote_dir("/data").is_none());
    }

    #[tokio::test]
    async fn malformed_volume_ids_are_invalid() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        for id in ["", "http://10.0.0.1/data/vol1", "garbage"] {
            let err = backend.delete_volume(&VolumeId::from(id)).await.unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "{id}");
            let err = backend
                .validate_volume_capabilities(&VolumeId::from(id), &[VolumeCapability::default()])
                .await
                .unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "{id}");
        }
    }

    #[tokio::test]
    async fn delete_refuses_ids_naming_the_file_system_root() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        backend
            .create_volume(create_request("other", &[]))
            .await
            .unwrap();

        for id in [
            "beegfs://10.0.0.1/",
            "beegfs://10.0.0.1",
            "beegfs://10.0.0.1/data/..",
            "beegfs://10.0.0.1/data//other",
            "beegfs://10.0.0.1/data/other/",
        ] {
            let err = backend.delete_volume(&VolumeId::from(id)).await.unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "{id}");
        }
        assert!(cluster.remote_dir("/data/other").is_some());
        assert!(cluster.remote_dir("/data").is_some());
        assert!(working_dirs(&cluster.fs()).await.is_empty());
    }

    #[tokio::test]
    async fn delete_missing_volume_succeeds() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        backend
            .delete_volume(&VolumeId::from("beegfs://10.0.0.1/data/missing"))
            .await
            .unwrap();
        assert!(working_dirs(&cluster.fs()).await.is_empty());
    }

    #[tokio::test]
    async fn validate_capabilities() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        let id = VolumeId::from("beegfs://10.0.0.1/data/vol1");
        let caps = vec![
            VolumeCapability::mount(AccessMode::MultiNodeMultiWriter),
            VolumeCapability::mount(AccessMode::SingleNodeReaderOnly),
        ];

        let err = backend
            .validate_volume_capabilities(&id, &caps)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);

        cluster.add_remote_dir("/data/vol1", 0o777);
        let resp = backend
            .validate_volume_capabilities(&id, &caps)
            .await
            .unwrap();
        assert_eq!(resp.confirmed, Some(caps));

        let resp = backend
            .validate_volume_capabilities(
                &id,
                &[VolumeCapability {
                    access_mode: AccessMode::MultiNodeMultiWriter,
                    access_type: AccessType::Block,
                }],
            )
            .await
            .unwrap();
        assert!(!resp.is_confirmed());
        assert!(resp.message.contains("block"));

        let err = backend
            .validate_volume_capabilities(&id, &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        assert_eq!(cluster.mount_calls(), 0);
        assert!(working_dirs(&cluster.fs()).await.is_empty());
    }

    #[tokio::test]
    async fn template_without_required_key_fails_and_cleans_up() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fs().insert_file(
            Path::new(TEMPLATE_PATH),
            b"sysMgmtdHost =\nconnClientPortUDP = 8004\n",
            0o644,
        );
        let plugin_config = PluginConfig {
            default_config: BeegfsConfig {
                conn_interfaces: vec!["ib0".to_owned()],
                ..Default::default()
            },
            file_system_specific_configs: Vec::new(),
        };
        let backend = backend_with_config(&cluster, plugin_config);

        let err = backend
            .create_volume(create_request("vol1", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(err.to_string().contains("connInterfacesFile"));
        assert!(cluster.remote_dir("/data/vol1").is_none());
        assert!(working_dirs(&cluster.fs()).await.is_empty());
    }

    #[tokio::test]
    async fn identity() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);

        let info = backend.get_plugin_info().await.unwrap();
        assert_eq!(info.name, PLUGIN_NAME);
        assert_eq!(
            backend.get_plugin_capabilities().await.unwrap(),
            vec![PluginCapability::ControllerService]
        );
        assert_eq!(
            backend.get_capabilities().await.unwrap(),
            vec![ControllerCapability::CreateDeleteVolume]
        );

        assert!(!backend.probe().await.unwrap());
        cluster
            .fs()
            .create_dir_all(Path::new(DATA_DIR))
            .await
            .unwrap();
        assert!(backend.probe().await.unwrap());
    }

    #[tokio::test]
    async fn unimplemented_rpcs() {
        let cluster = Arc::new(FakeCluster::new());
        let backend = backend(&cluster);
        let err = backend.list_volumes().await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
        let err = backend
            .controller_publish_volume(&VolumeId::from("beegfs://h/v"), "node-a")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[test]
    fn capability_matrix() {
        let modes = [
            AccessMode::SingleNodeWriter,
            AccessMode::SingleNodeReaderOnly,
            AccessMode::MultiNodeReaderOnly,
            AccessMode::MultiNodeSingleWriter,
            AccessMode::MultiNodeMultiWriter,
            AccessMode::SingleNodeSingleWriter,
            AccessMode::SingleNodeMultiWriter,
        ];
        for mode in modes {
            assert!(check_volume_capabilities(&[VolumeCapability::mount(mode)]).is_ok());
        }
        assert!(
            check_volume_capabilities(&[VolumeCapability::mount(AccessMode::Unknown)]).is_err()
        );
    }
}
