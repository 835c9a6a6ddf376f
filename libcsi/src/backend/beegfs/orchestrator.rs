//! Working directory lifecycle of a volume.
//!
//! ```text
//! ABSENT -> FILES_WRITTEN -> MOUNTED -> unmounted -> CLEANED
//!                                  \-> bind mounted elsewhere (left alone)
//! ```
//!
//! Every function here takes the [`Filesystem`] and [`Mounter`] it works
//! with, so the whole lifecycle runs against in-memory fakes in tests.

use std::io;
use std::path::Path;

use tracing::{debug, instrument, warn};

use super::client_conf::ClientConf;
use super::volume::BeegfsVolume;
use crate::error::CsiError;
use crate::fs::Filesystem;
use crate::mount::Mounter;

/// Device tag of every BeeGFS client mount.
pub const BEEGFS_DEVICE: &str = "beegfs_nodev";
/// File system type of a BeeGFS client mount.
pub const BEEGFS_FS_TYPE: &str = "beegfs";

const CONN_INTERFACES_FILE: &str = "connInterfacesFile";
const CONN_NET_FILTER_FILE: &str = "connNetFilterFile";
const CONN_TCP_ONLY_FILTER_FILE: &str = "connTcpOnlyFilterFile";
const CONN_AUTH_FILE: &str = "connAuthFile";

fn io_err(action: &str, path: &Path, e: io::Error) -> CsiError {
    CsiError::Internal(format!("{action} {}: {e}", path.display()))
}

/// Ask the OS for a free UDP port.
///
/// BeeGFS cannot bind port zero itself, so a port is picked here and written
/// into the client configuration.  Another process may grab the port before
/// the client binds it; callers that care retry the whole
/// [`write_client_files`] step.
pub async fn get_ephemeral_port_udp() -> Result<u16, CsiError> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| CsiError::Internal(format!("error selecting connClientPortUDP: {e}")))?;
    let port = socket
        .local_addr()
        .map_err(|e| CsiError::Internal(format!("error selecting connClientPortUDP: {e}")))?
        .port();
    drop(socket);
    Ok(port)
}

/// Write `beegfs-client.conf` and its sidecar files into the volume's working
/// directory, which must already exist and be empty.
///
/// The template at `template_path` supplies every key; setting a key the
/// template does not define fails.
#[instrument(skip(fs, vol), fields(volume_id = %vol.volume_id))]
pub async fn write_client_files(
    fs: &dyn Filesystem,
    vol: &BeegfsVolume,
    template_path: &Path,
) -> Result<(), CsiError> {
    debug!(template = %template_path.display(), "writing client files");
    let template = fs
        .read(template_path)
        .await
        .map_err(|e| io_err("error loading beegfs-client.conf file at", template_path, e))?;
    let mut conf = ClientConf::parse(&String::from_utf8_lossy(&template));

    let port = get_ephemeral_port_udp().await?;
    conf.set("sysMgmtdHost", &vol.sys_mgmtd_host)?;
    conf.set("connClientPortUDP", &port.to_string())?;
    for (key, value) in &vol.config.beegfs_client_conf {
        conf.set(key, value)?;
    }

    let lists = [
        (CONN_INTERFACES_FILE, &vol.config.conn_interfaces),
        (CONN_NET_FILTER_FILE, &vol.config.conn_net_filter),
        (CONN_TCP_ONLY_FILTER_FILE, &vol.config.conn_tcp_only_filter),
    ];
    for (key, entries) in lists {
        if entries.is_empty() {
            continue;
        }
        let path = vol.mount_dir_path.join(key);
        conf.set(key, &path.to_string_lossy())?;
        let mut contents = entries.join("\n");
        contents.push('\n');
        fs.write(&path, contents.as_bytes(), 0o644)
            .await
            .map_err(|e| io_err("error writing", &path, e))?;
    }

    if let Some(secret) = vol.config.conn_auth() {
        let path = vol.mount_dir_path.join(CONN_AUTH_FILE);
        conf.set(CONN_AUTH_FILE, &path.to_string_lossy())?;
        fs.write(&path, secret.as_bytes(), 0o400)
            .await
            .map_err(|e| io_err("error writing", &path, e))?;
    }

    fs.write(&vol.client_conf_path, conf.to_string().as_bytes(), 0o644)
        .await
        .map_err(|e| io_err("error writing", &vol.client_conf_path, e))
}

/// Mount the file system at `vol.mount_path` unless it is mounted already.
/// Expects [`write_client_files`] to have run.
#[instrument(skip(fs, mounter, vol), fields(volume_id = %vol.volume_id))]
pub async fn mount_if_necessary(
    fs: &dyn Filesystem,
    mounter: &dyn Mounter,
    vol: &BeegfsVolume,
) -> Result<(), CsiError> {
    let exists = fs
        .exists(&vol.mount_path)
        .await
        .map_err(|e| io_err("stat", &vol.mount_path, e))?;
    if !exists {
        fs.create_dir(&vol.mount_path)
            .await
            .map_err(|e| io_err("create mount point", &vol.mount_path, e))?;
    } else if mounter.is_mount_point(&vol.mount_path).await? {
        debug!(mount_path = %vol.mount_path.display(), "already mounted");
        return Ok(());
    }

    let options = [
        "rw".to_owned(),
        "relatime".to_owned(),
        format!("cfgFile={}", vol.client_conf_path.display()),
    ];
    debug!(mount_path = %vol.mount_path.display(), "mounting BeeGFS");
    mounter
        .mount(BEEGFS_DEVICE, &vol.mount_path, BEEGFS_FS_TYPE, &options)
        .await
}

/// Unmount the volume and clean up its working directory, unless the mount
/// is still bind mounted somewhere else.
///
/// With `remove_dir` the working directory itself is removed, otherwise only
/// its contents.  An unmounted volume is not an error.
#[instrument(skip(fs, mounter, vol), fields(volume_id = %vol.volume_id))]
pub async fn unmount_and_clean_up(
    fs: &dyn Filesystem,
    mounter: &dyn Mounter,
    vol: &BeegfsVolume,
    remove_dir: bool,
) -> Result<(), CsiError> {
    let mount_path = vol.mount_path.to_string_lossy();
    let client_conf = vol.client_conf_path.to_string_lossy();

    // The staged mount is exposed to workloads by bind mounting a
    // subdirectory, so a bind shows up as a second beegfs entry carrying the
    // same cfgFile.  The same mount seen through a host prefix (e.g. /host)
    // contains mount_path and is not a bind.
    for entry in mounter.list().await? {
        let path = entry.path.to_string_lossy();
        if entry.device == BEEGFS_DEVICE
            && !path.contains(mount_path.as_ref())
            && entry.opts.iter().any(|o| o.contains(client_conf.as_ref()))
        {
            return Err(CsiError::BindMounted {
                mount_path: mount_path.into_owned(),
                bind_path: path.into_owned(),
            });
        }
    }

    if mounter.is_mount_point(&vol.mount_path).await? {
        mounter.unmount(&vol.mount_path).await?;
    }
    clean_up(fs, mounter, vol, remove_dir).await
}

/// Delete the volume's working files.  Refuses to run while the mount path
/// is still mounted.
#[instrument(skip(fs, mounter, vol), fields(volume_id = %vol.volume_id))]
pub async fn clean_up(
    fs: &dyn Filesystem,
    mounter: &dyn Mounter,
    vol: &BeegfsVolume,
    remove_dir: bool,
) -> Result<(), CsiError> {
    if mounter.is_mount_point(&vol.mount_path).await? {
        return Err(CsiError::UnmountFailed {
            path: vol.mount_path.display().to_string(),
            reason: "still mounted, refusing to clean up".to_owned(),
        });
    }

    if remove_dir {
        match fs.remove_all(&vol.mount_dir_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %vol.mount_dir_path.display(), "working directory already gone");
                Ok(())
            }
            Err(e) => Err(io_err("remove", &vol.mount_dir_path, e)),
        }
    } else {
        let entries = fs
            .read_dir(&vol.mount_dir_path)
            .await
            .map_err(|e| io_err("read", &vol.mount_dir_path, e))?;
        for entry in entries {
            fs.remove_all(&entry)
                .await
                .map_err(|e| io_err("remove", &entry, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::backend::beegfs::config::{BeegfsConfig, PluginConfig};
    use crate::backend::beegfs::testing::{FakeCluster, TEMPLATE, TEMPLATE_PATH};
    use crate::mount::MountEntry;

    const DATA_DIR: &str = "/var/lib/beegfs-csi";

    fn volume(config: BeegfsConfig) -> BeegfsVolume {
        let mut vol = BeegfsVolume::new(
            Path::new(DATA_DIR),
            "10.0.0.1",
            "/data/vol1",
            &PluginConfig::default(),
        );
        vol.config = config;
        vol
    }

    async fn prepared(cluster: &FakeCluster, vol: &BeegfsVolume) {
        cluster
            .fs()
            .create_dir_all(&vol.mount_dir_path)
            .await
            .unwrap();
        write_client_files(cluster.fs().as_ref(), vol, Path::new(TEMPLATE_PATH))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ephemeral_port_is_nonzero() {
        assert_ne!(get_ephemeral_port_udp().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn writes_conf_without_sidecars() {
        let cluster = FakeCluster::new();
        let vol = volume(BeegfsConfig::default());
        prepared(&cluster, &vol).await;

        let conf = cluster.fs().read_to_string(&vol.client_conf_path).unwrap();
        let conf = ClientConf::parse(&conf);
        assert_eq!(conf.get("sysMgmtdHost"), Some("10.0.0.1"));
        assert_ne!(conf.get("connClientPortUDP"), Some("8004"));
        assert_eq!(conf.get("connInterfacesFile"), Some(""));

        let entries = cluster.fs().read_dir(&vol.mount_dir_path).await.unwrap();
        assert_eq!(entries, vec![vol.client_conf_path.clone()]);
    }

    #[tokio::test]
    async fn writes_sidecars_and_overrides() {
        let cluster = FakeCluster::new();
        let mut config = BeegfsConfig {
            conn_interfaces: vec!["ib0".into(), "ib1".into()],
            conn_tcp_only_filter: vec!["10.0.0.0/24".into()],
            beegfs_client_conf: [("connMgmtdPortTCP".to_owned(), "9008".to_owned())].into(),
            ..Default::default()
        };
        config.set_conn_auth("s3cr3t");
        let vol = volume(config);
        prepared(&cluster, &vol).await;

        let fs = cluster.fs();
        let conf = ClientConf::parse(&fs.read_to_string(&vol.client_conf_path).unwrap());
        let interfaces = vol.mount_dir_path.join("connInterfacesFile");
        assert_eq!(
            conf.get("connInterfacesFile"),
            Some(interfaces.to_str().unwrap())
        );
        assert_eq!(conf.get("connNetFilterFile"), Some(""));
        assert_eq!(conf.get("connMgmtdPortTCP"), Some("9008"));
        assert_eq!(fs.read_to_string(&interfaces).unwrap(), "ib0\nib1\n");
        assert_eq!(
            fs.read_to_string(&vol.mount_dir_path.join("connTcpOnlyFilterFile"))
                .unwrap(),
            "10.0.0.0/24\n"
        );
        assert!(!fs.is_file(&vol.mount_dir_path.join("connNetFilterFile")));

        let auth = vol.mount_dir_path.join("connAuthFile");
        assert_eq!(fs.read_to_string(&auth).unwrap(), "s3cr3t");
        assert_eq!(fs.mode(&auth), Some(0o400));
        assert!(!fs.read_to_string(&vol.client_conf_path).unwrap().contains("s3cr3t"));
    }

    #[tokio::test]
    async fn unknown_template_key_is_rejected() {
        let cluster = FakeCluster::new();
        let vol = volume(BeegfsConfig {
            beegfs_client_conf: [("madeUpOption".to_owned(), "1".to_owned())].into(),
            ..Default::default()
        });
        cluster
            .fs()
            .create_dir_all(&vol.mount_dir_path)
            .await
            .unwrap();
        let err = write_client_files(cluster.fs().as_ref(), &vol, Path::new(TEMPLATE_PATH))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("madeUpOption not in template"));
        assert!(!cluster.fs().is_file(&vol.client_conf_path));
    }

    #[tokio::test]
    async fn missing_template_fails() {
        let cluster = FakeCluster::new();
        let vol = volume(BeegfsConfig::default());
        let err = write_client_files(cluster.fs().as_ref(), &vol, Path::new("/nope.conf"))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::Internal(_)));
        assert!(TEMPLATE.contains("sysMgmtdHost"));
    }

    #[tokio::test]
    async fn mount_is_idempotent_and_cleanup_removes_everything() {
        let cluster = FakeCluster::new();
        let vol = volume(BeegfsConfig::default());
        prepared(&cluster, &vol).await;

        mount_if_necessary(cluster.fs().as_ref(), &cluster, &vol)
            .await
            .unwrap();
        mount_if_necessary(cluster.fs().as_ref(), &cluster, &vol)
            .await
            .unwrap();
        assert_eq!(cluster.mount_calls(), 1);
        let mounted = cluster.list().await.unwrap();
        assert_eq!(mounted.len(), 1);
        assert_eq!(mounted[0].device, BEEGFS_DEVICE);
        assert!(
            mounted[0]
                .opts
                .contains(&format!("cfgFile={}", vol.client_conf_path.display()))
        );

        unmount_and_clean_up(cluster.fs().as_ref(), &cluster, &vol, true)
            .await
            .unwrap();
        assert!(cluster.list().await.unwrap().is_empty());
        assert!(!cluster.fs().exists(&vol.mount_dir_path).await.unwrap());

        // Unmounting again is quiet.
        unmount_and_clean_up(cluster.fs().as_ref(), &cluster, &vol, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cleanup_keeps_directory_when_asked() {
        let cluster = FakeCluster::new();
        let vol = volume(BeegfsConfig::default());
        prepared(&cluster, &vol).await;
        unmount_and_clean_up(cluster.fs().as_ref(), &cluster, &vol, false)
            .await
            .unwrap();
        assert!(cluster.fs().is_dir(&vol.mount_dir_path));
        assert!(
            cluster
                .fs()
                .read_dir(&vol.mount_dir_path)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn refuses_to_unmount_while_bind_mounted() {
        let cluster = Arc::new(FakeCluster::new());
        let vol = volume(BeegfsConfig::default());
        prepared(&cluster, &vol).await;
        mount_if_necessary(cluster.fs().as_ref(), cluster.as_ref(), &vol)
            .await
            .unwrap();

        // The staged mount as seen from the host root is not a bind.
        cluster.add_mount(MountEntry {
            device: BEEGFS_DEVICE.to_owned(),
            path: PathBuf::from("/host").join(vol.mount_path.strip_prefix("/").unwrap()),
            fs_type: BEEGFS_FS_TYPE.to_owned(),
            opts: vec![format!("cfgFile={}", vol.client_conf_path.display())],
        });
        // A pod bind mount is.
        let bind = PathBuf::from("/var/lib/kubelet/pods/1/volumes/vol1/mount");
        cluster.add_mount(MountEntry {
            device: BEEGFS_DEVICE.to_owned(),
            path: bind.clone(),
            fs_type: BEEGFS_FS_TYPE.to_owned(),
            opts: vec![
                "rw".to_owned(),
                format!("cfgFile={}", vol.client_conf_path.display()),
            ],
        });

        let err = unmount_and_clean_up(cluster.fs().as_ref(), cluster.as_ref(), &vol, true)
            .await
            .unwrap_err();
        match err {
            CsiError::BindMounted {
                mount_path,
                bind_path,
            } => {
                assert_eq!(mount_path, vol.mount_path.display().to_string());
                assert_eq!(bind_path, bind.display().to_string());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(cluster.is_mount_point(&vol.mount_path).await.unwrap());
        assert!(cluster.fs().is_file(&vol.client_conf_path));
    }

    #[tokio::test]
    async fn clean_up_refuses_while_mounted() {
        let cluster = FakeCluster::new();
        let vol = volume(BeegfsConfig::default());
        prepared(&cluster, &vol).await;
        mount_if_necessary(cluster.fs().as_ref(), &cluster, &vol)
            .await
            .unwrap();

        let err = clean_up(cluster.fs().as_ref(), &cluster, &vol, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::UnmountFailed { .. }));
        assert!(cluster.fs().is_file(&vol.client_conf_path));
    }
}
