//! Volume identifiers and the per-volume working state derived from them.
//!
//! A volume is identified by `beegfs://<sysMgmtdHost>/<absolute path>`.
//! Everything else the controller needs (where to stage files, where to
//! mount, which directory to operate on) is derived from that string and the
//! plugin configuration on every request.

use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use sha1::{Digest, Sha1};
use url::{Host, Url};

use super::config::{BeegfsConfig, PluginConfig};
use crate::error::CsiError;
use crate::types::VolumeId;

/// URL scheme of every BeeGFS volume identifier.
pub const SCHEME: &str = "beegfs";

/// Longest directory name most file systems accept.
const MAX_NAME_LEN: usize = 255;

/// Characters escaped in the path component of a volume identifier.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Build the identifier for `path` on the file system managed by `host`.
pub fn new_volume_id(host: &str, path: &str) -> VolumeId {
    let host = if host.contains(':') && host.parse::<std::net::Ipv6Addr>().is_ok() {
        format!("[{host}]")
    } else {
        host.to_owned()
    };
    VolumeId(format!(
        "{SCHEME}://{host}{}",
        utf8_percent_encode(path, PATH_ESCAPE)
    ))
}

/// Split an identifier into `(sysMgmtdHost, path)`.
pub fn parse_volume_id(volume_id: &str) -> Result<(String, String), CsiError> {
    let url = Url::parse(volume_id).map_err(|e| {
        CsiError::InvalidArgument(format!("volume ID {volume_id} is not a valid URL: {e}"))
    })?;
    if url.scheme() != SCHEME {
        return Err(CsiError::InvalidArgument(format!(
            "volume ID {volume_id} has incorrect scheme {}",
            url.scheme()
        )));
    }
    let host = match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Domain(domain)) => domain.to_owned(),
        None => {
            return Err(CsiError::InvalidArgument(format!(
                "volume ID {volume_id} has no host"
            )));
        }
    };
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    };
    let path = percent_decode_str(url.path())
        .decode_utf8()
        .map_err(|e| CsiError::InvalidArgument(format!("volume ID {volume_id}: {e}")))?
        .into_owned();
    Ok((host, path))
}

/// Turn an identifier into a directory name.
///
/// `beegfs://10.0.0.1/scratch/vol_1` becomes `10.0.0.1_scratch_vol__1`.
/// Names that would exceed 255 bytes are replaced by the hex SHA-1 of the
/// identifier.
pub fn sanitize_volume_id(volume_id: &str) -> String {
    let sanitized = volume_id
        .replacen("beegfs://", "", 1)
        .replace('_', "__")
        .replace('/', "_");
    if sanitized.len() > MAX_NAME_LEN {
        hex::encode(Sha1::digest(volume_id.as_bytes()))
    } else {
        sanitized
    }
}

/// Lexically clean `path` and root it at `/`, resolving `.` and `..`.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Append an absolute BeeGFS path below a local directory.
fn join_beegfs_path(base: &Path, beegfs_path: &str) -> PathBuf {
    base.join(beegfs_path.trim_start_matches('/'))
}

/// Everything the controller needs to know about one volume.
#[derive(Debug, Clone)]
pub struct BeegfsVolume {
    pub volume_id: VolumeId,
    pub sys_mgmtd_host: String,
    /// Effective configuration for `sys_mgmtd_host`.
    pub config: BeegfsConfig,
    /// Working directory, e.g. `/csDataDir/10.0.0.1_scratch_vol1`.
    pub mount_dir_path: PathBuf,
    /// `<mount_dir_path>/mount`.
    pub mount_path: PathBuf,
    /// `<mount_dir_path>/beegfs-client.conf`.
    pub client_conf_path: PathBuf,
    /// Parent of the volume directory, relative to the BeeGFS root.
    pub vol_dir_base_path_beegfs_root: String,
    /// Volume directory relative to the BeeGFS root, e.g. `/scratch/vol1`.
    pub vol_dir_path_beegfs_root: String,
    /// Volume directory as seen through `mount_path`.
    pub vol_dir_path: PathBuf,
}

impl BeegfsVolume {
    /// Working state for `vol_dir_path_beegfs_root` on `sys_mgmtd_host`,
    /// staged below `cs_data_dir`.
    pub fn new(
        cs_data_dir: &Path,
        sys_mgmtd_host: &str,
        vol_dir_path_beegfs_root: &str,
        plugin_config: &PluginConfig,
    ) -> Self {
        let vol_dir_path_beegfs_root = clean_path(vol_dir_path_beegfs_root);
        let volume_id = new_volume_id(sys_mgmtd_host, &vol_dir_path_beegfs_root);
        let mount_dir_path = cs_data_dir.join(sanitize_volume_id(volume_id.as_str()));
        let mount_path = mount_dir_path.join("mount");
        let client_conf_path = mount_dir_path.join("beegfs-client.conf");
        let vol_dir_base_path_beegfs_root = Path::new(&vol_dir_path_beegfs_root)
            .parent()
            .map_or_else(|| "/".to_owned(), |p| p.to_string_lossy().into_owned());
        let vol_dir_path = join_beegfs_path(&mount_path, &vol_dir_path_beegfs_root);

        Self {
            volume_id,
            sys_mgmtd_host: sys_mgmtd_host.to_owned(),
            config: plugin_config.config_for_host(sys_mgmtd_host),
            mount_dir_path,
            mount_path,
            client_conf_path,
            vol_dir_base_path_beegfs_root,
            vol_dir_path_beegfs_root,
            vol_dir_path,
        }
    }

    /// Rebuild the working state from an identifier minted earlier.
    ///
    /// The working directory name is derived from the identifier exactly as
    /// given, so a caller always lands in the same directory for the same
    /// string.  The path must be the canonical form of a directory below the
    /// BeeGFS root; anything else could resolve to the root or to another
    /// volume's directory.
    pub fn from_id(
        cs_data_dir: &Path,
        volume_id: &VolumeId,
        plugin_config: &PluginConfig,
    ) -> Result<Self, CsiError> {
        let (host, path) = parse_volume_id(volume_id.as_str())?;
        let cleaned = clean_path(&path);
        if cleaned != path || cleaned == "/" {
            return Err(CsiError::InvalidArgument(format!(
                "volume ID {volume_id} does not name a volume directory"
            )));
        }
        let mut vol = Self::new(cs_data_dir, &host, &path, plugin_config);
        vol.volume_id = volume_id.clone();
        vol.mount_dir_path = cs_data_dir.join(sanitize_volume_id(volume_id.as_str()));
        vol.mount_path = vol.mount_dir_path.join("mount");
        vol.client_conf_path = vol.mount_dir_path.join("beegfs-client.conf");
        vol.vol_dir_path = join_beegfs_path(&vol.mount_path, &vol.vol_dir_path_beegfs_root);
        Ok(vol)
    }
}
