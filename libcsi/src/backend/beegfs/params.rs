//! CreateVolume request parameters.

use std::collections::HashMap;

use crate::error::CsiError;

pub const SYS_MGMTD_HOST_KEY: &str = "sysMgmtdHost";
pub const VOL_DIR_BASE_PATH_KEY: &str = "volDirBasePath";

pub const PERMISSIONS_PREFIX: &str = "permissions/";
pub const PERMISSIONS_UID_KEY: &str = "permissions/uid";
pub const PERMISSIONS_GID_KEY: &str = "permissions/gid";
pub const PERMISSIONS_MODE_KEY: &str = "permissions/mode";

pub const STRIPE_PATTERN_PREFIX: &str = "stripePattern/";
pub const STRIPE_PATTERN_STORAGE_POOL_ID_KEY: &str = "stripePattern/storagePoolID";
pub const STRIPE_PATTERN_CHUNK_SIZE_KEY: &str = "stripePattern/chunkSize";
pub const STRIPE_PATTERN_NUM_TARGETS_KEY: &str = "stripePattern/numTargets";

/// Mode of a new volume directory when the request does not set one.
pub const DEFAULT_PERMISSIONS_MODE: u16 = 0o777;

/// Ownership and access mode of a new volume directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionsConfig {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Full 12 bit mode, including setuid, setgid and sticky.
    pub mode: u16,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            uid: None,
            gid: None,
            mode: DEFAULT_PERMISSIONS_MODE,
        }
    }
}

impl PermissionsConfig {
    /// `beegfs-ctl` only understands the lower 9 bits; anything above has to
    /// be applied through a mount.
    pub fn has_special_permissions(&self) -> bool {
        self.mode > 0o777
    }
}

/// Striping applied to a new volume directory.  Values are passed to
/// `beegfs-ctl` unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripePatternConfig {
    pub storage_pool_id: Option<String>,
    pub chunk_size: Option<String>,
    pub num_targets: Option<String>,
}

impl StripePatternConfig {
    /// Whether nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.storage_pool_id.is_none() && self.chunk_size.is_none() && self.num_targets.is_none()
    }
}

fn parse_id(key: &str, value: &str) -> Result<u32, CsiError> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CsiError::InvalidArgument(format!(
            "could not parse {key} {value}"
        )));
    }
    value
        .parse()
        .map_err(|e| CsiError::InvalidArgument(format!("could not parse {key} {value}: {e}")))
}

fn parse_mode(value: &str) -> Result<u16, CsiError> {
    let err = || CsiError::InvalidArgument(format!("could not parse provided mode {value}"));
    if value.is_empty() || !value.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(err());
    }
    match u16::from_str_radix(value, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(err()),
    }
}

/// Extract the `permissions/*` parameters.
pub fn permissions_from_params(
    params: &HashMap<String, String>,
) -> Result<PermissionsConfig, CsiError> {
    let mut config = PermissionsConfig::default();
    for (key, value) in params {
        if !key.starts_with(PERMISSIONS_PREFIX) {
            continue;
        }
        match key.as_str() {
            PERMISSIONS_UID_KEY => config.uid = Some(parse_id("UID", value)?),
            PERMISSIONS_GID_KEY => config.gid = Some(parse_id("GID", value)?),
            PERMISSIONS_MODE_KEY => config.mode = parse_mode(value)?,
            _ => {
                return Err(CsiError::InvalidArgument(format!(
                    "CreateVolume parameter invalid: {key}"
                )));
            }
        }
    }
    Ok(config)
}

/// Extract the `stripePattern/*` parameters.
pub fn stripe_pattern_from_params(
    params: &HashMap<String, String>,
) -> Result<StripePatternConfig, CsiError> {
    let mut config = StripePatternConfig::default();
    for (key, value) in params {
        if !key.starts_with(STRIPE_PATTERN_PREFIX) {
            continue;
        }
        let slot = match key.as_str() {
            STRIPE_PATTERN_STORAGE_POOL_ID_KEY => &mut config.storage_pool_id,
            STRIPE_PATTERN_CHUNK_SIZE_KEY => &mut config.chunk_size,
            STRIPE_PATTERN_NUM_TARGETS_KEY => &mut config.num_targets,
            _ => {
                return Err(CsiError::InvalidArgument(format!(
                    "CreateVolume parameter invalid: {key}"
                )));
            }
        };
        *slot = Some(value.clone());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn permissions_defaults() {
        let config = permissions_from_params(&params(&[("sysMgmtdHost", "h")])).unwrap();
        assert_eq!(config, PermissionsConfig::default());
        assert_eq!(config.mode, 0o777);
        assert!(!config.has_special_permissions());
    }

    #[test]
    fn permissions_parsed() {
        let config = permissions_from_params(&params(&[
            ("permissions/uid", "1000"),
            ("permissions/gid", "2000"),
            ("permissions/mode", "2775"),
        ]))
        .unwrap();
        assert_eq!(config.uid, Some(1000));
        assert_eq!(config.gid, Some(2000));
        assert_eq!(config.mode, 0o2775);
        assert!(config.has_special_permissions());
    }

    #[test]
    fn permissions_rejected() {
        for (key, value) in [
            ("permissions/uid", "-1"),
            ("permissions/gid", "4294967296"),
            ("permissions/mode", "778"),
            ("permissions/mode", "17777"),
            ("permissions/mode", ""),
            ("permissions/owner", "root"),
        ] {
            let err = permissions_from_params(&params(&[(key, value)])).unwrap_err();
            assert!(matches!(err, CsiError::InvalidArgument(_)), "{key}={value}");
        }
    }

    #[test]
    fn stripe_pattern() {
        let config = stripe_pattern_from_params(&params(&[])).unwrap();
        assert!(config.is_empty());

        let config = stripe_pattern_from_params(&params(&[
            ("stripePattern/chunkSize", "1m"),
            ("stripePattern/numTargets", "4"),
        ]))
        .unwrap();
        assert_eq!(config.chunk_size.as_deref(), Some("1m"));
        assert_eq!(config.num_targets.as_deref(), Some("4"));
        assert_eq!(config.storage_pool_id, None);

        let err =
            stripe_pattern_from_params(&params(&[("stripePattern/raid", "10")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument: CreateVolume parameter invalid: stripePattern/raid"
        );
    }
}
