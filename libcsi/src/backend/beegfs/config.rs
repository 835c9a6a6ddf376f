//! Plugin configuration: parsing, layered merging, validation and stripping.
//!
//! The configuration file describes a default [`BeegfsConfig`], per file
//! system overrides keyed by `sysMgmtdHost`, and node specific overrides that
//! only apply when the plugin runs on a listed node.  A separate
//! authentication file supplies `connAuth` secrets per `sysMgmtdHost`.
//!
//! Resolution order, lowest to highest precedence:
//!
//! 1. the global default and the global file system specific configs,
//! 2. every node specific config listing this node, in file order,
//! 3. authentication entries.
//!
//! At every layer a fragment only overwrites what it sets: lists replace
//! wholesale when present and non-empty, `beegfsClientConf` merges key by
//! key, and an empty secret leaves the existing one alone.
//!
//! ```yaml
//! config:
//!   connInterfaces: [ib0]
//!   beegfsClientConf:
//!     connMgmtdPortTCP: 8000
//! fileSystemSpecificConfigs:
//!   - sysMgmtdHost: 10.0.0.1
//!     config:
//!       connNetFilter: [10.0.0.0/24]
//! nodeSpecificConfigs:
//!   - nodeList: [node-a, node-b]
//!     config:
//!       connInterfaces: [ib1]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::CsiError;

/// Options that have no effect in `beegfsClientConf` because the plugin
/// controls them itself.  They are removed during resolution.
pub const NO_EFFECT_CLIENT_CONF_OPTIONS: [&str; 3] =
    ["sysMgmtdHost", "connClientPortUDP", "connPortShift"];

/// Options that are unsupported in `beegfsClientConf`.  They are left in
/// place but reported, since they fight with the structured fields.
pub const UNSUPPORTED_CLIENT_CONF_OPTIONS: [&str; 4] = [
    "connInterfacesFile",
    "connNetFilterFile",
    "connTcpOnlyFilterFile",
    "connAuthFile",
];

/// Placeholder rendered instead of a non-empty secret.
pub const REDACTED: &str = "******";

static DOMAIN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?i)[a-z0-9_](?:[a-z0-9_-]{0,61}[a-z0-9])?(?:\.[a-z0-9_](?:[a-z0-9_-]{0,61}[a-z0-9])?)*\.?$",
    )
    .expect("domain name regex is valid")
});

// ---------------------------------------------------------------------------
// Effective configuration
// ---------------------------------------------------------------------------

/// Configuration applied to a single BeeGFS file system, on top of whatever
/// the `beegfs-client.conf` template already contains.
///
/// The `connAuth` secret is not part of any serialized form.  Use
/// [`BeegfsConfig::diagnostic_view`] to log a configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BeegfsConfig {
    /// Network interfaces BeeGFS should use, in order of preference.
    pub conn_interfaces: Vec<String>,
    /// Subnets / addresses allowed for any connection.
    pub conn_net_filter: Vec<String>,
    /// Subnets / addresses restricted to TCP.
    pub conn_tcp_only_filter: Vec<String>,
    /// Arbitrary `beegfs-client.conf` overrides.
    pub beegfs_client_conf: BTreeMap<String, String>,
    pub(crate) conn_auth: Option<String>,
}

impl BeegfsConfig {
    /// The shared secret for this file system, if any.
    pub fn conn_auth(&self) -> Option<&str> {
        self.conn_auth.as_deref()
    }

    /// Set the shared secret.  An empty string clears it.
    pub fn set_conn_auth(&mut self, secret: impl Into<String>) {
        let secret = secret.into();
        self.conn_auth = (!secret.is_empty()).then_some(secret);
    }

    /// Overwrite only the fields `patch` explicitly sets.
    pub fn apply(&mut self, patch: &BeegfsConfigPatch) {
        fn replace(target: &mut Vec<String>, source: &Option<Vec<String>>) {
            if let Some(list) = source
                && !list.is_empty()
            {
                target.clone_from(list);
            }
        }
        replace(&mut self.conn_interfaces, &patch.conn_interfaces);
        replace(&mut self.conn_net_filter, &patch.conn_net_filter);
        replace(&mut self.conn_tcp_only_filter, &patch.conn_tcp_only_filter);
        if let Some(conf) = &patch.beegfs_client_conf {
            for (k, v) in conf {
                self.beegfs_client_conf.insert(k.clone(), v.clone());
            }
        }
        if let Some(secret) = &patch.conn_auth
            && !secret.is_empty()
        {
            self.conn_auth = Some(secret.clone());
        }
    }

    /// Overwrite only the fields `other` sets, treating it as a patch.
    pub fn overwrite_from(&mut self, other: &BeegfsConfig) {
        self.apply(&BeegfsConfigPatch::from(other));
    }

    /// A copy of this configuration that is safe to log.
    pub fn diagnostic_view(&self) -> BeegfsConfigView {
        BeegfsConfigView {
            conn_interfaces: self.conn_interfaces.clone(),
            conn_net_filter: self.conn_net_filter.clone(),
            conn_tcp_only_filter: self.conn_tcp_only_filter.clone(),
            beegfs_client_conf: self.beegfs_client_conf.clone(),
            conn_auth: redact(self.conn_auth.as_deref()),
        }
    }
}

impl fmt::Debug for BeegfsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeegfsConfig")
            .field("conn_interfaces", &self.conn_interfaces)
            .field("conn_net_filter", &self.conn_net_filter)
            .field("conn_tcp_only_filter", &self.conn_tcp_only_filter)
            .field("beegfs_client_conf", &self.beegfs_client_conf)
            .field("conn_auth", &redact(self.conn_auth.as_deref()))
            .finish()
    }
}

fn redact(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => REDACTED,
        _ => "",
    }
}

/// Log-safe copy of a [`BeegfsConfig`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeegfsConfigView {
    pub conn_interfaces: Vec<String>,
    pub conn_net_filter: Vec<String>,
    pub conn_tcp_only_filter: Vec<String>,
    pub beegfs_client_conf: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub conn_auth: &'static str,
}

// ---------------------------------------------------------------------------
// Patches (what the files contain)
// ---------------------------------------------------------------------------

/// One override layer of a [`BeegfsConfig`].  `None` means "not set here".
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BeegfsConfigPatch {
    #[serde(default)]
    pub conn_interfaces: Option<Vec<String>>,
    #[serde(default)]
    pub conn_net_filter: Option<Vec<String>>,
    #[serde(default)]
    pub conn_tcp_only_filter: Option<Vec<String>>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub beegfs_client_conf: Option<BTreeMap<String, String>>,
    /// Never read from the configuration file; only the authentication file
    /// populates it.
    #[serde(skip)]
    pub conn_auth: Option<String>,
}

impl From<&BeegfsConfig> for BeegfsConfigPatch {
    fn from(config: &BeegfsConfig) -> Self {
        Self {
            conn_interfaces: Some(config.conn_interfaces.clone()),
            conn_net_filter: Some(config.conn_net_filter.clone()),
            conn_tcp_only_filter: Some(config.conn_tcp_only_filter.clone()),
            beegfs_client_conf: Some(config.beegfs_client_conf.clone()),
            conn_auth: config.conn_auth.clone(),
        }
    }
}

/// Accept YAML strings, numbers and booleans as `beegfsClientConf` values.
fn scalar_map<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let Some(raw) = Option::<BTreeMap<String, Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    raw.into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(D::Error::custom(format!(
                        "beegfsClientConf value for {k} must be a scalar, got {other:?}"
                    )));
                }
            };
            Ok((k, v))
        })
        .collect::<Result<_, _>>()
        .map(Some)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct FileSystemSpecificPatch {
    sys_mgmtd_host: String,
    #[serde(default)]
    config: BeegfsConfigPatch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct NodeSpecificPatch {
    #[serde(default)]
    node_list: Vec<String>,
    #[serde(default)]
    config: BeegfsConfigPatch,
    #[serde(default)]
    file_system_specific_configs: Vec<FileSystemSpecificPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawPluginConfig {
    #[serde(default)]
    config: BeegfsConfigPatch,
    #[serde(default)]
    file_system_specific_configs: Vec<FileSystemSpecificPatch>,
    #[serde(default)]
    node_specific_configs: Vec<NodeSpecificPatch>,
}

/// One entry of the authentication file.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ConnAuthConfig {
    pub sys_mgmtd_host: String,
    pub conn_auth: String,
}

impl fmt::Debug for ConnAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnAuthConfig")
            .field("sys_mgmtd_host", &self.sys_mgmtd_host)
            .field("conn_auth", &redact(Some(&self.conn_auth)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// A [`BeegfsConfig`] that applies to one `sysMgmtdHost`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemSpecificConfig {
    pub sys_mgmtd_host: String,
    pub config: BeegfsConfig,
}

/// The resolved configuration the plugin runs with.
///
/// Built once at startup; node specific configuration has already been folded
/// in for the current node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginConfig {
    pub default_config: BeegfsConfig,
    pub file_system_specific_configs: Vec<FileSystemSpecificConfig>,
}

/// Log-safe copy of a [`PluginConfig`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfigView {
    pub config: BeegfsConfigView,
    pub file_system_specific_configs: Vec<FileSystemSpecificConfigView>,
}

/// Log-safe copy of a [`FileSystemSpecificConfig`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemSpecificConfigView {
    pub sys_mgmtd_host: String,
    pub config: BeegfsConfigView,
}

impl PluginConfig {
    /// Squash the default config and any override for `sys_mgmtd_host` into
    /// the effective configuration for that file system.
    pub fn config_for_host(&self, sys_mgmtd_host: &str) -> BeegfsConfig {
        let mut config = BeegfsConfig::default();
        config.overwrite_from(&self.default_config);
        for specific in &self.file_system_specific_configs {
            if specific.sys_mgmtd_host == sys_mgmtd_host {
                config.overwrite_from(&specific.config);
            }
        }
        config
    }

    /// A copy of this configuration that is safe to log.
    pub fn diagnostic_view(&self) -> PluginConfigView {
        PluginConfigView {
            config: self.default_config.diagnostic_view(),
            file_system_specific_configs: self
                .file_system_specific_configs
                .iter()
                .map(|c| FileSystemSpecificConfigView {
                    sys_mgmtd_host: c.sys_mgmtd_host.clone(),
                    config: c.config.diagnostic_view(),
                })
                .collect(),
        }
    }

    /// Render the log-safe view as JSON.
    pub fn to_diagnostic_json(&self) -> String {
        serde_json::to_string(&self.diagnostic_view())
            .unwrap_or_else(|e| format!("<unserializable config: {e}>"))
    }

    /// Merge `patch` into the override for `sys_mgmtd_host`, adding a new
    /// override if none exists yet.
    fn merge_file_system_specific(&mut self, sys_mgmtd_host: &str, patch: &BeegfsConfigPatch) {
        match self
            .file_system_specific_configs
            .iter_mut()
            .find(|c| c.sys_mgmtd_host == sys_mgmtd_host)
        {
            Some(existing) => existing.config.apply(patch),
            None => {
                let mut config = BeegfsConfig::default();
                config.apply(patch);
                self.file_system_specific_configs.push(FileSystemSpecificConfig {
                    sys_mgmtd_host: sys_mgmtd_host.to_owned(),
                    config,
                });
            }
        }
    }

    fn all_configs_mut(&mut self) -> impl Iterator<Item = &mut BeegfsConfig> {
        std::iter::once(&mut self.default_config).chain(
            self.file_system_specific_configs
                .iter_mut()
                .map(|c| &mut c.config),
        )
    }

    /// Reject hosts and network filters that are not syntactically valid.
    pub fn validate(&self) -> Result<(), CsiError> {
        for specific in &self.file_system_specific_configs {
            if !is_valid_host(&specific.sys_mgmtd_host) {
                return Err(CsiError::InvalidConfig(format!(
                    "invalid sysMgmtdHost {}",
                    specific.sys_mgmtd_host
                )));
            }
        }
        let configs = std::iter::once(&self.default_config).chain(
            self.file_system_specific_configs
                .iter()
                .map(|c| &c.config),
        );
        for config in configs {
            if let Some(bad) = config.conn_net_filter.iter().find(|f| !is_valid_filter(f)) {
                return Err(CsiError::InvalidConfig(format!("invalid connNetFilter {bad}")));
            }
            if let Some(bad) = config
                .conn_tcp_only_filter
                .iter()
                .find(|f| !is_valid_filter(f))
            {
                return Err(CsiError::InvalidConfig(format!(
                    "invalid connTcpOnlyFilter {bad}"
                )));
            }
        }
        Ok(())
    }

    /// Remove no-effect `beegfsClientConf` options and warn about
    /// unsupported ones.
    pub fn strip(&mut self) {
        for config in self.all_configs_mut() {
            for option in NO_EFFECT_CLIENT_CONF_OPTIONS {
                if let Some(value) = config.beegfs_client_conf.remove(option) {
                    warn!(
                        option,
                        value = %value,
                        "no-effect beegfsClientConf option found and removed from config"
                    );
                }
            }
            for option in UNSUPPORTED_CLIENT_CONF_OPTIONS {
                if let Some(value) = config.beegfs_client_conf.get(option) {
                    warn!(
                        option,
                        value = %value,
                        "unsupported beegfsClientConf option found and left in config"
                    );
                }
            }
        }
    }
}

/// `localhost`, an IP literal, or a syntactically valid domain name.
///
/// A name whose last label is all digits (`999.999.999.999`, `1.2.3`) is a
/// malformed address, not a domain name.
pub fn is_valid_host(host: &str) -> bool {
    host == "localhost" || host.parse::<IpAddr>().is_ok() || is_domain_name(host)
}

fn is_domain_name(host: &str) -> bool {
    let last_label = host.trim_end_matches('.').rsplit('.').next().unwrap_or_default();
    DOMAIN_NAME.is_match(host) && !last_label.bytes().all(|b| b.is_ascii_digit())
}

/// An IP literal or a CIDR block.
pub fn is_valid_filter(filter: &str) -> bool {
    match filter.split_once('/') {
        None => filter.parse::<IpAddr>().is_ok(),
        Some((addr, prefix)) => {
            let Ok(addr) = addr.parse::<IpAddr>() else {
                return false;
            };
            let max = if addr.is_ipv4() { 32 } else { 128 };
            prefix.bytes().all(|b| b.is_ascii_digit())
                && prefix.parse::<u8>().is_ok_and(|p| p <= max)
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Parse the plugin configuration file and fold in everything that applies
/// to `node_id`.  The result is neither validated nor stripped.
fn merge_plugin_config(raw: &[u8], node_id: &str) -> Result<PluginConfig, CsiError> {
    let raw: RawPluginConfig = if raw.iter().all(u8::is_ascii_whitespace) {
        RawPluginConfig::default()
    } else {
        serde_yaml::from_slice(raw)
            .map_err(|e| CsiError::config(format!("failed to unmarshal configuration file: {e}")))?
    };
    debug!(
        node_specific_configs = raw.node_specific_configs.len(),
        file_system_specific_configs = raw.file_system_specific_configs.len(),
        "raw configuration parsed"
    );

    let mut config = PluginConfig::default();
    config.default_config.apply(&raw.config);
    for specific in &raw.file_system_specific_configs {
        config.merge_file_system_specific(&specific.sys_mgmtd_host, &specific.config);
    }

    for node_config in &raw.node_specific_configs {
        if !node_config.node_list.iter().any(|n| n == node_id) {
            continue;
        }
        debug!(node_id, "applying node specific configuration");
        config.default_config.apply(&node_config.config);
        for specific in &node_config.file_system_specific_configs {
            config.merge_file_system_specific(&specific.sys_mgmtd_host, &specific.config);
        }
    }
    Ok(config)
}

/// Merge the authentication file into `config`.
fn merge_conn_auth(raw: &[u8], config: &mut PluginConfig) -> Result<(), CsiError> {
    let entries: Vec<ConnAuthConfig> = if raw.iter().all(u8::is_ascii_whitespace) {
        Vec::new()
    } else {
        serde_yaml::from_slice(raw)
            .map_err(|e| CsiError::config(format!("failed to unmarshal connAuth file: {e}")))?
    };
    debug!(?entries, "raw connAuth configuration parsed");

    for entry in entries {
        let patch = BeegfsConfigPatch {
            conn_auth: Some(entry.conn_auth),
            ..Default::default()
        };
        config.merge_file_system_specific(&entry.sys_mgmtd_host, &patch);
    }
    Ok(())
}

/// Resolve the effective [`PluginConfig`] for `node_id`.
///
/// `raw_config` is the content of the configuration file and `raw_conn_auth`
/// the content of the optional authentication file.  Any parse or validation
/// failure rejects the whole configuration.
pub fn resolve(
    raw_config: &[u8],
    raw_conn_auth: Option<&[u8]>,
    node_id: &str,
) -> Result<PluginConfig, CsiError> {
    let mut config = merge_plugin_config(raw_config, node_id)?;
    if let Some(raw) = raw_conn_auth {
        merge_conn_auth(raw, &mut config)?;
    }
    debug!(config = %config.to_diagnostic_json(), "merged configuration");

    config
        .validate()
        .map_err(|e| CsiError::config(format!("config validation failed: {e}")))?;
    config.strip();
    debug!(config = %config.to_diagnostic_json(), "actual configuration to be applied");
    Ok(config)
}

/// Read the configuration (and optional authentication) file and resolve it
/// for `node_id`.  Without a configuration file the defaults are empty.
pub async fn load(
    config_path: Option<&Path>,
    conn_auth_path: Option<&Path>,
    node_id: &str,
) -> Result<PluginConfig, CsiError> {
    let raw_config = match config_path {
        Some(path) => tokio::fs::read(path).await.map_err(|e| {
            CsiError::config(format!(
                "failed to read configuration file {}: {e}",
                path.display()
            ))
        })?,
        None => Vec::new(),
    };
    let raw_conn_auth = match conn_auth_path {
        Some(path) => Some(tokio::fs::read(path).await.map_err(|e| {
            CsiError::config(format!("failed to read connAuth file {}: {e}", path.display()))
        })?),
        None => None,
    };
    resolve(&raw_config, raw_conn_auth.as_deref(), node_id)
}
