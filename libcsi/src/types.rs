//! Core CSI types: volumes, capabilities, requests, and plugin metadata.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
///
/// Backends are free to choose the format.  The BeeGFS backend uses
/// self-describing URLs of the form `beegfs://<sysMgmtdHost>/<path>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
///
/// Mirrors the CSI `VolumeCapability.AccessMode.Mode` enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Mode not set by the caller.
    Unknown,
    /// Can only be published once as read/write on a single node.
    SingleNodeWriter,
    /// Can only be published once as read-only on a single node.
    SingleNodeReaderOnly,
    /// Can be published as read-only at multiple nodes.
    MultiNodeReaderOnly,
    /// Can be published at multiple nodes, only one of which may write.
    MultiNodeSingleWriter,
    /// Can be published as read/write at multiple nodes.
    MultiNodeMultiWriter,
    /// Can only be published as read/write at a single workload on one node.
    SingleNodeSingleWriter,
    /// Can be published as read/write at multiple workloads on one node.
    SingleNodeMultiWriter,
}

/// How the volume is presented to the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// Raw block device.
    Block,
    /// Mounted file system.
    Mount {
        /// Requested file system type; empty means "backend default".
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"noatime"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Requested access type.
    pub access_type: AccessType,
}

impl VolumeCapability {
    /// A file-system capability with the given access mode and no extra flags.
    pub fn mount(access_mode: AccessMode) -> Self {
        Self {
            access_mode,
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            },
        }
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self::mount(AccessMode::SingleNodeWriter)
    }
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Metadata for a provisioned volume, as returned by `CreateVolume`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes.  Zero means "unknown / unlimited".
    #[serde(default)]
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Requests & responses
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Name suggested by the orchestrator; used as the directory name.
    pub name: String,
    /// Desired capacity in bytes.  Not enforced by file-system backends.
    #[serde(default)]
    pub capacity_bytes: u64,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Arbitrary parameters forwarded to the backend (storage class).
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Result of `ValidateVolumeCapabilities`.
///
/// Exactly one of `confirmed` / `message` is meaningful: a confirmed response
/// echoes the validated capabilities, an unconfirmed one explains why.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Capabilities the plugin confirmed, or `None` if not confirmed.
    #[serde(default)]
    pub confirmed: Option<Vec<VolumeCapability>>,
    /// Reason the capabilities were not confirmed.
    #[serde(default)]
    pub message: String,
}

impl ValidateVolumeCapabilitiesResponse {
    /// Whether the requested capabilities were confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }
}

// ---------------------------------------------------------------------------
// Plugin info & capabilities
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"rk8s.beegfs.csi"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// RPCs supported by the Controller service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    /// `CreateVolume` and `DeleteVolume`.
    CreateDeleteVolume,
    /// `ControllerPublishVolume` and `ControllerUnpublishVolume`.
    PublishUnpublishVolume,
    /// `ListVolumes`.
    ListVolumes,
    /// `GetCapacity`.
    GetCapacity,
    /// `CreateSnapshot` and `DeleteSnapshot`.
    CreateDeleteSnapshot,
    /// `ControllerExpandVolume`.
    ExpandVolume,
}
