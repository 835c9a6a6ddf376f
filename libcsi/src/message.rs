//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between a CSI client (the container orchestrator side)
//! and the controller plugin via QUIC bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Identity requests -----------------------------------------------
    /// Health probe.
    Probe,
    /// Query plugin info.
    GetPluginInfo,
    /// Query plugin capabilities.
    GetPluginCapabilities,

    // ----- Controller requests ---------------------------------------------
    /// Create a new volume.
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume.
    DeleteVolume(VolumeId),
    /// Validate volume capabilities.
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    /// Query the Controller RPCs the plugin implements.
    ControllerGetCapabilities,
    /// List all known volumes.
    ListVolumes,
    /// Query remaining capacity.
    GetCapacity,
    /// Attach a volume to a node.
    ControllerPublishVolume { volume_id: VolumeId, node_id: String },
    /// Detach a volume from a node.
    ControllerUnpublishVolume { volume_id: VolumeId, node_id: String },
    /// Snapshot a volume.
    CreateSnapshot {
        source_volume_id: VolumeId,
        name: String,
    },
    /// Delete a snapshot.
    DeleteSnapshot(String),
    /// List snapshots.
    ListSnapshots,
    /// Grow a volume.
    ControllerExpandVolume {
        volume_id: VolumeId,
        capacity_bytes: u64,
    },
    /// Fetch the current state of a volume.
    ControllerGetVolume(VolumeId),

    // ----- Responses -------------------------------------------------------
    /// A volume was successfully created.
    VolumeCreated(Volume),
    /// A single volume.
    VolumeResponse(Volume),
    /// A list of volumes.
    VolumeList(Vec<Volume>),
    /// A list of snapshot identifiers.
    SnapshotList(Vec<String>),
    /// Available capacity in bytes.
    Capacity(u64),
    /// Outcome of a capability validation.
    CapabilitiesValidated(ValidateVolumeCapabilitiesResponse),
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// Probe result.
    ProbeResult(bool),
    /// An error occurred.
    Error(CsiError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({id})"),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({volume_id})")
            }
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::ListVolumes => f.write_str("ListVolumes"),
            Self::GetCapacity => f.write_str("GetCapacity"),
            Self::ControllerPublishVolume { volume_id, node_id } => {
                write!(f, "ControllerPublishVolume({volume_id}, node={node_id})")
            }
            Self::ControllerUnpublishVolume { volume_id, node_id } => {
                write!(f, "ControllerUnpublishVolume({volume_id}, node={node_id})")
            }
            Self::CreateSnapshot {
                source_volume_id,
                name,
            } => write!(f, "CreateSnapshot({source_volume_id}, name={name})"),
            Self::DeleteSnapshot(id) => write!(f, "DeleteSnapshot({id})"),
            Self::ListSnapshots => f.write_str("ListSnapshots"),
            Self::ControllerExpandVolume {
                volume_id,
                capacity_bytes,
            } => write!(f, "ControllerExpandVolume({volume_id}, {capacity_bytes})"),
            Self::ControllerGetVolume(id) => write!(f, "ControllerGetVolume({id})"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::VolumeResponse(v) => write!(f, "Volume({})", v.volume_id),
            Self::VolumeList(vs) => write!(f, "VolumeList(count={})", vs.len()),
            Self::SnapshotList(ss) => write!(f, "SnapshotList(count={})", ss.len()),
            Self::Capacity(c) => write!(f, "Capacity({c})"),
            Self::CapabilitiesValidated(resp) => {
                write!(f, "CapabilitiesValidated(confirmed={})", resp.is_confirmed())
            }
            Self::PluginInfoResponse(info) => {
                write!(f, "PluginInfo(name={})", info.name)
            }
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::Error(e) => write!(f, "Error({}: {e})", e.code()),
        }
    }
}
