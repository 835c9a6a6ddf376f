//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion and capability validation.  The remaining Controller RPCs have
//! default bodies that report [`CsiError::Unimplemented`], so a backend only
//! overrides what it actually supports and advertises through
//! [`CsiController::get_capabilities`].

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, CreateVolumeRequest, ValidateVolumeCapabilitiesResponse, Volume,
    VolumeCapability, VolumeId,
};

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// Must be idempotent: creating a volume that already exists with the
    /// same name and parameters returns the same [`Volume`].
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.  Deleting a volume that no
    /// longer exists succeeds.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    ///
    /// Unsupported capabilities are reported through an unconfirmed
    /// response, not an error.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError>;

    /// Advertise the Controller RPCs this plugin implements.
    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    /// List all volumes known to this controller.
    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        Err(CsiError::Unimplemented("ListVolumes".into()))
    }

    /// Return the total available capacity in bytes.
    async fn get_capacity(&self) -> Result<u64, CsiError> {
        Err(CsiError::Unimplemented("GetCapacity".into()))
    }

    /// Make a volume available on the given node.
    async fn controller_publish_volume(
        &self,
        _volume_id: &VolumeId,
        _node_id: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ControllerPublishVolume".into()))
    }

    /// Revoke a volume from the given node.
    async fn controller_unpublish_volume(
        &self,
        _volume_id: &VolumeId,
        _node_id: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ControllerUnpublishVolume".into()))
    }

    /// Snapshot a volume.
    async fn create_snapshot(
        &self,
        _source_volume_id: &VolumeId,
        _name: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("CreateSnapshot".into()))
    }

    /// Delete a snapshot.
    async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("DeleteSnapshot".into()))
    }

    /// List snapshot identifiers.
    async fn list_snapshots(&self) -> Result<Vec<String>, CsiError> {
        Err(CsiError::Unimplemented("ListSnapshots".into()))
    }

    /// Grow a volume to at least `capacity_bytes`.
    async fn expand_volume(
        &self,
        _volume_id: &VolumeId,
        _capacity_bytes: u64,
    ) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("ControllerExpandVolume".into()))
    }

    /// Fetch the current state of a volume.
    async fn get_volume(&self, _volume_id: &VolumeId) -> Result<Volume, CsiError> {
        Err(CsiError::Unimplemented("ControllerGetVolume".into()))
    }
}
