use super::{CapacityRange, VolumeCapability};
use crate::{
  proto,
  utils::{absolute_path, optional_absolute_path, require_non_empty},
  volume::capacity_range,
};
use std::{
  convert::{TryFrom, TryInto},
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodeExpandVolumeRequest {
  volume_id: String,
  volume_path: PathBuf,
  capacity_range: Option<CapacityRange>,
  staging_target_path: Option<PathBuf>,
  volume_capability: Option<VolumeCapability>,
}

impl NodeExpandVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The path on which volume is available.
  #[inline]
  pub fn volume_path(&self) -> &Path {
    &self.volume_path
  }

  /// If omitted the plugin MAY expand the filesystem to the size of the
  /// underlying device.
  #[inline]
  pub fn capacity_range(&self) -> Option<CapacityRange> {
    self.capacity_range
  }

  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }

  /// Block volumes skip the filesystem resize.
  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }
}

impl TryFrom<proto::NodeExpandVolumeRequest> for NodeExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeExpandVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(value.volume_id, "NodeExpandVolumeRequest.volume_id is empty")?;
    let volume_path = absolute_path(value.volume_path, "NodeExpandVolumeRequest.volume_path")?;
    let staging_target_path = optional_absolute_path(
      value.staging_target_path,
      "NodeExpandVolumeRequest.staging_target_path",
    )?;

    let capacity_range = capacity_range(value.capacity_range)?;
    let volume_capability = value
      .volume_capability
      .map(TryInto::try_into)
      .transpose()?;

    Ok(NodeExpandVolumeRequest {
      volume_id,
      volume_path,
      capacity_range,
      staging_target_path,
      volume_capability,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeExpandVolumeResponse {
  capacity_bytes: u64,
}

impl NodeExpandVolumeResponse {
  pub fn new(capacity_bytes: u64) -> Self {
    NodeExpandVolumeResponse { capacity_bytes }
  }

  #[inline]
  pub fn capacity_bytes(&self) -> u64 {
    self.capacity_bytes
  }
}

impl From<NodeExpandVolumeResponse> for proto::NodeExpandVolumeResponse {
  fn from(value: NodeExpandVolumeResponse) -> Self {
    proto::NodeExpandVolumeResponse {
      capacity_bytes: value.capacity_bytes as i64,
    }
  }
}
