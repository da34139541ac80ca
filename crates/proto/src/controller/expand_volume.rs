use super::{CapacityRange, VolumeCapability};
use crate::{proto, utils::require_non_empty, volume::capacity_range};
use std::convert::{TryFrom, TryInto};

#[derive(Debug)]
pub struct ControllerExpandVolumeRequest {
  volume_id: String,
  capacity_range: CapacityRange,
  volume_capability: Option<VolumeCapability>,
}

impl ControllerExpandVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The new size the volume should be grown to.
  #[inline]
  pub fn capacity_range(&self) -> CapacityRange {
    self.capacity_range
  }

  /// The capability the volume is published with, when known.
  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }
}

impl TryFrom<proto::ControllerExpandVolumeRequest> for ControllerExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerExpandVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(
      value.volume_id,
      "ControllerExpandVolumeRequest.volume_id is empty",
    )?;

    let capacity_range = capacity_range(value.capacity_range)?.ok_or_else(|| {
      tonic::Status::invalid_argument("ControllerExpandVolumeRequest.capacity_range missing")
    })?;

    let volume_capability = value
      .volume_capability
      .map(TryInto::try_into)
      .transpose()?;

    Ok(ControllerExpandVolumeRequest {
      volume_id,
      capacity_range,
      volume_capability,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerExpandVolumeResponse {
  capacity_bytes: u64,
  node_expansion_required: bool,
}

impl ControllerExpandVolumeResponse {
  pub fn new(capacity_bytes: u64, node_expansion_required: bool) -> Self {
    ControllerExpandVolumeResponse {
      capacity_bytes,
      node_expansion_required,
    }
  }

  #[inline]
  pub fn capacity_bytes(&self) -> u64 {
    self.capacity_bytes
  }

  #[inline]
  pub fn node_expansion_required(&self) -> bool {
    self.node_expansion_required
  }
}

impl From<ControllerExpandVolumeResponse> for proto::ControllerExpandVolumeResponse {
  fn from(value: ControllerExpandVolumeResponse) -> Self {
    proto::ControllerExpandVolumeResponse {
      capacity_bytes: value.capacity_bytes as i64,
      node_expansion_required: value.node_expansion_required,
    }
  }
}
