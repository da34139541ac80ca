use super::VolumeCapability;
use crate::{proto, utils::require_non_empty};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};

#[derive(Debug)]
pub struct ControllerPublishVolumeRequest {
  volume_id: String,
  node_id: String,
  volume_capability: VolumeCapability,
  readonly: bool,
  volume_context: HashMap<String, String>,
}

impl ControllerPublishVolumeRequest {
  /// The ID of the volume to be used on a node.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The ID of the node, as returned by `NodeGetInfo`.
  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  /// Volume capability describing how the CO intends to use this volume.
  #[inline]
  pub fn volume_capability(&self) -> &VolumeCapability {
    &self.volume_capability
  }

  /// Indicates SP MUST publish the volume in readonly mode.
  #[inline]
  pub fn readonly(&self) -> bool {
    self.readonly
  }

  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<proto::ControllerPublishVolumeRequest> for ControllerPublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerPublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(
      value.volume_id,
      "ControllerPublishVolumeRequest.volume_id is empty",
    )?;

    let node_id = require_non_empty(
      value.node_id,
      "ControllerPublishVolumeRequest.node_id is empty",
    )?;

    let volume_capability = match value.volume_capability {
      None => {
        return Err(tonic::Status::invalid_argument(
          "ControllerPublishVolumeRequest.volume_capability missing",
        ))
      }
      Some(v) => v.try_into()?,
    };

    Ok(ControllerPublishVolumeRequest {
      volume_id,
      node_id,
      volume_capability,
      readonly: value.readonly,
      volume_context: value.volume_context,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerPublishVolumeResponse {
  /// Opaque static publish properties of the volume, passed on to
  /// subsequent `NodeStageVolume` and `NodePublishVolume` calls.
  publish_context: HashMap<String, String>,
}

impl ControllerPublishVolumeResponse {
  pub fn new(publish_context: HashMap<String, String>) -> Self {
    ControllerPublishVolumeResponse { publish_context }
  }

  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }
}

impl From<ControllerPublishVolumeResponse> for proto::ControllerPublishVolumeResponse {
  fn from(value: ControllerPublishVolumeResponse) -> Self {
    proto::ControllerPublishVolumeResponse {
      publish_context: value.publish_context,
    }
  }
}
