use super::VolumeCapability;
use crate::{
  proto,
  utils::{absolute_path, require_non_empty},
};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodeStageVolumeRequest {
  volume_id: String,
  publish_context: HashMap<String, String>,
  staging_target_path: PathBuf,
  volume_capability: VolumeCapability,
  volume_context: HashMap<String, String>,
}

impl NodeStageVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The value returned by `ControllerPublishVolume` for this volume and node.
  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }

  /// The path to which the volume MAY be staged. The CO SHALL ensure that there
  /// is only one `staging_target_path` per volume.
  #[inline]
  pub fn staging_target_path(&self) -> &Path {
    &self.staging_target_path
  }

  #[inline]
  pub fn volume_capability(&self) -> &VolumeCapability {
    &self.volume_capability
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<proto::NodeStageVolumeRequest> for NodeStageVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeStageVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(value.volume_id, "NodeStageVolumeRequest.volume_id is empty")?;
    let staging_target_path = absolute_path(
      value.staging_target_path,
      "NodeStageVolumeRequest.staging_target_path",
    )?;

    let volume_capability = match value.volume_capability {
      None => {
        return Err(tonic::Status::invalid_argument(
          "NodeStageVolumeRequest.volume_capability is missing",
        ))
      }
      Some(v) => v.try_into()?,
    };

    Ok(NodeStageVolumeRequest {
      volume_id,
      publish_context: value.publish_context,
      staging_target_path,
      volume_capability,
      volume_context: value.volume_context,
    })
  }
}
