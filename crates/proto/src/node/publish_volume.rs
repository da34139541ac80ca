use super::VolumeCapability;
use crate::{
  proto,
  utils::{absolute_path, optional_absolute_path, require_non_empty},
};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodePublishVolumeRequest {
  volume_id: String,
  publish_context: HashMap<String, String>,
  staging_target_path: Option<PathBuf>,
  target_path: PathBuf,
  volume_capability: VolumeCapability,
  readonly: bool,
  volume_context: HashMap<String, String>,
}

impl NodePublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }

  /// The path to which the volume was staged by `NodeStageVolume`.
  /// It MUST be set if the Node Plugin implements the
  /// `STAGE_UNSTAGE_VOLUME` node capability.
  #[inline]
  pub fn staging_target_path(&self) -> Option<&Path> {
    self.staging_target_path.as_deref()
  }

  /// The path to which the volume will be published. For block volumes this
  /// is a file the device is bound onto, otherwise a directory. Creating it is
  /// the responsibility of the plugin.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }

  #[inline]
  pub fn volume_capability(&self) -> &VolumeCapability {
    &self.volume_capability
  }

  /// Indicates SP MUST publish the volume in readonly mode.
  #[inline]
  pub fn readonly(&self) -> bool {
    self.readonly
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<proto::NodePublishVolumeRequest> for NodePublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodePublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(value.volume_id, "NodePublishVolumeRequest.volume_id is empty")?;
    let staging_target_path = optional_absolute_path(
      value.staging_target_path,
      "NodePublishVolumeRequest.staging_target_path",
    )?;
    let target_path = absolute_path(value.target_path, "NodePublishVolumeRequest.target_path")?;

    let volume_capability = match value.volume_capability {
      None => {
        return Err(tonic::Status::invalid_argument(
          "NodePublishVolumeRequest.volume_capability missing",
        ))
      }
      Some(v) => v.try_into()?,
    };

    Ok(NodePublishVolumeRequest {
      volume_id,
      publish_context: value.publish_context,
      staging_target_path,
      target_path,
      volume_capability,
      readonly: value.readonly,
      volume_context: value.volume_context,
    })
  }
}
