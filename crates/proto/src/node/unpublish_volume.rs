use crate::{
  proto,
  utils::{absolute_path, require_non_empty},
};
use std::{
  convert::TryFrom,
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodeUnpublishVolumeRequest {
  volume_id: String,
  target_path: PathBuf,
}

impl NodeUnpublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The path at which the volume was published.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }
}

impl TryFrom<proto::NodeUnpublishVolumeRequest> for NodeUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(
      value.volume_id,
      "NodeUnpublishVolumeRequest.volume_id is empty",
    )?;
    let target_path = absolute_path(value.target_path, "NodeUnpublishVolumeRequest.target_path")?;

    Ok(NodeUnpublishVolumeRequest {
      volume_id,
      target_path,
    })
  }
}
