use crate::{
  proto,
  utils::{absolute_path, require_non_empty},
};
use std::{
  convert::TryFrom,
  path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct NodeUnstageVolumeRequest {
  volume_id: String,
  staging_target_path: PathBuf,
}

impl NodeUnstageVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn staging_target_path(&self) -> &Path {
    &self.staging_target_path
  }
}

impl TryFrom<proto::NodeUnstageVolumeRequest> for NodeUnstageVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeUnstageVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(value.volume_id, "NodeUnstageVolumeRequest.volume_id is empty")?;
    let staging_target_path = absolute_path(
      value.staging_target_path,
      "NodeUnstageVolumeRequest.staging_target_path",
    )?;

    Ok(NodeUnstageVolumeRequest {
      volume_id,
      staging_target_path,
    })
  }
}
