use crate::{proto, utils::require_non_empty};
use std::convert::TryFrom;

#[derive(Debug)]
pub struct ControllerUnpublishVolumeRequest {
  volume_id: String,
  node_id: String,
}

impl ControllerUnpublishVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }
}

impl TryFrom<proto::ControllerUnpublishVolumeRequest> for ControllerUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(
      value.volume_id,
      "ControllerUnpublishVolumeRequest.volume_id is empty",
    )?;

    let node_id = require_non_empty(
      value.node_id,
      "ControllerUnpublishVolumeRequest.node_id is empty",
    )?;

    Ok(ControllerUnpublishVolumeRequest { volume_id, node_id })
  }
}
