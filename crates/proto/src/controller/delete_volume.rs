use crate::{proto, utils::require_non_empty};
use std::convert::TryFrom;

#[derive(Debug)]
pub struct DeleteVolumeRequest {
  volume_id: String,
}

impl DeleteVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }
}

impl TryFrom<proto::DeleteVolumeRequest> for DeleteVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::DeleteVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(value.volume_id, "DeleteVolumeRequest.volume_id is empty")?;

    Ok(DeleteVolumeRequest { volume_id })
  }
}
