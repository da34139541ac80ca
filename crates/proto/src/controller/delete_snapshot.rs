use crate::{proto, utils::require_non_empty};
use std::convert::TryFrom;

#[derive(Debug)]
pub struct DeleteSnapshotRequest {
  snapshot_id: String,
}

impl DeleteSnapshotRequest {
  #[inline]
  pub fn snapshot_id(&self) -> &str {
    &self.snapshot_id
  }
}

impl TryFrom<proto::DeleteSnapshotRequest> for DeleteSnapshotRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::DeleteSnapshotRequest) -> Result<Self, Self::Error> {
    let snapshot_id = require_non_empty(
      value.snapshot_id,
      "DeleteSnapshotRequest.snapshot_id is empty",
    )?;

    Ok(DeleteSnapshotRequest { snapshot_id })
  }
}
