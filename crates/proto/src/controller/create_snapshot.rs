use crate::{proto, utils::require_non_empty};
use std::{collections::HashMap, convert::TryFrom};

#[derive(Debug)]
pub struct CreateSnapshotRequest {
  source_volume_id: String,
  name: String,
  parameters: HashMap<String, String>,
}

impl CreateSnapshotRequest {
  /// The ID of the source volume to be snapshotted.
  #[inline]
  pub fn source_volume_id(&self) -> &str {
    &self.source_volume_id
  }

  /// The suggested name for the snapshot. Also the idempotency key.
  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }
}

impl TryFrom<proto::CreateSnapshotRequest> for CreateSnapshotRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::CreateSnapshotRequest) -> Result<Self, Self::Error> {
    let source_volume_id = require_non_empty(
      value.source_volume_id,
      "CreateSnapshotRequest.source_volume_id is empty",
    )?;
    let name = require_non_empty(value.name, "CreateSnapshotRequest.name is empty")?;

    Ok(CreateSnapshotRequest {
      source_volume_id,
      name,
      parameters: value.parameters,
    })
  }
}
