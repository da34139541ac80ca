use crate::proto;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
  size_bytes: u64,
  snapshot_id: String,
  source_volume_id: String,
  creation_time: Option<SystemTime>,
  ready_to_use: bool,
}

impl Snapshot {
  pub fn new(
    snapshot_id: impl Into<String>,
    source_volume_id: impl Into<String>,
    size_bytes: u64,
    creation_time: Option<SystemTime>,
    ready_to_use: bool,
  ) -> Self {
    Snapshot {
      size_bytes,
      snapshot_id: snapshot_id.into(),
      source_volume_id: source_volume_id.into(),
      creation_time,
      ready_to_use,
    }
  }

  #[inline]
  pub fn snapshot_id(&self) -> &str {
    &self.snapshot_id
  }

  #[inline]
  pub fn source_volume_id(&self) -> &str {
    &self.source_volume_id
  }

  #[inline]
  pub fn size_bytes(&self) -> u64 {
    self.size_bytes
  }

  #[inline]
  pub fn ready_to_use(&self) -> bool {
    self.ready_to_use
  }
}

impl From<Snapshot> for proto::Snapshot {
  fn from(value: Snapshot) -> Self {
    proto::Snapshot {
      size_bytes: value.size_bytes as i64,
      snapshot_id: value.snapshot_id,
      source_volume_id: value.source_volume_id,
      creation_time: value.creation_time.map(Into::into),
      ready_to_use: value.ready_to_use,
    }
  }
}

impl From<Snapshot> for proto::CreateSnapshotResponse {
  fn from(value: Snapshot) -> Self {
    proto::CreateSnapshotResponse {
      snapshot: Some(value.into()),
    }
  }
}
