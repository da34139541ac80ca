use super::Snapshot;
use crate::{proto, utils::optional};
use std::{convert::TryFrom, num::NonZeroU32};

#[derive(Debug)]
pub struct ListSnapshotsRequest {
  max_entries: Option<NonZeroU32>,
  starting_token: Option<String>,
  source_volume_id: Option<String>,
  snapshot_id: Option<String>,
}

impl ListSnapshotsRequest {
  #[inline]
  pub fn max_entries(&self) -> Option<NonZeroU32> {
    self.max_entries
  }

  #[inline]
  pub fn starting_token(&self) -> Option<&str> {
    self.starting_token.as_deref()
  }

  /// Only list snapshots cut from this volume.
  #[inline]
  pub fn source_volume_id(&self) -> Option<&str> {
    self.source_volume_id.as_deref()
  }

  /// Only list the snapshot with this ID.
  #[inline]
  pub fn snapshot_id(&self) -> Option<&str> {
    self.snapshot_id.as_deref()
  }
}

impl TryFrom<proto::ListSnapshotsRequest> for ListSnapshotsRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ListSnapshotsRequest) -> Result<Self, Self::Error> {
    let max_entries = match value.max_entries {
      v if v < 0 => {
        return Err(tonic::Status::invalid_argument(
          "ListSnapshotsRequest.max_entries was less than 0",
        ))
      }
      v => NonZeroU32::new(v as u32),
    };

    Ok(ListSnapshotsRequest {
      max_entries,
      starting_token: optional(value.starting_token),
      source_volume_id: optional(value.source_volume_id),
      snapshot_id: optional(value.snapshot_id),
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshotsResponse {
  entries: Vec<Snapshot>,
  next_token: Option<String>,
}

impl ListSnapshotsResponse {
  pub fn new(entries: Vec<Snapshot>, next_token: Option<String>) -> Self {
    ListSnapshotsResponse {
      entries,
      next_token,
    }
  }

  #[inline]
  pub fn entries(&self) -> &[Snapshot] {
    &self.entries
  }

  #[inline]
  pub fn next_token(&self) -> Option<&str> {
    self.next_token.as_deref()
  }
}

impl From<ListSnapshotsResponse> for proto::ListSnapshotsResponse {
  fn from(value: ListSnapshotsResponse) -> Self {
    proto::ListSnapshotsResponse {
      entries: value
        .entries
        .into_iter()
        .map(|snapshot| proto::list_snapshots_response::Entry {
          snapshot: Some(snapshot.into()),
        })
        .collect(),
      next_token: value.next_token.unwrap_or_default(),
    }
  }
}
