use super::{Volume, VolumeStatus};
use crate::{proto, utils::optional};
use std::{convert::TryFrom, num::NonZeroU32};

#[derive(Debug)]
pub struct ListVolumesRequest {
  max_entries: Option<NonZeroU32>,
  starting_token: Option<String>,
}

impl ListVolumesRequest {
  /// If set, the plugin MUST NOT return more entries than this number.
  #[inline]
  pub fn max_entries(&self) -> Option<NonZeroU32> {
    self.max_entries
  }

  /// The `next_token` of a previous `ListVolumes` call.
  #[inline]
  pub fn starting_token(&self) -> Option<&str> {
    self.starting_token.as_deref()
  }
}

impl TryFrom<proto::ListVolumesRequest> for ListVolumesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ListVolumesRequest) -> Result<Self, Self::Error> {
    let max_entries = match value.max_entries {
      v if v < 0 => {
        return Err(tonic::Status::invalid_argument(
          "ListVolumesRequest.max_entries was less than 0",
        ))
      }
      v => NonZeroU32::new(v as u32),
    };

    Ok(ListVolumesRequest {
      max_entries,
      starting_token: optional(value.starting_token),
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeListEntry {
  volume: Volume,
  status: Option<VolumeStatus>,
}

impl VolumeListEntry {
  pub fn new(volume: Volume, status: Option<VolumeStatus>) -> Self {
    VolumeListEntry { volume, status }
  }

  #[inline]
  pub fn volume(&self) -> &Volume {
    &self.volume
  }

  #[inline]
  pub fn status(&self) -> Option<&VolumeStatus> {
    self.status.as_ref()
  }
}

impl From<VolumeListEntry> for proto::list_volumes_response::Entry {
  fn from(value: VolumeListEntry) -> Self {
    proto::list_volumes_response::Entry {
      volume: Some(value.volume.into()),
      status: value.status.map(Into::into),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListVolumesResponse {
  entries: Vec<VolumeListEntry>,
  /// Continuation token for the next page. `None` on the last page.
  next_token: Option<String>,
}

impl ListVolumesResponse {
  pub fn new(entries: Vec<VolumeListEntry>, next_token: Option<String>) -> Self {
    ListVolumesResponse {
      entries,
      next_token,
    }
  }

  #[inline]
  pub fn entries(&self) -> &[VolumeListEntry] {
    &self.entries
  }

  #[inline]
  pub fn next_token(&self) -> Option<&str> {
    self.next_token.as_deref()
  }
}

impl From<ListVolumesResponse> for proto::ListVolumesResponse {
  fn from(value: ListVolumesResponse) -> Self {
    proto::ListVolumesResponse {
      entries: value.entries.into_iter().map(Into::into).collect(),
      next_token: value.next_token.unwrap_or_default(),
    }
  }
}
