use super::{Topology, VolumeCapability};
use crate::proto;
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};

#[derive(Debug)]
pub struct GetCapacityRequest {
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  accessible_topology: Option<Topology>,
}

impl GetCapacityRequest {
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  /// Restricts the query to the pool reachable from this topology.
  #[inline]
  pub fn accessible_topology(&self) -> Option<&Topology> {
    self.accessible_topology.as_ref()
  }
}

impl TryFrom<proto::GetCapacityRequest> for GetCapacityRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::GetCapacityRequest) -> Result<Self, Self::Error> {
    let volume_capabilities = value
      .volume_capabilities
      .into_iter()
      .map(TryInto::try_into)
      .collect::<Result<_, _>>()?;

    Ok(GetCapacityRequest {
      volume_capabilities,
      parameters: value.parameters,
      accessible_topology: value.accessible_topology.map(|t| t.segments),
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetCapacityResponse {
  available_capacity: u64,
}

impl GetCapacityResponse {
  pub fn new(available_capacity: u64) -> Self {
    GetCapacityResponse { available_capacity }
  }

  #[inline]
  pub fn available_capacity(&self) -> u64 {
    self.available_capacity
  }
}

impl From<GetCapacityResponse> for proto::GetCapacityResponse {
  fn from(value: GetCapacityResponse) -> Self {
    proto::GetCapacityResponse {
      available_capacity: value.available_capacity.min(i64::MAX as u64) as i64,
    }
  }
}
