use super::{CapacityRange, Topology, VolumeCapability, VolumeContentSource};
use crate::{
  proto,
  utils::require_non_empty,
  volume::{capacity_range, volume_capabilities},
};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};

/// Where the provisioned volume must, and preferably should, be accessible from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyRequirement {
  requisite: Vec<Topology>,
  preferred: Vec<Topology>,
}

impl TopologyRequirement {
  pub fn new(requisite: Vec<Topology>, preferred: Vec<Topology>) -> Self {
    TopologyRequirement {
      requisite,
      preferred,
    }
  }

  #[inline]
  pub fn requisite(&self) -> &[Topology] {
    &self.requisite
  }

  #[inline]
  pub fn preferred(&self) -> &[Topology] {
    &self.preferred
  }
}

impl From<proto::TopologyRequirement> for TopologyRequirement {
  fn from(value: proto::TopologyRequirement) -> Self {
    TopologyRequirement {
      requisite: value.requisite.into_iter().map(|t| t.segments).collect(),
      preferred: value.preferred.into_iter().map(|t| t.segments).collect(),
    }
  }
}

#[derive(Debug)]
pub struct CreateVolumeRequest {
  name: String,
  capacity_range: Option<CapacityRange>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  content_source: Option<VolumeContentSource>,
  accessibility_requirements: Option<TopologyRequirement>,
}

impl CreateVolumeRequest {
  /// The suggested name for the volume. Also the idempotency key.
  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[inline]
  pub fn capacity_range(&self) -> Option<CapacityRange> {
    self.capacity_range
  }

  /// Every capability the volume must support. Never empty.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  #[inline]
  pub fn content_source(&self) -> Option<&VolumeContentSource> {
    self.content_source.as_ref()
  }

  #[inline]
  pub fn accessibility_requirements(&self) -> Option<&TopologyRequirement> {
    self.accessibility_requirements.as_ref()
  }
}

impl TryFrom<proto::CreateVolumeRequest> for CreateVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::CreateVolumeRequest) -> Result<Self, Self::Error> {
    let name = require_non_empty(value.name, "CreateVolumeRequest.name is empty")?;
    let capacity_range = capacity_range(value.capacity_range)?;
    let volume_capabilities = volume_capabilities(
      value.volume_capabilities,
      "CreateVolumeRequest.volume_capabilities is empty",
    )?;

    let content_source = match value.volume_content_source {
      None => None,
      Some(v) => v.try_into()?,
    };

    let accessibility_requirements = value.accessibility_requirements.map(Into::into);

    Ok(CreateVolumeRequest {
      name,
      capacity_range,
      volume_capabilities,
      parameters: value.parameters,
      content_source,
      accessibility_requirements,
    })
  }
}
