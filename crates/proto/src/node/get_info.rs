use super::Topology;
use crate::proto;
use std::num::NonZeroU64;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeGetInfoResponse {
  /// The identifier of the node as understood by the SP. Used by the CO in
  /// subsequent calls, including `ControllerPublishVolume`, to refer to this node.
  node_id: String,

  /// Maximum number of volumes that controller can publish to the node.
  max_volumes_per_node: Option<NonZeroU64>,

  /// Specifies where the node is accessible from.
  accessible_topology: Option<Topology>,
}

impl NodeGetInfoResponse {
  pub fn new(
    node_id: impl Into<String>,
    max_volumes_per_node: Option<NonZeroU64>,
    accessible_topology: Option<Topology>,
  ) -> Self {
    NodeGetInfoResponse {
      node_id: node_id.into(),
      max_volumes_per_node,
      accessible_topology,
    }
  }

  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub fn max_volumes_per_node(&self) -> Option<NonZeroU64> {
    self.max_volumes_per_node
  }

  #[inline]
  pub fn accessible_topology(&self) -> Option<&Topology> {
    self.accessible_topology.as_ref()
  }
}

impl From<NodeGetInfoResponse> for proto::NodeGetInfoResponse {
  fn from(value: NodeGetInfoResponse) -> Self {
    proto::NodeGetInfoResponse {
      node_id: value.node_id,
      max_volumes_per_node: value
        .max_volumes_per_node
        .map(|v| v.get() as i64)
        .unwrap_or_default(),
      accessible_topology: value
        .accessible_topology
        .map(|segments| proto::Topology { segments }),
    }
  }
}
