mod capabilities;
mod expand_volume;
mod get_info;
mod get_volume_stats;
mod publish_volume;
mod stage_volume;
mod unpublish_volume;
mod unstage_volume;

use crate::{
  proto,
  utils::{record_request, request_timeout, with_timeout, Record},
  Result,
};
use async_trait::async_trait;
use std::{convert::TryInto, sync::Arc};
use tonic::{Request, Response, Status};
use tracing::instrument;

pub use crate::volume::*;
pub use capabilities::*;
pub use expand_volume::*;
pub use get_info::*;
pub use get_volume_stats::*;
pub use publish_volume::*;
pub use stage_volume::*;
pub use unpublish_volume::*;
pub use unstage_volume::*;

/// The node half of a CSI plugin, running on the host a workload is scheduled on.
#[async_trait]
pub trait NodeService: Send + Sync + 'static {
  #[inline]
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::empty()
  }

  /// Make the volume available at the staging path, formatting it first if
  /// needed. Called at most once per volume per node by a well behaved CO, but
  /// must be idempotent.
  #[allow(unused_variables)]
  async fn node_stage_volume(&self, request: NodeStageVolumeRequest) -> Result<()> {
    unsupported!("NodeStageVolume")
  }

  /// Reverse of `NodeStageVolume`. Fails while publish targets remain.
  #[allow(unused_variables)]
  async fn node_unstage_volume(&self, request: NodeUnstageVolumeRequest) -> Result<()> {
    unsupported!("NodeUnstageVolume")
  }

  #[allow(unused_variables)]
  async fn node_publish_volume(&self, request: NodePublishVolumeRequest) -> Result<()> {
    unsupported!("NodePublishVolume")
  }

  /// Unpublishing a target that is not mounted succeeds.
  #[allow(unused_variables)]
  async fn node_unpublish_volume(&self, request: NodeUnpublishVolumeRequest) -> Result<()> {
    unsupported!("NodeUnpublishVolume")
  }

  #[allow(unused_variables)]
  async fn node_get_volume_stats(
    &self,
    request: NodeGetVolumeStatsRequest,
  ) -> Result<NodeGetVolumeStatsResponse> {
    unsupported!("NodeGetVolumeStats")
  }

  #[allow(unused_variables)]
  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse> {
    unsupported!("NodeExpandVolume")
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse>;
}

/// Adapter serving a [NodeService] as the generated `csi.v1.Node` service.
pub struct Node<T: NodeService>(Arc<T>);

impl<T: NodeService> Node<T> {
  pub fn new(inner: Arc<T>) -> Self {
    Node(inner)
  }
}

#[async_trait]
impl<T: NodeService> proto::node_server::Node for Node<T> {
  #[instrument(name = "node.node_stage_volume", skip(self, request), fields(request))]
  async fn node_stage_volume(
    &self,
    request: Request<proto::NodeStageVolumeRequest>,
  ) -> std::result::Result<Response<proto::NodeStageVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    with_timeout(timeout, self.0.node_stage_volume(request)).await?;
    Ok(Response::new(proto::NodeStageVolumeResponse {}))
  }

  #[instrument(name = "node.node_unstage_volume", skip(self, request), fields(request))]
  async fn node_unstage_volume(
    &self,
    request: Request<proto::NodeUnstageVolumeRequest>,
  ) -> std::result::Result<Response<proto::NodeUnstageVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    with_timeout(timeout, self.0.node_unstage_volume(request)).await?;
    Ok(Response::new(proto::NodeUnstageVolumeResponse {}))
  }

  #[instrument(name = "node.node_publish_volume", skip(self, request), fields(request))]
  async fn node_publish_volume(
    &self,
    request: Request<proto::NodePublishVolumeRequest>,
  ) -> std::result::Result<Response<proto::NodePublishVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    with_timeout(timeout, self.0.node_publish_volume(request)).await?;
    Ok(Response::new(proto::NodePublishVolumeResponse {}))
  }

  #[instrument(name = "node.node_unpublish_volume", skip(self, request), fields(request))]
  async fn node_unpublish_volume(
    &self,
    request: Request<proto::NodeUnpublishVolumeRequest>,
  ) -> std::result::Result<Response<proto::NodeUnpublishVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    with_timeout(timeout, self.0.node_unpublish_volume(request)).await?;
    Ok(Response::new(proto::NodeUnpublishVolumeResponse {}))
  }

  #[instrument(
    name = "node.node_get_volume_stats",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_get_volume_stats(
    &self,
    request: Request<proto::NodeGetVolumeStatsRequest>,
  ) -> std::result::Result<Response<proto::NodeGetVolumeStatsResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.node_get_volume_stats(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(
    name = "node.node_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_expand_volume(
    &self,
    request: Request<proto::NodeExpandVolumeRequest>,
  ) -> std::result::Result<Response<proto::NodeExpandVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.node_expand_volume(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(name = "node.node_get_capabilities", skip(self, _request), fields(response))]
  async fn node_get_capabilities(
    &self,
    _request: Request<proto::NodeGetCapabilitiesRequest>,
  ) -> std::result::Result<Response<proto::NodeGetCapabilitiesResponse>, Status> {
    let response = self.0.capabilities().record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(name = "node.node_get_info", skip(self, _request), fields(response))]
  async fn node_get_info(
    &self,
    _request: Request<proto::NodeGetInfoRequest>,
  ) -> std::result::Result<Response<proto::NodeGetInfoResponse>, Status> {
    let response = self.0.node_get_info().await?.record_response();
    Ok(Response::new(response.into()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proto::node_server::Node as _;

  struct StageOnly;

  #[async_trait]
  impl NodeService for StageOnly {
    fn capabilities(&self) -> NodeCapabilities {
      NodeCapabilities::STAGE_UNSTAGE_VOLUME
    }

    async fn node_get_info(&self) -> Result<NodeGetInfoResponse> {
      Ok(NodeGetInfoResponse::new("node-1", None, None))
    }
  }

  #[tokio::test]
  async fn unimplemented_methods_report_unimplemented() {
    let node = Node::new(Arc::new(StageOnly));
    let status = node
      .node_expand_volume(Request::new(proto::NodeExpandVolumeRequest {
        volume_id: "vol".into(),
        volume_path: "/mnt/vol".into(),
        ..Default::default()
      }))
      .await
      .unwrap_err();

    assert_eq!(status.code(), tonic::Code::Unimplemented);
  }

  #[tokio::test]
  async fn relative_paths_are_rejected_before_dispatch() {
    let node = Node::new(Arc::new(StageOnly));
    let status = node
      .node_unpublish_volume(Request::new(proto::NodeUnpublishVolumeRequest {
        volume_id: "vol".into(),
        target_path: "relative/path".into(),
      }))
      .await
      .unwrap_err();

    assert_eq!(status.code(), tonic::Code::InvalidArgument);
  }

  #[tokio::test]
  async fn get_info_reports_node_id() {
    let node = Node::new(Arc::new(StageOnly));
    let info = node
      .node_get_info(Request::new(proto::NodeGetInfoRequest {}))
      .await
      .unwrap()
      .into_inner();

    assert_eq!(info.node_id, "node-1");
    assert_eq!(info.max_volumes_per_node, 0);
  }
}
