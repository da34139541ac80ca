mod capabilities;
mod create_snapshot;
mod create_volume;
mod delete_snapshot;
mod delete_volume;
mod expand_volume;
mod get_capacity;
mod list_snapshots;
mod list_volumes;
mod publish_volume;
mod snapshot;
mod unpublish_volume;
mod validate_volume_capabilities;

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
pub use create_snapshot::*;
pub use create_volume::*;
pub use delete_snapshot::*;
pub use delete_volume::*;
pub use expand_volume::*;
pub use get_capacity::*;
pub use list_snapshots::*;
pub use list_volumes::*;
pub use publish_volume::*;
pub use snapshot::*;
pub use unpublish_volume::*;
pub use validate_volume_capabilities::*;

/// The controller half of a CSI plugin.
///
/// Every operation MUST be idempotent. Methods not overridden answer
/// `UNIMPLEMENTED`; callers learn what is supported from [capabilities].
///
/// [capabilities]: ControllerService::capabilities
#[async_trait]
pub trait ControllerService: Send + Sync + 'static {
  /// Get the set of services provided by this controller.
  #[inline]
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::empty()
  }

  /// Provision a new volume, empty or populated from a snapshot or another volume.
  ///
  /// If a volume with the same `name` already exists and is compatible with the
  /// request, the existing volume is returned. An incompatible volume of the same
  /// name yields `ALREADY_EXISTS`.
  #[allow(unused_variables)]
  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume> {
    unsupported!("CreateVolume")
  }

  /// Deprovision a volume. A volume that no longer exists is not an error.
  #[allow(unused_variables)]
  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<()> {
    unsupported!("DeleteVolume")
  }

  /// Make the volume available on the given node. Publishing a volume that is
  /// already attached to that node with compatible mode is a no-op.
  #[allow(unused_variables)]
  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse> {
    unsupported!("ControllerPublishVolume")
  }

  /// Reverse of `ControllerPublishVolume`. A volume or node that cannot be found
  /// counts as already unpublished.
  #[allow(unused_variables)]
  async fn controller_unpublish_volume(&self, request: ControllerUnpublishVolumeRequest) -> Result<()> {
    unsupported!("ControllerUnpublishVolume")
  }

  /// Confirm only if every requested capability is supported for the volume.
  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse>;

  /// The CO SHALL NOT expect a consistent view of all volumes when paging
  /// through the volume list via multiple calls.
  #[allow(unused_variables)]
  async fn list_volumes(&self, request: ListVolumesRequest) -> Result<ListVolumesResponse> {
    unsupported!("ListVolumes")
  }

  #[allow(unused_variables)]
  async fn get_capacity(&self, request: GetCapacityRequest) -> Result<GetCapacityResponse> {
    unsupported!("GetCapacity")
  }

  /// Cut a snapshot of a source volume. `name` is the idempotency key: reissuing
  /// the same request returns the same snapshot with an updated `ready_to_use`.
  #[allow(unused_variables)]
  async fn create_snapshot(&self, request: CreateSnapshotRequest) -> Result<Snapshot> {
    unsupported!("CreateSnapshot")
  }

  #[allow(unused_variables)]
  async fn delete_snapshot(&self, request: DeleteSnapshotRequest) -> Result<()> {
    unsupported!("DeleteSnapshot")
  }

  #[allow(unused_variables)]
  async fn list_snapshots(&self, request: ListSnapshotsRequest) -> Result<ListSnapshotsResponse> {
    unsupported!("ListSnapshots")
  }

  /// Grow the volume. A volume already at or above the requested size is left
  /// alone and reported with its current capacity.
  #[allow(unused_variables)]
  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse> {
    unsupported!("ControllerExpandVolume")
  }
}

/// Adapter serving a [ControllerService] as the generated `csi.v1.Controller` service.
pub struct Controller<T: ControllerService>(Arc<T>);

impl<T: ControllerService> Controller<T> {
  pub fn new(inner: Arc<T>) -> Self {
    Controller(inner)
  }
}

#[async_trait]
impl<T: ControllerService> proto::controller_server::Controller for Controller<T> {
  #[instrument(
    name = "controller.create_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn create_volume(
    &self,
    request: Request<proto::CreateVolumeRequest>,
  ) -> std::result::Result<Response<proto::CreateVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.create_volume(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(name = "controller.delete_volume", skip(self, request), fields(request))]
  async fn delete_volume(
    &self,
    request: Request<proto::DeleteVolumeRequest>,
  ) -> std::result::Result<Response<proto::DeleteVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    with_timeout(timeout, self.0.delete_volume(request)).await?;
    Ok(Response::new(proto::DeleteVolumeResponse {}))
  }

  #[instrument(
    name = "controller.controller_publish_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_publish_volume(
    &self,
    request: Request<proto::ControllerPublishVolumeRequest>,
  ) -> std::result::Result<Response<proto::ControllerPublishVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.controller_publish_volume(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(
    name = "controller.controller_unpublish_volume",
    skip(self, request),
    fields(request)
  )]
  async fn controller_unpublish_volume(
    &self,
    request: Request<proto::ControllerUnpublishVolumeRequest>,
  ) -> std::result::Result<Response<proto::ControllerUnpublishVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    with_timeout(timeout, self.0.controller_unpublish_volume(request)).await?;
    Ok(Response::new(proto::ControllerUnpublishVolumeResponse {}))
  }

  #[instrument(
    name = "controller.validate_volume_capabilities",
    skip(self, request),
    fields(request, response)
  )]
  async fn validate_volume_capabilities(
    &self,
    request: Request<proto::ValidateVolumeCapabilitiesRequest>,
  ) -> std::result::Result<Response<proto::ValidateVolumeCapabilitiesResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.validate_volume_capabilities(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(
    name = "controller.list_volumes",
    skip(self, request),
    fields(request, response)
  )]
  async fn list_volumes(
    &self,
    request: Request<proto::ListVolumesRequest>,
  ) -> std::result::Result<Response<proto::ListVolumesResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.list_volumes(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(
    name = "controller.get_capacity",
    skip(self, request),
    fields(request, response)
  )]
  async fn get_capacity(
    &self,
    request: Request<proto::GetCapacityRequest>,
  ) -> std::result::Result<Response<proto::GetCapacityResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.get_capacity(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(
    name = "controller.controller_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn controller_get_capabilities(
    &self,
    _request: Request<proto::ControllerGetCapabilitiesRequest>,
  ) -> std::result::Result<Response<proto::ControllerGetCapabilitiesResponse>, Status> {
    let response = self.0.capabilities().record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(
    name = "controller.create_snapshot",
    skip(self, request),
    fields(request, response)
  )]
  async fn create_snapshot(
    &self,
    request: Request<proto::CreateSnapshotRequest>,
  ) -> std::result::Result<Response<proto::CreateSnapshotResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.create_snapshot(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(name = "controller.delete_snapshot", skip(self, request), fields(request))]
  async fn delete_snapshot(
    &self,
    request: Request<proto::DeleteSnapshotRequest>,
  ) -> std::result::Result<Response<proto::DeleteSnapshotResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    with_timeout(timeout, self.0.delete_snapshot(request)).await?;
    Ok(Response::new(proto::DeleteSnapshotResponse {}))
  }

  #[instrument(
    name = "controller.list_snapshots",
    skip(self, request),
    fields(request, response)
  )]
  async fn list_snapshots(
    &self,
    request: Request<proto::ListSnapshotsRequest>,
  ) -> std::result::Result<Response<proto::ListSnapshotsResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.list_snapshots(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  #[instrument(
    name = "controller.controller_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_expand_volume(
    &self,
    request: Request<proto::ControllerExpandVolumeRequest>,
  ) -> std::result::Result<Response<proto::ControllerExpandVolumeResponse>, Status> {
    let timeout = request_timeout(request.metadata());
    let request = record_request(request.into_inner().try_into()?);
    let response = with_timeout(timeout, self.0.controller_expand_volume(request))
      .await?
      .record_response();
    Ok(Response::new(response.into()))
  }

  async fn controller_get_volume(
    &self,
    _request: Request<proto::ControllerGetVolumeRequest>,
  ) -> std::result::Result<Response<proto::ControllerGetVolumeResponse>, Status> {
    Err(Status::unimplemented("ControllerGetVolume is not supported"))
  }
}
