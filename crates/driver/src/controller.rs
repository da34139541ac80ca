use crate::{
  cloud::{CloudClient, CloudError, CloudSnapshot, Disk, DiskMode, DiskSource, DiskSpec, SnapshotStatus},
  ids::{region_of, round_up_gib, Location, NodeId, SnapshotId, VolumeId, GIB, TOPOLOGY_KEY},
  lock::{LockKey, OperationLocks},
  metadata::Metadata,
  params::{DiskParameters, Replication},
};
use async_trait::async_trait;
use pd_csi_proto::{controller::*, ControllerService, Error, Result};
use std::{
  collections::{BTreeMap, HashMap},
  num::NonZeroU32,
  sync::Arc,
};
use tracing::{info, warn};

/// Publish context key naming the device the disk is attached as.
pub const CONTEXT_DEVICE_NAME: &str = "deviceName";

const QUOTA_DISKS_TOTAL_GB: &str = "DISKS_TOTAL_GB";
const QUOTA_SSD_TOTAL_GB: &str = "SSD_TOTAL_GB";

const SUPPORTED_ACCESS_MODES: &[AccessMode] = &[
  AccessMode::SingleNodeWriter,
  AccessMode::SingleNodeReaderOnly,
  AccessMode::MultiNodeReaderOnly,
  AccessMode::MultiNodeMultiWriter,
];

/// Decides whether a volume may be attached read-write to a second node.
pub trait AttachPolicy: Send + Sync + 'static {
  fn allows_shared_writer(&self, access_mode: AccessMode) -> bool;
}

/// Shared writers only for `MULTI_NODE_MULTI_WRITER` volumes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiWriterPolicy;

impl AttachPolicy for MultiWriterPolicy {
  fn allows_shared_writer(&self, access_mode: AccessMode) -> bool {
    access_mode == AccessMode::MultiNodeMultiWriter
  }
}

pub struct GceController {
  cloud: CloudClient,
  meta: Metadata,
  locks: OperationLocks,
  attach_policy: Arc<dyn AttachPolicy>,
  extra_labels: BTreeMap<String, String>,
}

fn check_capabilities(capabilities: &[VolumeCapability]) -> std::result::Result<(), String> {
  for capability in capabilities {
    if !SUPPORTED_ACCESS_MODES.contains(&capability.access_mode()) {
      return Err(format!(
        "Access mode {:?} is not supported",
        capability.access_mode()
      ));
    }
  }

  Ok(())
}

/// Requested size in whole GiB. No range means 1 GiB.
fn capacity_gib(range: Option<CapacityRange>) -> Result<u64> {
  let size_gb = range
    .and_then(|r| r.required_bytes())
    .map(round_up_gib)
    .unwrap_or(1)
    .max(1);

  if let Some(limit) = range.and_then(|r| r.limit_bytes()) {
    if size_gb * GIB > limit {
      return Err(Error::OutOfRange(format!(
        "Rounded size {} bytes exceeds limit of {} bytes",
        size_gb * GIB,
        limit
      )));
    }
  }

  Ok(size_gb)
}

fn topology(zone: impl Into<String>) -> Topology {
  let mut segments = HashMap::new();
  segments.insert(TOPOLOGY_KEY.to_owned(), zone.into());
  segments
}

/// Zones named by the requirement, preferred ones first.
fn requested_zones(requirement: Option<&TopologyRequirement>) -> Vec<String> {
  let mut zones: Vec<String> = Vec::new();
  if let Some(requirement) = requirement {
    let segments = requirement.preferred().iter().chain(requirement.requisite());
    for zone in segments.filter_map(|t| t.get(TOPOLOGY_KEY)) {
      if !zones.contains(zone) {
        zones.push(zone.clone());
      }
    }
  }

  zones
}

fn not_found(err: CloudError, message: impl FnOnce() -> String) -> Error {
  if err.is_not_found() {
    Error::NotFound(message())
  } else {
    err.into()
  }
}

fn publish_context(device_name: &str) -> HashMap<String, String> {
  let mut context = HashMap::new();
  context.insert(CONTEXT_DEVICE_NAME.to_owned(), device_name.to_owned());
  context
}

fn volume_from_disk(disk: &Disk, source: Option<&VolumeContentSource>) -> Volume {
  let zones = match disk.id.location() {
    Location::Zone(zone) => vec![zone.clone()],
    Location::Region(_) => disk.replica_zones.clone(),
  };

  Volume::new(disk.id.to_string(), disk.size_gb * GIB)
    .with_content_source(source.cloned())
    .with_accessible_topology(zones.into_iter().map(topology))
}

fn snapshot_from_cloud(snapshot: CloudSnapshot) -> Snapshot {
  Snapshot::new(
    snapshot.id.to_string(),
    snapshot.source_disk.to_string(),
    snapshot.disk_size_gb * GIB,
    snapshot.created_at,
    snapshot.status == SnapshotStatus::Ready,
  )
}

/// A provider that rejects the page token we passed on means the CO sent a
/// token we never handed out.
fn token_error(err: CloudError, token: Option<&str>) -> Error {
  match (err, token) {
    (CloudError::InvalidArgument(msg), Some(token)) => {
      Error::Aborted(format!("Invalid starting token {:?}: {}", token, msg))
    }
    (err, _) => err.into(),
  }
}

/// Whether an existing disk satisfies a create request for the same name.
fn check_existing(
  disk: &Disk,
  size_gb: u64,
  params: &DiskParameters,
  source: Option<&DiskSource>,
) -> Result<()> {
  let incompatible = |what: String| {
    Err(Error::AlreadyExists(format!(
      "Disk {} already exists with incompatible {}",
      disk.id, what
    )))
  };

  if disk.size_gb != size_gb {
    return incompatible(format!("size {}GiB, requested {}GiB", disk.size_gb, size_gb));
  }

  if disk.disk_type != params.disk_type() {
    return incompatible(format!(
      "type {}, requested {}",
      disk.disk_type,
      params.disk_type()
    ));
  }

  if let Some(source) = source {
    if disk.source.as_ref() != Some(source) {
      return incompatible(format!("content source {:?}", disk.source));
    }
  }

  if let Some(key) = params.kms_key() {
    if disk.kms_key.as_deref() != Some(key) {
      return incompatible("encryption key".to_owned());
    }
  }

  Ok(())
}

impl GceController {
  pub fn new(cloud: CloudClient, meta: Metadata, locks: OperationLocks) -> Self {
    GceController {
      cloud,
      meta,
      locks,
      attach_policy: Arc::new(MultiWriterPolicy),
      extra_labels: BTreeMap::new(),
    }
  }

  pub fn with_attach_policy(mut self, policy: impl AttachPolicy) -> Self {
    self.attach_policy = Arc::new(policy);
    self
  }

  /// Labels put on every disk this controller creates.
  pub fn with_extra_labels(mut self, labels: BTreeMap<String, String>) -> Self {
    self.extra_labels = labels;
    self
  }

  fn pick_zones(
    &self,
    requirement: Option<&TopologyRequirement>,
    replication: Replication,
  ) -> Result<Vec<String>> {
    let mut zones = requested_zones(requirement);
    let own = self.meta.zone();

    match replication {
      Replication::None => Ok(vec![zones
        .into_iter()
        .next()
        .unwrap_or_else(|| own.to_owned())]),
      Replication::RegionalPd => {
        let region = zones
          .first()
          .map(|z| region_of(z).to_owned())
          .unwrap_or_else(|| self.meta.region().to_owned());
        zones.retain(|z| region_of(z) == region);

        if zones.len() < 2 && region_of(own) == region && !zones.iter().any(|z| z == own) {
          zones.push(own.to_owned());
        }

        if zones.len() < 2 {
          return Err(Error::invalid_argument(format!(
            "Regional disks need two zones in region {}, got {:?}",
            region, zones
          )));
        }

        zones.truncate(2);
        Ok(zones)
      }
    }
  }

  async fn check_source(&self, source: &DiskSource, id: &VolumeId, size_gb: u64) -> Result<()> {
    match source {
      DiskSource::Snapshot(snapshot_id) => {
        let snapshot = self
          .cloud
          .get_snapshot(snapshot_id)
          .await
          .map_err(|e| not_found(e, || format!("Source snapshot {} does not exist", snapshot_id)))?;

        if snapshot.disk_size_gb > size_gb {
          return Err(Error::invalid_argument(format!(
            "Requested size {}GiB is smaller than source snapshot {} of {}GiB",
            size_gb, snapshot_id, snapshot.disk_size_gb
          )));
        }
      }
      DiskSource::Disk(source_id) => {
        if source_id.location() != id.location() {
          return Err(Error::invalid_argument(format!(
            "Source volume {} is not in the location of {}",
            source_id, id
          )));
        }

        let disk = self
          .cloud
          .get_disk(source_id)
          .await
          .map_err(|e| not_found(e, || format!("Source volume {} does not exist", source_id)))?;

        if disk.size_gb > size_gb {
          return Err(Error::invalid_argument(format!(
            "Requested size {}GiB is smaller than source volume {} of {}GiB",
            size_gb, source_id, disk.size_gb
          )));
        }
      }
    }

    Ok(())
  }
}

#[async_trait]
impl ControllerService for GceController {
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::CREATE_DELETE_VOLUME
      | ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME
      | ControllerCapabilities::CREATE_DELETE_SNAPSHOT
      | ControllerCapabilities::LIST_SNAPSHOTS
      | ControllerCapabilities::LIST_VOLUMES
      | ControllerCapabilities::LIST_VOLUMES_PUBLISHED_NODES
      | ControllerCapabilities::PUBLISH_READONLY
      | ControllerCapabilities::EXPAND_VOLUME
      | ControllerCapabilities::CLONE_VOLUME
      | ControllerCapabilities::GET_CAPACITY
  }

  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume> {
    check_capabilities(request.volume_capabilities()).map_err(Error::InvalidArgument)?;

    let range = request.capacity_range();
    let size_gb = capacity_gib(range)?;
    let params = DiskParameters::parse(request.parameters())?.with_extra_labels(&self.extra_labels);
    let zones = self.pick_zones(request.accessibility_requirements(), params.replication())?;

    let id = match params.replication() {
      Replication::None => VolumeId::zonal(self.meta.project(), &zones[0], request.name()),
      Replication::RegionalPd => {
        VolumeId::regional(self.meta.project(), region_of(&zones[0]), request.name())
      }
    };

    let source = match request.content_source() {
      None => None,
      Some(VolumeContentSource::Snapshot(s)) => Some(DiskSource::Snapshot(s.parse()?)),
      Some(VolumeContentSource::Volume(v)) => Some(DiskSource::Disk(v.parse()?)),
    };

    let _guard = self.locks.acquire(LockKey::Volume(id.to_string()))?;

    match self.cloud.get_disk(&id).await {
      Ok(existing) => {
        check_existing(&existing, size_gb, &params, source.as_ref())?;
        info!(volume = %id, "volume already exists");
        return Ok(volume_from_disk(&existing, request.content_source()));
      }
      Err(err) if err.is_not_found() => (),
      Err(err) => return Err(err.into()),
    }

    if let Some(source) = &source {
      self.check_source(source, &id, size_gb).await?;
    }

    let spec = DiskSpec {
      id: id.clone(),
      size_gb,
      disk_type: params.disk_type().to_owned(),
      replica_zones: match params.replication() {
        Replication::None => Vec::new(),
        Replication::RegionalPd => zones,
      },
      source: source.clone(),
      kms_key: params.kms_key().map(str::to_owned),
      labels: params.labels().clone(),
      description: "Disk created by the GCE PD CSI driver".to_owned(),
    };

    let disk = match self.cloud.insert_disk(&spec).await {
      Ok(disk) => disk,
      Err(CloudError::AlreadyExists(_)) => {
        // an earlier attempt of ours got there first
        let existing = self.cloud.get_disk(&id).await?;
        check_existing(&existing, size_gb, &params, source.as_ref())?;
        existing
      }
      Err(err) => return Err(err.into()),
    };

    info!(volume = %id, size_gb = disk.size_gb, "created volume");
    Ok(volume_from_disk(&disk, request.content_source()))
  }

  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<()> {
    let id: VolumeId = match request.volume_id().parse() {
      Ok(id) => id,
      Err(err) => {
        warn!(%err, "treating malformed volume id as already deleted");
        return Ok(());
      }
    };

    let _guard = self.locks.acquire(LockKey::Volume(id.to_string()))?;

    let disk = match self.cloud.get_disk(&id).await {
      Ok(disk) => disk,
      Err(err) if err.is_not_found() => {
        info!(volume = %id, "volume already deleted");
        return Ok(());
      }
      Err(err) => return Err(err.into()),
    };

    if !disk.users.is_empty() {
      let users: Vec<String> = disk.users.iter().map(ToString::to_string).collect();
      return Err(Error::failed_precondition(format!(
        "Volume {} is still attached to {}",
        id,
        users.join(", ")
      )));
    }

    match self.cloud.delete_disk(&id).await {
      Err(err) if !err.is_not_found() => Err(err.into()),
      _ => Ok(()),
    }
  }

  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse> {
    let volume_id: VolumeId = request.volume_id().parse()?;
    let node_id: NodeId = request.node_id().parse()?;

    let capability = request.volume_capability();
    check_capabilities(std::slice::from_ref(capability)).map_err(Error::InvalidArgument)?;
    let access_mode = capability.access_mode();
    let mode = if request.readonly() || access_mode.is_read_only() {
      DiskMode::ReadOnly
    } else {
      DiskMode::ReadWrite
    };

    let _guard = self.locks.acquire(LockKey::Attachment {
      volume: volume_id.to_string(),
      node: node_id.to_string(),
    })?;

    let disk = self
      .cloud
      .get_disk(&volume_id)
      .await
      .map_err(|e| not_found(e, || format!("Volume {} not found", volume_id)))?;
    let instance = self
      .cloud
      .get_instance(&node_id)
      .await
      .map_err(|e| not_found(e, || format!("Node {} not found", node_id)))?;

    if let Some(attached) = instance.attachment(&volume_id) {
      if attached.mode != mode {
        return Err(Error::AlreadyExists(format!(
          "Volume {} is attached to {} as {}, requested {}",
          volume_id, node_id, attached.mode, mode
        )));
      }

      info!(volume = %volume_id, node = %node_id, "volume already attached");
      return Ok(ControllerPublishVolumeResponse::new(publish_context(
        &attached.device_name,
      )));
    }

    if mode == DiskMode::ReadWrite && !self.attach_policy.allows_shared_writer(access_mode) {
      for user in disk.users.iter().filter(|u| **u != node_id) {
        let other = match self.cloud.get_instance(user).await {
          Ok(other) => other,
          Err(err) if err.is_not_found() => continue,
          Err(err) => return Err(err.into()),
        };

        if other.attachment(&volume_id).map_or(false, |a| a.mode == DiskMode::ReadWrite) {
          return Err(Error::failed_precondition(format!(
            "Volume {} is already attached read-write to {}",
            volume_id, user
          )));
        }
      }
    }

    self
      .cloud
      .attach_disk(&node_id, &volume_id, volume_id.name(), mode)
      .await?;

    Ok(ControllerPublishVolumeResponse::new(publish_context(
      volume_id.name(),
    )))
  }

  async fn controller_unpublish_volume(&self, request: ControllerUnpublishVolumeRequest) -> Result<()> {
    let volume_id: VolumeId = request.volume_id().parse()?;
    let node_id: NodeId = request.node_id().parse()?;

    let _guard = self.locks.acquire(LockKey::Attachment {
      volume: volume_id.to_string(),
      node: node_id.to_string(),
    })?;

    let instance = match self.cloud.get_instance(&node_id).await {
      Ok(instance) => instance,
      Err(err) if err.is_not_found() => {
        info!(node = %node_id, "node is gone, nothing to detach");
        return Ok(());
      }
      Err(err) => return Err(err.into()),
    };

    let device_name = match instance.attachment(&volume_id) {
      Some(attached) => attached.device_name.clone(),
      None => {
        info!(volume = %volume_id, node = %node_id, "volume already detached");
        return Ok(());
      }
    };

    match self.cloud.detach_disk(&node_id, &device_name).await {
      Err(err) if !err.is_not_found() => Err(err.into()),
      _ => Ok(()),
    }
  }

  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse> {
    let id: VolumeId = request.volume_id().parse()?;
    let disk = self
      .cloud
      .get_disk(&id)
      .await
      .map_err(|e| not_found(e, || format!("Volume {} not found", id)))?;

    if let Err(reason) = check_capabilities(request.volume_capabilities()) {
      return Ok(ValidateVolumeCapabilitiesResponse::Unconfirmed(reason));
    }

    if !request.parameters().is_empty() {
      match DiskParameters::parse(request.parameters()) {
        Err(err) => return Ok(ValidateVolumeCapabilitiesResponse::Unconfirmed(err.to_string())),
        Ok(params) if params.disk_type() != disk.disk_type => {
          return Ok(ValidateVolumeCapabilitiesResponse::Unconfirmed(format!(
            "Volume is of type {}, parameters ask for {}",
            disk.disk_type,
            params.disk_type()
          )))
        }
        Ok(_) => (),
      }
    }

    Ok(ValidateVolumeCapabilitiesResponse::confirmed(&request))
  }

  async fn list_volumes(&self, request: ListVolumesRequest) -> Result<ListVolumesResponse> {
    let token = request.starting_token();
    let page = self
      .cloud
      .list_disks(
        self.meta.project(),
        request.max_entries().map(NonZeroU32::get),
        token,
      )
      .await
      .map_err(|e| token_error(e, token))?;

    let entries = page
      .items
      .iter()
      .map(|disk| {
        let nodes = disk.users.iter().map(ToString::to_string).collect();
        VolumeListEntry::new(volume_from_disk(disk, None), Some(VolumeStatus::new(nodes)))
      })
      .collect();

    Ok(ListVolumesResponse::new(entries, page.next_token))
  }

  async fn get_capacity(&self, request: GetCapacityRequest) -> Result<GetCapacityResponse> {
    let params = DiskParameters::parse(request.parameters())?;
    let zone = request
      .accessible_topology()
      .and_then(|t| t.get(TOPOLOGY_KEY))
      .map(String::as_str)
      .unwrap_or_else(|| self.meta.zone());

    let metric = if params.disk_type() == "pd-ssd" {
      QUOTA_SSD_TOTAL_GB
    } else {
      QUOTA_DISKS_TOTAL_GB
    };

    let quotas = self
      .cloud
      .region_quotas(self.meta.project(), region_of(zone))
      .await?;
    let available_gb = quotas
      .iter()
      .find(|q| q.metric == metric)
      .map(|q| (q.limit - q.usage).max(0.0) as u64)
      .unwrap_or_default();

    Ok(GetCapacityResponse::new(available_gb * GIB))
  }

  async fn create_snapshot(&self, request: CreateSnapshotRequest) -> Result<Snapshot> {
    let source: VolumeId = request.source_volume_id().parse()?;
    let id = SnapshotId::new(self.meta.project(), request.name());

    let _guard = self.locks.acquire(LockKey::Snapshot(id.to_string()))?;

    let check = |snapshot: CloudSnapshot| -> Result<Snapshot> {
      if snapshot.source_disk != source {
        return Err(Error::AlreadyExists(format!(
          "Snapshot {} already exists with source {}",
          id, snapshot.source_disk
        )));
      }

      if snapshot.status == SnapshotStatus::Failed {
        return Err(Error::internal(format!("Snapshot {} failed", id)));
      }

      Ok(snapshot_from_cloud(snapshot))
    };

    match self.cloud.get_snapshot(&id).await {
      Ok(existing) => {
        info!(snapshot = %id, "snapshot already exists");
        return check(existing);
      }
      Err(err) if err.is_not_found() => (),
      Err(err) => return Err(err.into()),
    }

    self
      .cloud
      .get_disk(&source)
      .await
      .map_err(|e| not_found(e, || format!("Source volume {} not found", source)))?;

    match self.cloud.create_snapshot(&id, &source).await {
      Ok(created) => check(created),
      Err(CloudError::AlreadyExists(_)) => check(self.cloud.get_snapshot(&id).await?),
      Err(err) => Err(err.into()),
    }
  }

  async fn delete_snapshot(&self, request: DeleteSnapshotRequest) -> Result<()> {
    let id: SnapshotId = match request.snapshot_id().parse() {
      Ok(id) => id,
      Err(err) => {
        warn!(%err, "treating malformed snapshot id as already deleted");
        return Ok(());
      }
    };

    let _guard = self.locks.acquire(LockKey::Snapshot(id.to_string()))?;

    match self.cloud.delete_snapshot(&id).await {
      Err(err) if !err.is_not_found() => Err(err.into()),
      _ => Ok(()),
    }
  }

  async fn list_snapshots(&self, request: ListSnapshotsRequest) -> Result<ListSnapshotsResponse> {
    let empty = || Ok(ListSnapshotsResponse::new(Vec::new(), None));

    let source = match request.source_volume_id().map(str::parse::<VolumeId>) {
      None => None,
      Some(Ok(source)) => Some(source),
      Some(Err(_)) => return empty(),
    };

    if let Some(snapshot_id) = request.snapshot_id() {
      let id: SnapshotId = match snapshot_id.parse() {
        Ok(id) => id,
        Err(_) => return empty(),
      };

      return match self.cloud.get_snapshot(&id).await {
        Ok(snapshot) if source.as_ref().map_or(true, |s| *s == snapshot.source_disk) => Ok(
          ListSnapshotsResponse::new(vec![snapshot_from_cloud(snapshot)], None),
        ),
        Ok(_) => empty(),
        Err(err) if err.is_not_found() => empty(),
        Err(err) => Err(err.into()),
      };
    }

    let token = request.starting_token();
    let page = self
      .cloud
      .list_snapshots(
        self.meta.project(),
        source.as_ref(),
        request.max_entries().map(NonZeroU32::get),
        token,
      )
      .await
      .map_err(|e| token_error(e, token))?;

    let entries = page.items.into_iter().map(snapshot_from_cloud).collect();
    Ok(ListSnapshotsResponse::new(entries, page.next_token))
  }

  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse> {
    let id: VolumeId = request.volume_id().parse()?;
    let size_gb = capacity_gib(Some(request.capacity_range()))?;
    let node_expansion_required = !request
      .volume_capability()
      .map_or(false, VolumeCapability::is_block);

    let _guard = self.locks.acquire(LockKey::Volume(id.to_string()))?;

    let disk = self
      .cloud
      .get_disk(&id)
      .await
      .map_err(|e| not_found(e, || format!("Volume {} not found", id)))?;

    if disk.size_gb >= size_gb {
      info!(volume = %id, size_gb = disk.size_gb, "volume already at requested size");
      return Ok(ControllerExpandVolumeResponse::new(
        disk.size_gb * GIB,
        node_expansion_required,
      ));
    }

    self.cloud.resize_disk(&id, size_gb).await?;
    Ok(ControllerExpandVolumeResponse::new(
      size_gb * GIB,
      node_expansion_required,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cloud::{
    fake::{BlockingCloudProvider, FakeCloudProvider},
    CloudProvider, RetryPolicy,
  };
  use pd_csi_proto::{controller::Controller, proto};
  use proto::controller_server::Controller as _;
  use std::time::Duration;
  use test_case::test_case;
  use tonic::{Code, Request};

  const PROJECT: &str = "test-project";
  const ZONE: &str = "us-central1-c";

  fn policy() -> RetryPolicy {
    RetryPolicy {
      max_retries: 1,
      initial_interval: Duration::from_millis(1),
      max_interval: Duration::from_millis(1),
      poll_interval: Duration::from_millis(1),
      max_poll_interval: Duration::from_millis(1),
      operation_timeout: Duration::from_secs(5),
    }
  }

  fn controller_with(provider: Arc<dyn CloudProvider>) -> GceController {
    GceController::new(
      CloudClient::new(provider, policy()),
      Metadata::new(PROJECT, ZONE, "controller", "n1-standard-4"),
      OperationLocks::new(),
    )
  }

  fn setup() -> (Arc<FakeCloudProvider>, Controller<GceController>) {
    let provider = Arc::new(FakeCloudProvider::new(PROJECT, ZONE));
    let controller = Controller::new(Arc::new(controller_with(provider.clone())));
    (provider, controller)
  }

  fn capability(mode: proto::volume_capability::access_mode::Mode) -> proto::VolumeCapability {
    proto::VolumeCapability {
      access_mode: Some(proto::volume_capability::AccessMode { mode: mode as i32 }),
      access_type: Some(proto::volume_capability::AccessType::Mount(
        proto::volume_capability::MountVolume::default(),
      )),
    }
  }

  fn writer() -> proto::VolumeCapability {
    capability(proto::volume_capability::access_mode::Mode::SingleNodeWriter)
  }

  fn create_request(name: &str, required_bytes: u64) -> proto::CreateVolumeRequest {
    proto::CreateVolumeRequest {
      name: name.into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: required_bytes as i64,
        limit_bytes: 0,
      }),
      volume_capabilities: vec![writer()],
      ..Default::default()
    }
  }

  fn publish_request(volume_id: &str, node_id: &str) -> proto::ControllerPublishVolumeRequest {
    proto::ControllerPublishVolumeRequest {
      volume_id: volume_id.into(),
      node_id: node_id.into(),
      volume_capability: Some(writer()),
      ..Default::default()
    }
  }

  fn delete_request(volume_id: &str) -> proto::DeleteVolumeRequest {
    proto::DeleteVolumeRequest {
      volume_id: volume_id.into(),
      ..Default::default()
    }
  }

  async fn create(controller: &Controller<GceController>, name: &str, bytes: u64) -> proto::Volume {
    controller
      .create_volume(Request::new(create_request(name, bytes)))
      .await
      .unwrap()
      .into_inner()
      .volume
      .unwrap()
  }

  #[tokio::test]
  async fn create_delete_lifecycle() {
    let (provider, controller) = setup();

    let first = create(&controller, "v1", 10 * GIB).await;
    assert_eq!(first.volume_id, format!("projects/{}/zones/{}/disks/v1", PROJECT, ZONE));
    assert_eq!(first.capacity_bytes, (10 * GIB) as i64);
    assert_eq!(
      first.accessible_topology[0].segments.get(TOPOLOGY_KEY).map(String::as_str),
      Some(ZONE)
    );

    let second = create(&controller, "v1", 10 * GIB).await;
    assert_eq!(second, first);
    assert_eq!(provider.calls("insert_disk"), 1);

    let status = controller
      .create_volume(Request::new(create_request("v1", 20 * GIB)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    let status = controller
      .create_volume(Request::new(create_request("v1", 5 * GIB)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    for _ in 0..2 {
      controller
        .delete_volume(Request::new(delete_request(&first.volume_id)))
        .await
        .unwrap();
    }
    assert_eq!(provider.calls("delete_disk"), 1);
  }

  #[tokio::test]
  async fn smaller_repeat_create_is_already_exists() {
    let (provider, controller) = setup();
    let first = create(&controller, "v1", 20 * GIB).await;
    assert_eq!(first.capacity_bytes, (20 * GIB) as i64);

    let status = controller
      .create_volume(Request::new(create_request("v1", 10 * GIB)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    let same = create(&controller, "v1", 19 * GIB + 1).await;
    assert_eq!(same, first);
    assert_eq!(provider.calls("insert_disk"), 1);
  }

  #[test_case(None => Ok(1) ; "default size")]
  #[test_case(Some((1, 0)) => Ok(1) ; "rounds up")]
  #[test_case(Some((GIB + 1, 0)) => Ok(2) ; "rounds partial gib up")]
  #[test_case(Some((GIB + 1, GIB + 2)) => Err(Code::OutOfRange) ; "limit below rounded size")]
  #[test_case(Some((0, GIB / 2)) => Err(Code::OutOfRange) ; "limit below default")]
  fn capacity_rounding(range: Option<(u64, u64)>) -> std::result::Result<u64, Code> {
    use std::convert::TryInto;

    let range: Option<CapacityRange> = range
      .map(|(required, limit)| {
        proto::CapacityRange {
          required_bytes: required as i64,
          limit_bytes: limit as i64,
        }
        .try_into()
        .unwrap()
      })
      .flatten();

    capacity_gib(range).map_err(|e| e.code())
  }

  #[tokio::test]
  async fn unknown_parameter_is_rejected() {
    let (_, controller) = setup();
    let mut request = create_request("v", GIB);
    request.parameters.insert("zone".into(), ZONE.into());

    let status = controller.create_volume(Request::new(request)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
  }

  #[tokio::test]
  async fn preferred_zone_wins() {
    let (provider, controller) = setup();
    let segment = |zone: &str| proto::Topology {
      segments: topology(zone),
    };

    let request = proto::CreateVolumeRequest {
      accessibility_requirements: Some(proto::TopologyRequirement {
        requisite: vec![segment("us-central1-a"), segment("us-central1-b")],
        preferred: vec![segment("us-central1-b")],
      }),
      ..create_request("zoned", GIB)
    };

    let volume = controller
      .create_volume(Request::new(request))
      .await
      .unwrap()
      .into_inner()
      .volume
      .unwrap();

    let id = VolumeId::zonal(PROJECT, "us-central1-b", "zoned");
    assert_eq!(volume.volume_id, id.to_string());
    assert!(provider.disk(&id).is_some());
  }

  #[tokio::test]
  async fn regional_disk_gets_two_replica_zones() {
    let (provider, controller) = setup();
    let mut request = proto::CreateVolumeRequest {
      accessibility_requirements: Some(proto::TopologyRequirement {
        requisite: vec![proto::Topology {
          segments: topology("us-central1-a"),
        }],
        preferred: Vec::new(),
      }),
      ..create_request("replicated", GIB)
    };
    request
      .parameters
      .insert("replication-type".into(), "regional-pd".into());

    let volume = controller
      .create_volume(Request::new(request))
      .await
      .unwrap()
      .into_inner()
      .volume
      .unwrap();

    let id = VolumeId::regional(PROJECT, "us-central1", "replicated");
    assert_eq!(volume.volume_id, id.to_string());
    assert_eq!(
      provider.disk(&id).unwrap().replica_zones,
      vec!["us-central1-a".to_owned(), ZONE.to_owned()]
    );
    assert_eq!(volume.accessible_topology.len(), 2);
  }

  #[tokio::test]
  async fn regional_disk_needs_two_zones() {
    let (_, controller) = setup();
    let mut request = proto::CreateVolumeRequest {
      accessibility_requirements: Some(proto::TopologyRequirement {
        requisite: vec![proto::Topology {
          segments: topology("europe-west4-a"),
        }],
        preferred: Vec::new(),
      }),
      ..create_request("replicated", GIB)
    };
    request
      .parameters
      .insert("replication-type".into(), "regional-pd".into());

    let status = controller.create_volume(Request::new(request)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
  }

  #[tokio::test]
  async fn clone_from_missing_snapshot_is_not_found() {
    let (_, controller) = setup();
    let request = proto::CreateVolumeRequest {
      volume_content_source: Some(proto::VolumeContentSource {
        r#type: Some(proto::volume_content_source::Type::Snapshot(
          proto::volume_content_source::SnapshotSource {
            snapshot_id: format!("projects/{}/global/snapshots/missing", PROJECT),
          },
        )),
      }),
      ..create_request("restored", GIB)
    };

    let status = controller.create_volume(Request::new(request)).await.unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
  }

  #[tokio::test]
  async fn malformed_ids_on_delete_succeed() {
    let (_, controller) = setup();

    controller
      .delete_volume(Request::new(delete_request("not-a-volume-id")))
      .await
      .unwrap();
    controller
      .delete_snapshot(Request::new(proto::DeleteSnapshotRequest {
        snapshot_id: "not-a-snapshot-id".into(),
        ..Default::default()
      }))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn attached_volume_cannot_be_deleted() {
    let (provider, controller) = setup();
    let node = provider.add_instance("node-1", "n1-standard-4");
    let volume = create(&controller, "v1", GIB).await;

    controller
      .controller_publish_volume(Request::new(publish_request(
        &volume.volume_id,
        &node.to_string(),
      )))
      .await
      .unwrap();

    let status = controller
      .delete_volume(Request::new(delete_request(&volume.volume_id)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
  }

  #[tokio::test]
  async fn publish_is_idempotent_and_guards_multi_attach() {
    let (provider, controller) = setup();
    let node_a = provider.add_instance("node-a", "n1-standard-4");
    let node_b = provider.add_instance("node-b", "n1-standard-4");
    let volume = create(&controller, "v1", GIB).await;

    for _ in 0..2 {
      let response = controller
        .controller_publish_volume(Request::new(publish_request(
          &volume.volume_id,
          &node_a.to_string(),
        )))
        .await
        .unwrap()
        .into_inner();
      assert_eq!(
        response.publish_context.get(CONTEXT_DEVICE_NAME).map(String::as_str),
        Some("v1")
      );
    }
    assert_eq!(provider.calls("attach_disk"), 1);

    let status = controller
      .controller_publish_volume(Request::new(publish_request(
        &volume.volume_id,
        &node_b.to_string(),
      )))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);

    let readonly = proto::ControllerPublishVolumeRequest {
      readonly: true,
      ..publish_request(&volume.volume_id, &node_a.to_string())
    };
    let status = controller
      .controller_publish_volume(Request::new(readonly))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
  }

  #[tokio::test]
  async fn multi_writer_volumes_may_share() {
    let (provider, controller) = setup();
    let nodes = [
      provider.add_instance("node-a", "n1-standard-4"),
      provider.add_instance("node-b", "n1-standard-4"),
    ];

    let mut request = create_request("shared", GIB);
    request.volume_capabilities =
      vec![capability(proto::volume_capability::access_mode::Mode::MultiNodeMultiWriter)];
    let volume = controller
      .create_volume(Request::new(request))
      .await
      .unwrap()
      .into_inner()
      .volume
      .unwrap();

    for node in &nodes {
      let request = proto::ControllerPublishVolumeRequest {
        volume_capability: Some(capability(
          proto::volume_capability::access_mode::Mode::MultiNodeMultiWriter,
        )),
        ..publish_request(&volume.volume_id, &node.to_string())
      };
      controller
        .controller_publish_volume(Request::new(request))
        .await
        .unwrap();
    }

    let id: VolumeId = volume.volume_id.parse().unwrap();
    assert_eq!(provider.disk(&id).unwrap().users.len(), 2);
  }

  #[tokio::test]
  async fn publish_to_missing_node_is_not_found() {
    let (_, controller) = setup();
    let volume = create(&controller, "v1", GIB).await;
    let node = NodeId::new(PROJECT, ZONE, "ghost");

    let status = controller
      .controller_publish_volume(Request::new(publish_request(
        &volume.volume_id,
        &node.to_string(),
      )))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
  }

  #[tokio::test]
  async fn concurrent_publish_is_aborted() {
    let inner = Arc::new(FakeCloudProvider::new(PROJECT, ZONE));
    let node = inner.add_instance("node-1", "n1-standard-4");
    let volume = inner.disk_spec("v1", 1);
    inner.insert_disk(&volume).await.unwrap();

    let (blocking, mut ready) = BlockingCloudProvider::new(inner.clone());
    let controller = Arc::new(Controller::new(Arc::new(controller_with(Arc::new(blocking)))));
    let request = publish_request(&volume.id.to_string(), &node.to_string());

    let first = {
      let controller = controller.clone();
      let request = request.clone();
      tokio::spawn(async move {
        controller
          .controller_publish_volume(Request::new(request))
          .await
      })
    };

    // the first call holds the lock while it waits at the attach
    let execute = ready.recv().await.unwrap();

    let status = controller
      .controller_publish_volume(Request::new(request))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);

    execute.send(()).unwrap();
    first.await.unwrap().unwrap();
    assert_eq!(inner.calls("attach_disk"), 1);
    assert_eq!(inner.disk(&volume.id).unwrap().users, vec![node]);
  }

  #[tokio::test]
  async fn cancelled_call_releases_its_lock() {
    let inner = Arc::new(FakeCloudProvider::new(PROJECT, ZONE));
    let node = inner.add_instance("node-1", "n1-standard-4");
    let volume = inner.disk_spec("v1", 1);
    inner.insert_disk(&volume).await.unwrap();

    let (blocking, mut ready) = BlockingCloudProvider::new(inner.clone());
    let controller = Arc::new(Controller::new(Arc::new(controller_with(Arc::new(blocking)))));
    let request = publish_request(&volume.id.to_string(), &node.to_string());

    let first = {
      let controller = controller.clone();
      let request = request.clone();
      tokio::spawn(async move {
        controller
          .controller_publish_volume(Request::new(request))
          .await
      })
    };

    let abandoned = ready.recv().await.unwrap();
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());
    drop(abandoned);

    let second = {
      let controller = controller.clone();
      tokio::spawn(async move {
        controller
          .controller_publish_volume(Request::new(request))
          .await
      })
    };

    ready.recv().await.unwrap().send(()).unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(inner.calls("attach_disk"), 1);
  }

  #[tokio::test]
  async fn unpublish_is_idempotent() {
    let (provider, controller) = setup();
    let node = provider.add_instance("node-1", "n1-standard-4");
    let volume = create(&controller, "v1", GIB).await;
    controller
      .controller_publish_volume(Request::new(publish_request(
        &volume.volume_id,
        &node.to_string(),
      )))
      .await
      .unwrap();

    for _ in 0..2 {
      controller
        .controller_unpublish_volume(Request::new(proto::ControllerUnpublishVolumeRequest {
          volume_id: volume.volume_id.clone(),
          node_id: node.to_string(),
          ..Default::default()
        }))
        .await
        .unwrap();
    }
    assert_eq!(provider.calls("detach_disk"), 1);

    controller
      .controller_unpublish_volume(Request::new(proto::ControllerUnpublishVolumeRequest {
        volume_id: volume.volume_id.clone(),
        node_id: NodeId::new(PROJECT, ZONE, "ghost").to_string(),
        ..Default::default()
      }))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn advertises_all_controller_rpcs() {
    let (_, controller) = setup();

    let response = controller
      .controller_get_capabilities(Request::new(proto::ControllerGetCapabilitiesRequest {}))
      .await
      .unwrap()
      .into_inner();

    assert_eq!(response.capabilities.len(), 10);
  }

  #[tokio::test]
  async fn validate_capabilities() {
    let (_, controller) = setup();
    let volume = create(&controller, "v1", GIB).await;

    let request = |mode| proto::ValidateVolumeCapabilitiesRequest {
      volume_id: volume.volume_id.clone(),
      volume_capabilities: vec![capability(mode)],
      ..Default::default()
    };

    use proto::volume_capability::access_mode::Mode;
    let confirmed = controller
      .validate_volume_capabilities(Request::new(request(Mode::MultiNodeReaderOnly)))
      .await
      .unwrap()
      .into_inner();
    assert!(confirmed.confirmed.is_some());

    let unconfirmed = controller
      .validate_volume_capabilities(Request::new(request(Mode::MultiNodeSingleWriter)))
      .await
      .unwrap()
      .into_inner();
    assert!(unconfirmed.confirmed.is_none());
    assert!(!unconfirmed.message.is_empty());

    let missing = proto::ValidateVolumeCapabilitiesRequest {
      volume_id: VolumeId::zonal(PROJECT, ZONE, "missing").to_string(),
      ..request(Mode::SingleNodeWriter)
    };
    let status = controller
      .validate_volume_capabilities(Request::new(missing))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
  }

  #[tokio::test]
  async fn list_volumes_pages_with_published_nodes() {
    let (provider, controller) = setup();
    let node = provider.add_instance("node-1", "n1-standard-4");
    for name in &["a", "b", "c"] {
      create(&controller, name, GIB).await;
    }
    controller
      .controller_publish_volume(Request::new(publish_request(
        &VolumeId::zonal(PROJECT, ZONE, "a").to_string(),
        &node.to_string(),
      )))
      .await
      .unwrap();

    let first = controller
      .list_volumes(Request::new(proto::ListVolumesRequest {
        max_entries: 2,
        starting_token: String::new(),
      }))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(first.entries.len(), 2);
    assert!(!first.next_token.is_empty());
    let published = &first.entries[0].status.as_ref().unwrap().published_node_ids;
    assert_eq!(published, &vec![node.to_string()]);

    let second = controller
      .list_volumes(Request::new(proto::ListVolumesRequest {
        max_entries: 2,
        starting_token: first.next_token.clone(),
      }))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(second.entries.len(), 1);
    assert!(second.next_token.is_empty());

    let status = controller
      .list_volumes(Request::new(proto::ListVolumesRequest {
        max_entries: 0,
        starting_token: "bogus".into(),
      }))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
  }

  #[tokio::test]
  async fn list_snapshots_pages() {
    let (_, controller) = setup();
    let source = create(&controller, "v1", GIB).await;
    for name in &["s1", "s2", "s3"] {
      controller
        .create_snapshot(Request::new(proto::CreateSnapshotRequest {
          source_volume_id: source.volume_id.clone(),
          name: (*name).into(),
          ..Default::default()
        }))
        .await
        .unwrap();
    }

    let page = |starting_token: String| proto::ListSnapshotsRequest {
      max_entries: 2,
      starting_token,
      ..Default::default()
    };

    let first = controller
      .list_snapshots(Request::new(page(String::new())))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(first.entries.len(), 2);
    assert!(!first.next_token.is_empty());

    let second = controller
      .list_snapshots(Request::new(page(first.next_token.clone())))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(second.entries.len(), 1);
    assert!(second.next_token.is_empty());

    let ids: Vec<String> = first
      .entries
      .iter()
      .chain(&second.entries)
      .map(|e| e.snapshot.as_ref().unwrap().snapshot_id.clone())
      .collect();
    let expected: Vec<String> = ["s1", "s2", "s3"]
      .iter()
      .map(|name| format!("projects/{}/global/snapshots/{}", PROJECT, name))
      .collect();
    assert_eq!(ids, expected);

    let status = controller
      .list_snapshots(Request::new(page("bogus".into())))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
  }

  #[tokio::test]
  async fn capacity_comes_from_region_quota() {
    let (provider, controller) = setup();
    provider.set_quota("us-central1", QUOTA_DISKS_TOTAL_GB, 4096.0, 1024.0);
    provider.set_quota("us-central1", QUOTA_SSD_TOTAL_GB, 500.0, 100.0);

    let mut request = proto::GetCapacityRequest::default();
    request.parameters.insert("type".into(), "pd-ssd".into());

    let capacity = controller
      .get_capacity(Request::new(request))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(capacity.available_capacity, (400 * GIB) as i64);
  }

  #[tokio::test]
  async fn snapshot_lifecycle() {
    let (provider, controller) = setup();
    let source = create(&controller, "v1", 5 * GIB).await;
    let other = create(&controller, "v2", GIB).await;

    let request = |source: &str| proto::CreateSnapshotRequest {
      source_volume_id: source.into(),
      name: "snap".into(),
      ..Default::default()
    };

    let first = controller
      .create_snapshot(Request::new(request(&source.volume_id)))
      .await
      .unwrap()
      .into_inner()
      .snapshot
      .unwrap();
    assert_eq!(first.snapshot_id, format!("projects/{}/global/snapshots/snap", PROJECT));
    assert_eq!(first.size_bytes, (5 * GIB) as i64);
    assert!(first.ready_to_use);

    let again = controller
      .create_snapshot(Request::new(request(&source.volume_id)))
      .await
      .unwrap()
      .into_inner()
      .snapshot
      .unwrap();
    assert_eq!(again.snapshot_id, first.snapshot_id);
    assert_eq!(provider.calls("create_snapshot"), 1);

    let status = controller
      .create_snapshot(Request::new(request(&other.volume_id)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    let listed = controller
      .list_snapshots(Request::new(proto::ListSnapshotsRequest {
        source_volume_id: source.volume_id.clone(),
        ..Default::default()
      }))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(listed.entries.len(), 1);

    let by_other_source = controller
      .list_snapshots(Request::new(proto::ListSnapshotsRequest {
        source_volume_id: other.volume_id.clone(),
        ..Default::default()
      }))
      .await
      .unwrap()
      .into_inner();
    assert!(by_other_source.entries.is_empty());

    let restored = proto::CreateVolumeRequest {
      volume_content_source: Some(proto::VolumeContentSource {
        r#type: Some(proto::volume_content_source::Type::Snapshot(
          proto::volume_content_source::SnapshotSource {
            snapshot_id: first.snapshot_id.clone(),
          },
        )),
      }),
      ..create_request("restored", 5 * GIB)
    };
    let restored = controller
      .create_volume(Request::new(restored))
      .await
      .unwrap()
      .into_inner()
      .volume
      .unwrap();
    assert!(restored.content_source.is_some());

    for _ in 0..2 {
      controller
        .delete_snapshot(Request::new(proto::DeleteSnapshotRequest {
          snapshot_id: first.snapshot_id.clone(),
          ..Default::default()
        }))
        .await
        .unwrap();
    }

    let by_id = controller
      .list_snapshots(Request::new(proto::ListSnapshotsRequest {
        snapshot_id: first.snapshot_id.clone(),
        ..Default::default()
      }))
      .await
      .unwrap()
      .into_inner();
    assert!(by_id.entries.is_empty());
  }

  #[tokio::test]
  async fn expand_volume() {
    let (provider, controller) = setup();
    let volume = create(&controller, "v1", 10 * GIB).await;

    let request = |bytes: u64, block: bool| proto::ControllerExpandVolumeRequest {
      volume_id: volume.volume_id.clone(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: bytes as i64,
        limit_bytes: 0,
      }),
      volume_capability: if block {
        Some(proto::VolumeCapability {
          access_mode: writer().access_mode,
          access_type: Some(proto::volume_capability::AccessType::Block(
            proto::volume_capability::BlockVolume {},
          )),
        })
      } else {
        Some(writer())
      },
      ..Default::default()
    };

    let grown = controller
      .controller_expand_volume(Request::new(request(20 * GIB, false)))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(grown.capacity_bytes, (20 * GIB) as i64);
    assert!(grown.node_expansion_required);

    let same = controller
      .controller_expand_volume(Request::new(request(15 * GIB, true)))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(same.capacity_bytes, (20 * GIB) as i64);
    assert!(!same.node_expansion_required);
    assert_eq!(provider.calls("resize_disk"), 1);

    let missing = proto::ControllerExpandVolumeRequest {
      volume_id: VolumeId::zonal(PROJECT, ZONE, "missing").to_string(),
      ..request(GIB, false)
    };
    let status = controller
      .controller_expand_volume(Request::new(missing))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
  }

  #[tokio::test]
  async fn rate_limits_surface_as_resource_exhausted() {
    let (provider, controller) = setup();
    for _ in 0..3 {
      provider.fail_next("get_disk", CloudError::RateLimited("slow down".into()));
    }

    let status = controller
      .create_volume(Request::new(create_request("v1", GIB)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);
  }
}
