//! In-memory providers for tests.

use super::{
  AttachedDisk, CloudError, CloudProvider, CloudSnapshot, Disk, DiskMode, DiskSource, DiskSpec,
  Instance, Operation, OperationScope, OperationStatus, Page, Quota, Result, SnapshotStatus,
};
use crate::ids::{Location, NodeId, SnapshotId, VolumeId};
use async_trait::async_trait;
use std::{
  collections::{BTreeMap, HashMap, VecDeque},
  sync::{Arc, Mutex, MutexGuard},
  time::SystemTime,
};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

struct PendingOperation {
  /// Polls left before the operation is done. `None` never finishes.
  remaining: Option<u32>,
  result: Option<CloudError>,
}

struct State {
  disks: BTreeMap<String, Disk>,
  instances: BTreeMap<String, Instance>,
  snapshots: BTreeMap<String, CloudSnapshot>,
  quotas: HashMap<String, Vec<Quota>>,
  operations: HashMap<String, PendingOperation>,
  next_operation: u64,
  pending_polls: Option<u32>,
  operation_polls: usize,
  next_operation_failure: Option<CloudError>,
  failures: HashMap<&'static str, VecDeque<CloudError>>,
  calls: HashMap<&'static str, usize>,
}

/// A provider holding disks, instances and snapshots in memory.
///
/// Effects of mutating calls are applied when the call is submitted; the
/// returned operation is done right away unless configured otherwise with
/// [FakeCloudProvider::set_pending_polls].
pub struct FakeCloudProvider {
  project: String,
  zone: String,
  state: Mutex<State>,
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> CloudError {
  CloudError::NotFound(format!("The resource '{}' of {} was not found", id, kind))
}

fn paginate<T: Clone>(items: Vec<T>, max_results: Option<u32>, page_token: Option<&str>) -> Result<Page<T>> {
  let start = match page_token {
    None => 0,
    Some(token) => token
      .parse::<usize>()
      .ok()
      .filter(|start| *start <= items.len())
      .ok_or_else(|| CloudError::InvalidArgument(format!("Invalid page token {:?}", token)))?,
  };

  let end = match max_results {
    Some(max) if max > 0 => (start + max as usize).min(items.len()),
    _ => items.len(),
  };

  let next_token = if end < items.len() {
    Some(end.to_string())
  } else {
    None
  };

  Ok(Page {
    items: items[start..end].to_vec(),
    next_token,
  })
}

impl FakeCloudProvider {
  pub fn new(project: impl Into<String>, zone: impl Into<String>) -> Self {
    FakeCloudProvider {
      project: project.into(),
      zone: zone.into(),
      state: Mutex::new(State {
        disks: BTreeMap::new(),
        instances: BTreeMap::new(),
        snapshots: BTreeMap::new(),
        quotas: HashMap::new(),
        operations: HashMap::new(),
        next_operation: 0,
        pending_polls: Some(0),
        operation_polls: 0,
        next_operation_failure: None,
        failures: HashMap::new(),
        calls: HashMap::new(),
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Counts the call and returns an injected failure, if any.
  fn enter(&self, method: &'static str) -> Result<MutexGuard<'_, State>> {
    let mut state = self.state();
    *state.calls.entry(method).or_default() += 1;
    if let Some(err) = state.failures.get_mut(method).and_then(VecDeque::pop_front) {
      return Err(err);
    }

    Ok(state)
  }

  fn submit(
    &self,
    state: &mut State,
    scope: OperationScope,
    effect: impl FnOnce(&mut State) -> Result<()>,
  ) -> Result<Operation> {
    let failure = state.next_operation_failure.take();
    if failure.is_none() {
      effect(state)?;
    }

    state.next_operation += 1;
    let name = format!("operation-{}", state.next_operation);
    let status = match state.pending_polls {
      Some(0) => OperationStatus::Done(failure),
      remaining => {
        state.operations.insert(
          name.clone(),
          PendingOperation {
            remaining,
            result: failure,
          },
        );
        OperationStatus::Pending
      }
    };

    Ok(Operation {
      project: self.project.clone(),
      name,
      scope,
      status,
    })
  }

  #[inline]
  pub fn project(&self) -> &str {
    &self.project
  }

  #[inline]
  pub fn zone(&self) -> &str {
    &self.zone
  }

  /// Registers an instance in the default zone.
  pub fn add_instance(&self, name: &str, machine_type: &str) -> NodeId {
    let id = NodeId::new(&self.project, &self.zone, name);
    self.state().instances.insert(
      id.to_string(),
      Instance {
        id: id.clone(),
        machine_type: machine_type.to_owned(),
        disks: Vec::new(),
      },
    );
    id
  }

  pub fn add_disk(&self, disk: Disk) {
    self.state().disks.insert(disk.id.to_string(), disk);
  }

  pub fn disk(&self, id: &VolumeId) -> Option<Disk> {
    self.state().disks.get(&id.to_string()).cloned()
  }

  pub fn instance(&self, id: &NodeId) -> Option<Instance> {
    self.state().instances.get(&id.to_string()).cloned()
  }

  pub fn snapshot(&self, id: &SnapshotId) -> Option<CloudSnapshot> {
    self.state().snapshots.get(&id.to_string()).cloned()
  }

  /// A blank `pd-standard` disk in the default zone.
  pub fn disk_spec(&self, name: &str, size_gb: u64) -> DiskSpec {
    DiskSpec {
      id: VolumeId::zonal(&self.project, &self.zone, name),
      size_gb,
      disk_type: "pd-standard".to_owned(),
      replica_zones: Vec::new(),
      source: None,
      kms_key: None,
      labels: BTreeMap::new(),
      description: String::new(),
    }
  }

  /// Operations submitted from now on stay pending for `polls` polls, or
  /// forever with `None`.
  pub fn set_pending_polls(&self, polls: Option<u32>) {
    self.state().pending_polls = polls;
  }

  pub fn operation_polls(&self) -> usize {
    self.state().operation_polls
  }

  /// The next call to `method` fails with `err`. Failures queue up.
  pub fn fail_next(&self, method: &'static str, err: CloudError) {
    self.state().failures.entry(method).or_default().push_back(err);
  }

  /// The next submitted operation finishes with `err` and has no effect.
  pub fn fail_next_operation(&self, err: CloudError) {
    self.state().next_operation_failure = Some(err);
  }

  pub fn set_quota(&self, region: &str, metric: &str, limit: f64, usage: f64) {
    self
      .state()
      .quotas
      .entry(region.to_owned())
      .or_default()
      .push(Quota {
        metric: metric.to_owned(),
        limit,
        usage,
      });
  }

  /// How many times `method` was called.
  pub fn calls(&self, method: &str) -> usize {
    self.state().calls.get(method).copied().unwrap_or_default()
  }
}

fn disk_scope(id: &VolumeId) -> OperationScope {
  match id.location() {
    Location::Zone(zone) => OperationScope::Zone(zone.clone()),
    Location::Region(region) => OperationScope::Region(region.clone()),
  }
}

#[async_trait]
impl CloudProvider for FakeCloudProvider {
  async fn get_disk(&self, id: &VolumeId) -> Result<Disk> {
    let state = self.enter("get_disk")?;
    state
      .disks
      .get(&id.to_string())
      .cloned()
      .ok_or_else(|| not_found("disk", id))
  }

  async fn list_disks(
    &self,
    project: &str,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<Disk>> {
    let state = self.enter("list_disks")?;
    let disks = state
      .disks
      .values()
      .filter(|d| d.id.project() == project)
      .cloned()
      .collect();
    paginate(disks, max_results, page_token)
  }

  async fn insert_disk(&self, spec: &DiskSpec) -> Result<Operation> {
    let mut state = self.enter("insert_disk")?;
    let spec = spec.clone();
    self.submit(&mut state, disk_scope(&spec.id), move |state| {
      let key = spec.id.to_string();
      if state.disks.contains_key(&key) {
        return Err(CloudError::AlreadyExists(format!(
          "The resource '{}' already exists",
          key
        )));
      }

      match &spec.source {
        Some(DiskSource::Snapshot(id)) if !state.snapshots.contains_key(&id.to_string()) => {
          return Err(not_found("snapshot", id))
        }
        Some(DiskSource::Disk(id)) if !state.disks.contains_key(&id.to_string()) => {
          return Err(not_found("disk", id))
        }
        _ => (),
      }

      info!(disk = %key, size_gb = spec.size_gb, "fake provider: created disk");
      state.disks.insert(
        key,
        Disk {
          id: spec.id,
          size_gb: spec.size_gb,
          disk_type: spec.disk_type,
          replica_zones: spec.replica_zones,
          source: spec.source,
          kms_key: spec.kms_key,
          labels: spec.labels,
          users: Vec::new(),
        },
      );
      Ok(())
    })
  }

  async fn delete_disk(&self, id: &VolumeId) -> Result<Operation> {
    let mut state = self.enter("delete_disk")?;
    let key = id.to_string();
    self.submit(&mut state, disk_scope(id), move |state| {
      let disk = state.disks.get(&key).ok_or_else(|| not_found("disk", &key))?;
      if !disk.users.is_empty() {
        return Err(CloudError::FailedPrecondition(format!(
          "The disk resource '{}' is already being used",
          key
        )));
      }

      state.disks.remove(&key);
      Ok(())
    })
  }

  async fn resize_disk(&self, id: &VolumeId, size_gb: u64) -> Result<Operation> {
    let mut state = self.enter("resize_disk")?;
    let key = id.to_string();
    self.submit(&mut state, disk_scope(id), move |state| {
      let disk = state.disks.get_mut(&key).ok_or_else(|| not_found("disk", &key))?;
      if size_gb < disk.size_gb {
        return Err(CloudError::InvalidArgument(format!(
          "Requested size {}GB is smaller than current size {}GB",
          size_gb, disk.size_gb
        )));
      }

      disk.size_gb = size_gb;
      Ok(())
    })
  }

  async fn get_instance(&self, id: &NodeId) -> Result<Instance> {
    let state = self.enter("get_instance")?;
    state
      .instances
      .get(&id.to_string())
      .cloned()
      .ok_or_else(|| not_found("instance", id))
  }

  async fn attach_disk(
    &self,
    node: &NodeId,
    disk: &VolumeId,
    device_name: &str,
    mode: DiskMode,
  ) -> Result<Operation> {
    let mut state = self.enter("attach_disk")?;
    let (node, disk, device_name) = (node.clone(), disk.clone(), device_name.to_owned());
    let scope = OperationScope::Zone(node.zone().to_owned());
    self.submit(&mut state, scope, move |state| {
      let node_key = node.to_string();
      let disk_key = disk.to_string();
      if !state.disks.contains_key(&disk_key) {
        return Err(not_found("disk", &disk_key));
      }

      let instance = state
        .instances
        .get_mut(&node_key)
        .ok_or_else(|| not_found("instance", &node_key))?;
      if instance.attachment(&disk).is_some() {
        return Err(CloudError::AlreadyExists(format!(
          "Disk {} is already attached to {}",
          disk_key, node_key
        )));
      }

      instance.disks.push(AttachedDisk {
        device_name,
        source: disk,
        mode,
      });

      if let Some(d) = state.disks.get_mut(&disk_key) {
        d.users.push(node);
      }

      Ok(())
    })
  }

  async fn detach_disk(&self, node: &NodeId, device_name: &str) -> Result<Operation> {
    let mut state = self.enter("detach_disk")?;
    let (node, device_name) = (node.clone(), device_name.to_owned());
    let scope = OperationScope::Zone(node.zone().to_owned());
    self.submit(&mut state, scope, move |state| {
      let node_key = node.to_string();
      let instance = state
        .instances
        .get_mut(&node_key)
        .ok_or_else(|| not_found("instance", &node_key))?;
      let index = instance
        .disks
        .iter()
        .position(|d| d.device_name == device_name)
        .ok_or_else(|| not_found("attached disk", &device_name))?;

      let detached = instance.disks.remove(index);
      if let Some(d) = state.disks.get_mut(&detached.source.to_string()) {
        d.users.retain(|u| u != &node);
      }

      Ok(())
    })
  }

  async fn get_snapshot(&self, id: &SnapshotId) -> Result<CloudSnapshot> {
    let state = self.enter("get_snapshot")?;
    state
      .snapshots
      .get(&id.to_string())
      .cloned()
      .ok_or_else(|| not_found("snapshot", id))
  }

  async fn list_snapshots(
    &self,
    project: &str,
    source_disk: Option<&VolumeId>,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<CloudSnapshot>> {
    let state = self.enter("list_snapshots")?;
    let snapshots = state
      .snapshots
      .values()
      .filter(|s| s.id.project() == project)
      .filter(|s| source_disk.map_or(true, |source| &s.source_disk == source))
      .cloned()
      .collect();
    paginate(snapshots, max_results, page_token)
  }

  async fn create_snapshot(&self, id: &SnapshotId, source: &VolumeId) -> Result<Operation> {
    let mut state = self.enter("create_snapshot")?;
    let (id, source) = (id.clone(), source.clone());
    self.submit(&mut state, OperationScope::Global, move |state| {
      let key = id.to_string();
      if state.snapshots.contains_key(&key) {
        return Err(CloudError::AlreadyExists(format!(
          "The resource '{}' already exists",
          key
        )));
      }

      let disk = state
        .disks
        .get(&source.to_string())
        .ok_or_else(|| not_found("disk", &source))?;

      let snapshot = CloudSnapshot {
        id,
        disk_size_gb: disk.size_gb,
        source_disk: source,
        created_at: Some(SystemTime::now()),
        status: SnapshotStatus::Ready,
      };
      state.snapshots.insert(key, snapshot);
      Ok(())
    })
  }

  async fn delete_snapshot(&self, id: &SnapshotId) -> Result<Operation> {
    let mut state = self.enter("delete_snapshot")?;
    let key = id.to_string();
    self.submit(&mut state, OperationScope::Global, move |state| {
      state
        .snapshots
        .remove(&key)
        .map(drop)
        .ok_or_else(|| not_found("snapshot", &key))
    })
  }

  async fn get_operation(&self, operation: &Operation) -> Result<Operation> {
    let mut state = self.enter("get_operation")?;
    state.operation_polls += 1;

    let pending = state
      .operations
      .get_mut(&operation.name)
      .ok_or_else(|| not_found("operation", &operation.name))?;

    let status = match pending.remaining.as_mut() {
      None => OperationStatus::Running,
      Some(remaining) => {
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
          OperationStatus::Done(pending.result.clone())
        } else {
          OperationStatus::Running
        }
      }
    };

    Ok(Operation {
      status,
      ..operation.clone()
    })
  }

  async fn region_quotas(&self, _project: &str, region: &str) -> Result<Vec<Quota>> {
    let state = self.enter("region_quotas")?;
    state
      .quotas
      .get(region)
      .cloned()
      .ok_or_else(|| not_found("region", region))
  }
}

/// Wraps a [FakeCloudProvider] so that every mutating call waits at a
/// rendezvous the test controls.
///
/// Before a mutating call runs, a `oneshot::Sender` is handed out through the
/// receiver returned by [BlockingCloudProvider::new]. The call proceeds once
/// the test sends on it (or drops it).
pub struct BlockingCloudProvider {
  inner: Arc<FakeCloudProvider>,
  ready: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl BlockingCloudProvider {
  pub fn new(
    inner: Arc<FakeCloudProvider>,
  ) -> (Self, mpsc::UnboundedReceiver<oneshot::Sender<()>>) {
    let (ready, ready_rx) = mpsc::unbounded_channel();
    (BlockingCloudProvider { inner, ready }, ready_rx)
  }

  async fn rendezvous(&self) {
    let (execute, wait) = oneshot::channel();
    if self.ready.send(execute).is_ok() {
      // a dropped sender releases the call as well
      let _ = wait.await;
    }
  }
}

#[async_trait]
impl CloudProvider for BlockingCloudProvider {
  async fn get_disk(&self, id: &VolumeId) -> Result<Disk> {
    self.inner.get_disk(id).await
  }

  async fn list_disks(
    &self,
    project: &str,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<Disk>> {
    self.inner.list_disks(project, max_results, page_token).await
  }

  async fn insert_disk(&self, spec: &DiskSpec) -> Result<Operation> {
    self.rendezvous().await;
    self.inner.insert_disk(spec).await
  }

  async fn delete_disk(&self, id: &VolumeId) -> Result<Operation> {
    self.rendezvous().await;
    self.inner.delete_disk(id).await
  }

  async fn resize_disk(&self, id: &VolumeId, size_gb: u64) -> Result<Operation> {
    self.rendezvous().await;
    self.inner.resize_disk(id, size_gb).await
  }

  async fn get_instance(&self, id: &NodeId) -> Result<Instance> {
    self.inner.get_instance(id).await
  }

  async fn attach_disk(
    &self,
    node: &NodeId,
    disk: &VolumeId,
    device_name: &str,
    mode: DiskMode,
  ) -> Result<Operation> {
    self.rendezvous().await;
    self.inner.attach_disk(node, disk, device_name, mode).await
  }

  async fn detach_disk(&self, node: &NodeId, device_name: &str) -> Result<Operation> {
    self.rendezvous().await;
    self.inner.detach_disk(node, device_name).await
  }

  async fn get_snapshot(&self, id: &SnapshotId) -> Result<CloudSnapshot> {
    self.inner.get_snapshot(id).await
  }

  async fn list_snapshots(
    &self,
    project: &str,
    source_disk: Option<&VolumeId>,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<CloudSnapshot>> {
    self
      .inner
      .list_snapshots(project, source_disk, max_results, page_token)
      .await
  }

  async fn create_snapshot(&self, id: &SnapshotId, source: &VolumeId) -> Result<Operation> {
    self.rendezvous().await;
    self.inner.create_snapshot(id, source).await
  }

  async fn delete_snapshot(&self, id: &SnapshotId) -> Result<Operation> {
    self.rendezvous().await;
    self.inner.delete_snapshot(id).await
  }

  async fn get_operation(&self, operation: &Operation) -> Result<Operation> {
    self.inner.get_operation(operation).await
  }

  async fn region_quotas(&self, project: &str, region: &str) -> Result<Vec<Quota>> {
    self.inner.region_quotas(project, region).await
  }
}
