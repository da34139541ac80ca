use crate::{
  controller::CONTEXT_DEVICE_NAME,
  device::DeviceResolver,
  ids::{VolumeId, TOPOLOGY_KEY},
  lock::{LockKey, OperationLocks},
  metadata::Metadata,
};
use async_trait::async_trait;
use pd_csi_mount_utils::{MountError, MountPoint, Mounter};
use pd_csi_proto::{node::*, Error, NodeService, Result};
use std::{
  collections::HashMap,
  io,
  num::NonZeroU64,
  os::unix::fs::FileTypeExt,
  path::{Path, PathBuf},
  sync::Arc,
};
use tokio::fs;
use tracing::{info, warn};

pub const DEFAULT_FS_TYPE: &str = "ext4";

const SHARED_CORE_MACHINE_TYPES: &[&str] = &["e2-micro", "e2-small", "e2-medium", "f1-micro", "g1-small"];
const MAX_VOLUMES_SHARED_CORE: u64 = 15;
const MAX_VOLUMES: u64 = 127;

fn mount_error(err: MountError) -> Error {
  match err {
    MountError::FilesystemMismatch { .. } | MountError::UnformattedReadOnly(_) => {
      Error::FailedPrecondition(err.to_string())
    }
    err => Error::Internal(err.to_string()),
  }
}

fn io_error(what: &str, path: &Path, err: io::Error) -> Error {
  Error::internal(format!("{} {}: {}", what, path.display(), err))
}

/// Max attachable disks for a machine type.
pub fn max_volumes(machine_type: &str) -> u64 {
  if SHARED_CORE_MACHINE_TYPES.contains(&machine_type) {
    MAX_VOLUMES_SHARED_CORE
  } else {
    MAX_VOLUMES
  }
}

fn is_read_only(mp: &MountPoint) -> bool {
  mp.opts().iter().any(|o| o == "ro")
}

async fn resolve(path: &Path) -> PathBuf {
  fs::canonicalize(path).await.unwrap_or_else(|_| path.to_owned())
}

async fn remove_target(path: &Path) -> Result<()> {
  let result = match fs::metadata(path).await {
    Ok(meta) if meta.is_dir() => fs::remove_dir(path).await,
    Ok(_) => fs::remove_file(path).await,
    Err(err) => Err(err),
  };

  match result {
    Err(err) if err.kind() != io::ErrorKind::NotFound => Err(io_error("Failed to remove", path, err)),
    _ => Ok(()),
  }
}

pub struct GceNode {
  mounter: Arc<dyn Mounter>,
  devices: DeviceResolver,
  meta: Metadata,
  locks: OperationLocks,
}

impl GceNode {
  pub fn new(mounter: Arc<dyn Mounter>, devices: DeviceResolver, meta: Metadata, locks: OperationLocks) -> Self {
    GceNode {
      mounter,
      devices,
      meta,
      locks,
    }
  }

  /// The mount table entry at `path`, if any.
  async fn mount_at(&self, path: &Path) -> Result<Option<MountPoint>> {
    let path = resolve(path).await;
    let mps = self.mounter.list().await.map_err(mount_error)?;
    Ok(mps.into_iter().rev().find(|mp| mp.matches(&path)))
  }

  async fn device_for(&self, volume_id: &str, publish_context: &HashMap<String, String>) -> Result<PathBuf> {
    let id: VolumeId = volume_id.parse()?;
    let device_name = publish_context
      .get(CONTEXT_DEVICE_NAME)
      .map(String::as_str)
      .unwrap_or_else(|| id.name());

    self.devices.resolve(device_name).await
  }
}

#[async_trait]
impl NodeService for GceNode {
  fn capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::STAGE_UNSTAGE_VOLUME
      | NodeCapabilities::GET_VOLUME_STATS
      | NodeCapabilities::EXPAND_VOLUME
  }

  async fn node_stage_volume(&self, request: NodeStageVolumeRequest) -> Result<()> {
    let _guard = self
      .locks
      .acquire(LockKey::NodeVolume(request.volume_id().to_owned()))?;

    let device = self
      .device_for(request.volume_id(), request.publish_context())
      .await?;

    let capability = request.volume_capability();
    let mount = match capability.mount() {
      Some(mount) => mount,
      None => {
        info!(device = %device.display(), "block volume needs no staging");
        return Ok(());
      }
    };

    let fs_type = mount.fs_type().unwrap_or(DEFAULT_FS_TYPE);
    let read_only = capability.access_mode().is_read_only();
    let mut options: Vec<String> = mount.mount_flags().map(str::to_owned).collect();
    if read_only {
      options.push("ro".to_owned());
    }

    let staging = request.staging_target_path();
    fs::create_dir_all(staging)
      .await
      .map_err(|e| io_error("Failed to create staging path", staging, e))?;

    let resolved_device = resolve(&device).await;
    let is_device = |mp: &MountPoint| mp.device() == device || mp.device() == resolved_device;

    if let Some(mp) = self.mount_at(staging).await? {
      if is_device(&mp) {
        if mp.fs_type() != fs_type || is_read_only(&mp) != read_only {
          return Err(Error::AlreadyExists(format!(
            "Staging path {} is mounted as {} (read-only: {}), requested {} (read-only: {})",
            staging.display(),
            mp.fs_type(),
            is_read_only(&mp),
            fs_type,
            read_only
          )));
        }

        info!(staging = %staging.display(), "volume already staged");
        return Ok(());
      }

      return Err(Error::failed_precondition(format!(
        "Staging path {} is already mounted from {}",
        staging.display(),
        mp.device().display()
      )));
    }

    let mps = self.mounter.list().await.map_err(mount_error)?;
    if let Some(mp) = mps.iter().find(|mp| is_device(*mp)) {
      return Err(Error::failed_precondition(format!(
        "Device {} is already mounted at {}",
        device.display(),
        mp.path().display()
      )));
    }

    self
      .mounter
      .format_and_mount(&device, staging, fs_type, &options)
      .await
      .map_err(mount_error)?;

    info!(device = %device.display(), staging = %staging.display(), fs_type, "staged volume");
    Ok(())
  }

  async fn node_unstage_volume(&self, request: NodeUnstageVolumeRequest) -> Result<()> {
    let _guard = self
      .locks
      .acquire(LockKey::NodeVolume(request.volume_id().to_owned()))?;

    let staging = request.staging_target_path();
    if fs::metadata(staging).await.is_err() || self.mount_at(staging).await?.is_none() {
      info!(staging = %staging.display(), "volume already unstaged");
      return remove_target(staging).await;
    }

    let refs = self
      .mounter
      .get_mount_refs(staging)
      .await
      .map_err(mount_error)?;
    if !refs.is_empty() {
      return Err(Error::failed_precondition(format!(
        "Staging path {} is still published at {:?}",
        staging.display(),
        refs
      )));
    }

    self.mounter.unmount(staging).await.map_err(mount_error)?;
    remove_target(staging).await?;

    info!(staging = %staging.display(), "unstaged volume");
    Ok(())
  }

  async fn node_publish_volume(&self, request: NodePublishVolumeRequest) -> Result<()> {
    let staging = request
      .staging_target_path()
      .ok_or_else(|| Error::invalid_argument("NodePublishVolumeRequest.staging_target_path is empty"))?;
    let target = request.target_path();
    let capability = request.volume_capability();
    let read_only = request.readonly() || capability.access_mode().is_read_only();

    let _guard = self
      .locks
      .acquire(LockKey::NodeVolume(request.volume_id().to_owned()))?;

    if fs::metadata(target).await.is_ok() {
      if let Some(mp) = self.mount_at(target).await? {
        if is_read_only(&mp) != read_only {
          return Err(Error::AlreadyExists(format!(
            "Target {} is already mounted with read-only={}",
            target.display(),
            is_read_only(&mp)
          )));
        }

        info!(target = %target.display(), "volume already published");
        return Ok(());
      }
    }

    let mut options = vec!["bind".to_owned()];
    let source = match capability.mount() {
      None => {
        let device = self
          .device_for(request.volume_id(), request.publish_context())
          .await?;

        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error("Failed to create parent of", target, e))?;
        }

        fs::OpenOptions::new()
          .create(true)
          .write(true)
          .open(target)
          .await
          .map_err(|e| io_error("Failed to create target file", target, e))?;

        device
      }
      Some(mount) => {
        if self.mount_at(staging).await?.is_none() {
          return Err(Error::failed_precondition(format!(
            "Volume {} is not staged at {}",
            request.volume_id(),
            staging.display()
          )));
        }

        fs::create_dir_all(target)
          .await
          .map_err(|e| io_error("Failed to create target", target, e))?;

        options.extend(mount.mount_flags().map(str::to_owned));
        staging.to_owned()
      }
    };

    if read_only {
      options.push("ro".to_owned());
    }

    if let Err(err) = self.mounter.mount(&source, target, "", &options).await {
      if let Err(cleanup) = remove_target(target).await {
        warn!(target = %target.display(), %cleanup, "failed to remove target after failed mount");
      }

      return Err(mount_error(err));
    }

    info!(source = %source.display(), target = %target.display(), read_only, "published volume");
    Ok(())
  }

  async fn node_unpublish_volume(&self, request: NodeUnpublishVolumeRequest) -> Result<()> {
    let _guard = self
      .locks
      .acquire(LockKey::NodeVolume(request.volume_id().to_owned()))?;

    let target = request.target_path();
    if fs::metadata(target).await.is_err() {
      info!(target = %target.display(), "volume already unpublished");
      return Ok(());
    }

    if self.mount_at(target).await?.is_some() {
      self.mounter.unmount(target).await.map_err(mount_error)?;
    }

    remove_target(target).await?;
    info!(target = %target.display(), "unpublished volume");
    Ok(())
  }

  async fn node_get_volume_stats(
    &self,
    request: NodeGetVolumeStatsRequest,
  ) -> Result<NodeGetVolumeStatsResponse> {
    let path = request.volume_path();
    let meta = match fs::metadata(path).await {
      Ok(meta) => meta,
      Err(err) if err.kind() == io::ErrorKind::NotFound => {
        return Err(Error::not_found(format!("Path {} does not exist", path.display())))
      }
      Err(err) => return Err(io_error("Failed to stat", path, err)),
    };

    if meta.file_type().is_block_device() {
      let size = self.mounter.device_size(path).await.map_err(mount_error)?;
      return Ok(NodeGetVolumeStatsResponse::new(vec![VolumeUsage::new(
        VolumeUsageUnit::Bytes,
        size,
        None,
        None,
      )]));
    }

    let stats = self.mounter.stat_fs(path).await.map_err(mount_error)?;
    Ok(NodeGetVolumeStatsResponse::new(vec![
      VolumeUsage::new(
        VolumeUsageUnit::Bytes,
        stats.total_bytes,
        Some(stats.available_bytes),
        Some(stats.used_bytes),
      ),
      VolumeUsage::new(
        VolumeUsageUnit::Inodes,
        stats.total_inodes,
        Some(stats.free_inodes),
        Some(stats.used_inodes),
      ),
    ]))
  }

  async fn node_expand_volume(&self, request: NodeExpandVolumeRequest) -> Result<NodeExpandVolumeResponse> {
    let _guard = self
      .locks
      .acquire(LockKey::NodeVolume(request.volume_id().to_owned()))?;

    let path = request.volume_path();
    let device = match self
      .mounter
      .get_device_name_from_mount(path)
      .await
      .map_err(mount_error)?
    {
      Some((device, _)) => device,
      None => {
        return Err(Error::not_found(format!(
          "Volume path {} is not mounted",
          path.display()
        )))
      }
    };

    let block = request
      .volume_capability()
      .map_or(false, VolumeCapability::is_block);

    if !block {
      let needs_resize = self
        .mounter
        .needs_resize(&device, path)
        .await
        .map_err(mount_error)?;

      if needs_resize {
        self.mounter.resize(&device, path).await.map_err(mount_error)?;
        info!(device = %device.display(), path = %path.display(), "resized filesystem");
      } else {
        info!(device = %device.display(), "filesystem already fills the device");
      }
    }

    let size = self.mounter.device_size(&device).await.map_err(mount_error)?;
    Ok(NodeExpandVolumeResponse::new(size))
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse> {
    let mut topology = HashMap::new();
    topology.insert(TOPOLOGY_KEY.to_owned(), self.meta.zone().to_owned());

    Ok(NodeGetInfoResponse::new(
      self.meta.node_id().to_string(),
      NonZeroU64::new(max_volumes(self.meta.machine_type())),
      Some(topology),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pd_csi_mount_utils::{FakeAction, FakeMounter, FsStats};
  use pd_csi_proto::{node::Node, proto};
  use proto::node_server::Node as _;
  use proto::volume_capability::{access_mode::Mode, AccessMode, AccessType, BlockVolume, MountVolume};
  use std::time::Duration;
  use tempfile::TempDir;
  use test_case::test_case;
  use tonic::{Code, Request};

  const PROJECT: &str = "test-project";
  const ZONE: &str = "us-central1-c";

  struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    mounter: Arc<FakeMounter>,
    node: Node<GceNode>,
  }

  impl Fixture {
    fn new() -> Self {
      Self::with_machine_type("n1-standard-4")
    }

    fn with_machine_type(machine_type: &str) -> Self {
      let dir = tempfile::tempdir().unwrap();
      let root = dir.path().canonicalize().unwrap();
      std::fs::create_dir(root.join("by-id")).unwrap();

      let mounter = Arc::new(FakeMounter::new(None));
      let devices = DeviceResolver::new(root.join("by-id")).with_retry(1, Duration::from_millis(1));
      let node = GceNode::new(
        mounter.clone(),
        devices,
        Metadata::new(PROJECT, ZONE, "node-1", machine_type),
        OperationLocks::new(),
      );

      Fixture {
        _dir: dir,
        root,
        mounter,
        node: Node::new(Arc::new(node)),
      }
    }

    /// Makes the by-id link of `name` appear.
    fn attach(&self, name: &str) -> PathBuf {
      let device = self.root.join("by-id").join(format!("google-{}", name));
      std::fs::write(&device, b"").unwrap();
      device
    }

    fn path(&self, name: &str) -> PathBuf {
      self.root.join(name)
    }

    fn actions(&self, pred: impl Fn(&FakeAction) -> bool) -> usize {
      self.mounter.get_log().iter().filter(|a| pred(a)).count()
    }
  }

  fn volume_id(name: &str) -> String {
    format!("projects/{}/zones/{}/disks/{}", PROJECT, ZONE, name)
  }

  fn mount_capability(mode: Mode, fs_type: &str) -> proto::VolumeCapability {
    proto::VolumeCapability {
      access_mode: Some(AccessMode { mode: mode as i32 }),
      access_type: Some(AccessType::Mount(MountVolume {
        fs_type: fs_type.into(),
        mount_flags: Vec::new(),
      })),
    }
  }

  fn block_capability() -> proto::VolumeCapability {
    proto::VolumeCapability {
      access_mode: Some(AccessMode {
        mode: Mode::SingleNodeWriter as i32,
      }),
      access_type: Some(AccessType::Block(BlockVolume {})),
    }
  }

  fn stage_request(name: &str, staging: &Path, fs_type: &str) -> proto::NodeStageVolumeRequest {
    proto::NodeStageVolumeRequest {
      volume_id: volume_id(name),
      staging_target_path: staging.to_string_lossy().into_owned(),
      volume_capability: Some(mount_capability(Mode::SingleNodeWriter, fs_type)),
      ..Default::default()
    }
  }

  fn publish_request(name: &str, staging: &Path, target: &Path, readonly: bool) -> proto::NodePublishVolumeRequest {
    proto::NodePublishVolumeRequest {
      volume_id: volume_id(name),
      staging_target_path: staging.to_string_lossy().into_owned(),
      target_path: target.to_string_lossy().into_owned(),
      volume_capability: Some(mount_capability(Mode::SingleNodeWriter, "")),
      readonly,
      ..Default::default()
    }
  }

  fn unpublish_request(name: &str, target: &Path) -> proto::NodeUnpublishVolumeRequest {
    proto::NodeUnpublishVolumeRequest {
      volume_id: volume_id(name),
      target_path: target.to_string_lossy().into_owned(),
    }
  }

  fn unstage_request(name: &str, staging: &Path) -> proto::NodeUnstageVolumeRequest {
    proto::NodeUnstageVolumeRequest {
      volume_id: volume_id(name),
      staging_target_path: staging.to_string_lossy().into_owned(),
    }
  }

  #[tokio::test]
  async fn stage_formats_once() {
    let fx = Fixture::new();
    let device = fx.attach("v1");
    let staging = fx.path("staging");

    for _ in 0..2 {
      fx.node
        .node_stage_volume(Request::new(stage_request("v1", &staging, "")))
        .await
        .unwrap();
    }

    let formats = fx.actions(|a| {
      matches!(a, FakeAction::Format { device: d, fs_type } if *d == device && fs_type == DEFAULT_FS_TYPE)
    });
    assert_eq!(formats, 1);
    assert_eq!(fx.actions(|a| matches!(a, FakeAction::Mount { .. })), 1);
  }

  #[tokio::test]
  async fn restage_with_other_options_is_already_exists() {
    let fx = Fixture::new();
    fx.attach("v1");
    let staging = fx.path("staging");

    fx.node
      .node_stage_volume(Request::new(stage_request("v1", &staging, "ext4")))
      .await
      .unwrap();

    let read_only = proto::NodeStageVolumeRequest {
      volume_capability: Some(mount_capability(Mode::MultiNodeReaderOnly, "ext4")),
      ..stage_request("v1", &staging, "ext4")
    };
    let status = fx.node.node_stage_volume(Request::new(read_only)).await.unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    let status = fx
      .node
      .node_stage_volume(Request::new(stage_request("v1", &staging, "xfs")))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    assert_eq!(fx.actions(|a| matches!(a, FakeAction::Mount { .. })), 1);
  }

  #[tokio::test]
  async fn stage_uses_device_name_from_publish_context() {
    let fx = Fixture::new();
    let device = fx.attach("other-name");
    let staging = fx.path("staging");

    let mut request = stage_request("v1", &staging, "ext4");
    request
      .publish_context
      .insert(CONTEXT_DEVICE_NAME.into(), "other-name".into());
    fx.node.node_stage_volume(Request::new(request)).await.unwrap();

    let mounted = fx.actions(|a| matches!(a, FakeAction::Mount { source, .. } if *source == device));
    assert_eq!(mounted, 1);
  }

  #[tokio::test]
  async fn stage_refuses_to_reformat() {
    let fx = Fixture::new();
    let device = fx.attach("v1");
    fx.mounter.set_disk_format(&device, "xfs");

    let status = fx
      .node
      .node_stage_volume(Request::new(stage_request("v1", &fx.path("staging"), "ext4")))
      .await
      .unwrap_err();

    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(fx.actions(|a| matches!(a, FakeAction::Format { .. })), 0);
  }

  #[tokio::test]
  async fn stage_elsewhere_fails() {
    let fx = Fixture::new();
    fx.attach("v1");

    fx.node
      .node_stage_volume(Request::new(stage_request("v1", &fx.path("a"), "ext4")))
      .await
      .unwrap();

    let status = fx
      .node
      .node_stage_volume(Request::new(stage_request("v1", &fx.path("b"), "ext4")))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
  }

  #[tokio::test]
  async fn stage_without_device_is_internal() {
    let fx = Fixture::new();

    let status = fx
      .node
      .node_stage_volume(Request::new(stage_request("v1", &fx.path("staging"), "ext4")))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
  }

  #[tokio::test]
  async fn block_stage_only_checks_the_device() {
    let fx = Fixture::new();
    fx.attach("v1");

    let request = proto::NodeStageVolumeRequest {
      volume_capability: Some(block_capability()),
      ..stage_request("v1", &fx.path("staging"), "")
    };
    fx.node.node_stage_volume(Request::new(request)).await.unwrap();

    assert!(fx.mounter.get_log().is_empty());
  }

  #[tokio::test]
  async fn full_lifecycle() {
    let fx = Fixture::new();
    fx.attach("v1");
    let staging = fx.path("staging");
    let target = fx.path("pods/a/volume");

    fx.node
      .node_stage_volume(Request::new(stage_request("v1", &staging, "ext4")))
      .await
      .unwrap();

    for _ in 0..2 {
      fx.node
        .node_publish_volume(Request::new(publish_request("v1", &staging, &target, false)))
        .await
        .unwrap();
    }
    assert_eq!(fx.actions(|a| matches!(a, FakeAction::Mount { .. })), 2);

    let status = fx
      .node
      .node_publish_volume(Request::new(publish_request("v1", &staging, &target, true)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);

    let status = fx
      .node
      .node_unstage_volume(Request::new(unstage_request("v1", &staging)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);

    for _ in 0..2 {
      fx.node
        .node_unpublish_volume(Request::new(unpublish_request("v1", &target)))
        .await
        .unwrap();
    }
    assert!(!target.exists());

    for _ in 0..2 {
      fx.node
        .node_unstage_volume(Request::new(unstage_request("v1", &staging)))
        .await
        .unwrap();
    }

    assert_eq!(fx.actions(|a| matches!(a, FakeAction::Unmount { .. })), 2);
    assert!(!staging.exists());
  }

  #[tokio::test]
  async fn readonly_publish_mounts_ro() {
    let fx = Fixture::new();
    fx.attach("v1");
    let staging = fx.path("staging");
    let target = fx.path("target");

    fx.node
      .node_stage_volume(Request::new(stage_request("v1", &staging, "ext4")))
      .await
      .unwrap();
    fx.node
      .node_publish_volume(Request::new(publish_request("v1", &staging, &target, true)))
      .await
      .unwrap();

    let ro_binds = fx.actions(|a| {
      matches!(a, FakeAction::Mount { options, .. } if options.iter().any(|o| o == "bind") && options.iter().any(|o| o == "ro"))
    });
    assert_eq!(ro_binds, 1);
  }

  #[tokio::test]
  async fn publish_requires_staging() {
    let fx = Fixture::new();
    fx.attach("v1");

    let status = fx
      .node
      .node_publish_volume(Request::new(publish_request(
        "v1",
        &fx.path("staging"),
        &fx.path("target"),
        false,
      )))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);

    let request = proto::NodePublishVolumeRequest {
      staging_target_path: String::new(),
      ..publish_request("v1", &fx.path("staging"), &fx.path("target"), false)
    };
    let status = fx.node.node_publish_volume(Request::new(request)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
  }

  #[tokio::test]
  async fn failed_publish_removes_target() {
    let fx = Fixture::new();
    fx.attach("v1");
    let staging = fx.path("staging");
    let target = fx.path("target");

    fx.node
      .node_stage_volume(Request::new(stage_request("v1", &staging, "ext4")))
      .await
      .unwrap();
    fx.mounter.fail_mount(&target, "mount: permission denied");

    let status = fx
      .node
      .node_publish_volume(Request::new(publish_request("v1", &staging, &target, false)))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(!target.exists());
  }

  #[tokio::test]
  async fn block_publish_binds_the_device() {
    let fx = Fixture::new();
    let device = fx.attach("v1");
    let target = fx.path("pods/b/dev/v1");

    let request = proto::NodePublishVolumeRequest {
      volume_capability: Some(block_capability()),
      ..publish_request("v1", &fx.path("staging"), &target, false)
    };
    fx.node.node_publish_volume(Request::new(request)).await.unwrap();

    assert!(target.is_file());
    let binds = fx.actions(|a| matches!(a, FakeAction::Mount { source, .. } if *source == device));
    assert_eq!(binds, 1);
  }

  #[tokio::test]
  async fn volume_stats() {
    let fx = Fixture::new();
    let path = fx.path("mounted");
    std::fs::create_dir(&path).unwrap();
    fx.mounter.set_fs_stats(
      &path,
      FsStats {
        total_bytes: 100,
        available_bytes: 60,
        used_bytes: 40,
        total_inodes: 10,
        free_inodes: 7,
        used_inodes: 3,
      },
    );

    let stats = fx
      .node
      .node_get_volume_stats(Request::new(proto::NodeGetVolumeStatsRequest {
        volume_id: volume_id("v1"),
        volume_path: path.to_string_lossy().into_owned(),
        ..Default::default()
      }))
      .await
      .unwrap()
      .into_inner();

    assert_eq!(stats.usage.len(), 2);
    assert_eq!((stats.usage[0].total, stats.usage[0].available, stats.usage[0].used), (100, 60, 40));
    assert_eq!((stats.usage[1].total, stats.usage[1].available, stats.usage[1].used), (10, 7, 3));

    let status = fx
      .node
      .node_get_volume_stats(Request::new(proto::NodeGetVolumeStatsRequest {
        volume_id: volume_id("v1"),
        volume_path: fx.path("missing").to_string_lossy().into_owned(),
        ..Default::default()
      }))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
  }

  #[tokio::test]
  async fn expand_resizes_only_when_needed() {
    let fx = Fixture::new();
    let device = fx.attach("v1");
    let staging = fx.path("staging");
    fx.mounter.set_device_size(&device, 10 << 30);

    fx.node
      .node_stage_volume(Request::new(stage_request("v1", &staging, "ext4")))
      .await
      .unwrap();
    fx.mounter.set_device_size(&device, 20 << 30);

    let request = || proto::NodeExpandVolumeRequest {
      volume_id: volume_id("v1"),
      volume_path: staging.to_string_lossy().into_owned(),
      ..Default::default()
    };

    for _ in 0..2 {
      let response = fx
        .node
        .node_expand_volume(Request::new(request()))
        .await
        .unwrap()
        .into_inner();
      assert_eq!(response.capacity_bytes, 20 << 30);
    }
    assert_eq!(fx.actions(|a| matches!(a, FakeAction::Resize { .. })), 1);

    let status = fx
      .node
      .node_expand_volume(Request::new(proto::NodeExpandVolumeRequest {
        volume_path: fx.path("not-mounted").to_string_lossy().into_owned(),
        ..request()
      }))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
  }

  #[tokio::test]
  async fn block_expand_reports_device_size() {
    let fx = Fixture::new();
    let device = fx.attach("v1");
    let target = fx.path("pods/b/dev/v1");
    fx.mounter.set_device_size(&device, 10 << 30);

    let publish = proto::NodePublishVolumeRequest {
      volume_capability: Some(block_capability()),
      ..publish_request("v1", &fx.path("staging"), &target, false)
    };
    fx.node.node_publish_volume(Request::new(publish)).await.unwrap();
    fx.mounter.set_device_size(&device, 30 << 30);

    let response = fx
      .node
      .node_expand_volume(Request::new(proto::NodeExpandVolumeRequest {
        volume_id: volume_id("v1"),
        volume_path: target.to_string_lossy().into_owned(),
        volume_capability: Some(block_capability()),
        ..Default::default()
      }))
      .await
      .unwrap()
      .into_inner();

    assert_eq!(response.capacity_bytes, 30 << 30);
    assert_eq!(fx.actions(|a| matches!(a, FakeAction::Resize { .. })), 0);
  }

  #[test_case("n1-standard-4" => 127)]
  #[test_case("e2-medium" => 15)]
  #[test_case("f1-micro" => 15)]
  fn volume_limit(machine_type: &str) -> u64 {
    max_volumes(machine_type)
  }

  #[tokio::test]
  async fn node_info() {
    let fx = Fixture::with_machine_type("e2-small");

    let info = fx
      .node
      .node_get_info(Request::new(proto::NodeGetInfoRequest {}))
      .await
      .unwrap()
      .into_inner();

    assert_eq!(info.node_id, format!("projects/{}/zones/{}/instances/node-1", PROJECT, ZONE));
    assert_eq!(info.max_volumes_per_node, 15);
    assert_eq!(
      info.accessible_topology.unwrap().segments.get(TOPOLOGY_KEY).map(String::as_str),
      Some(ZONE)
    );
  }

  #[tokio::test]
  async fn node_capabilities() {
    let fx = Fixture::new();

    let response = fx
      .node
      .node_get_capabilities(Request::new(proto::NodeGetCapabilitiesRequest {}))
      .await
      .unwrap()
      .into_inner();

    assert_eq!(response.capabilities.len(), 3);
  }

  #[tokio::test]
  async fn concurrent_node_operation_is_aborted() {
    let fx = Fixture::new();
    let inner = GceNode::new(
      fx.mounter.clone(),
      DeviceResolver::new(fx.root.join("by-id")),
      Metadata::new(PROJECT, ZONE, "node-1", "n1-standard-4"),
      OperationLocks::new(),
    );
    let _held = inner
      .locks
      .acquire(LockKey::NodeVolume(volume_id("v1")))
      .unwrap();

    let node = Node::new(Arc::new(inner));
    let status = node
      .node_unstage_volume(Request::new(unstage_request("v1", &fx.path("staging"))))
      .await
      .unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
  }
}
