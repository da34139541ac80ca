cfg_if::cfg_if! {
  if #[cfg(unix)] {
    mod unix;
    use unix::OsMounter;
  } else {
    compile_error!("Only cfg(unix) is supported at this time")
  }
}

mod fake;
mod format;
mod runner;
mod stats;

pub use fake::FakeAction;
pub use stats::FsStats;

use async_trait::async_trait;
use runner::{run, run_inst, MounterImpl, MounterWrapper};
use static_assertions::{assert_impl_all, assert_obj_safe};
use std::{
  fmt, io,
  path::{Path, PathBuf},
  result,
  sync::Arc,
};
use thiserror::Error;

pub type Result<T> = result::Result<T, MountError>;

/// Mount, format and resize operations on the host.
///
/// Implementations run the blocking work on a small pool of dispatcher
/// threads, so calls for different volumes do not wait on each other.
#[async_trait]
pub trait Mounter: Send + Sync + 'static {
  /// Mounts `source` at `target` as `fs_type` with the given options.
  /// Options MUST NOT contain sensitive material.
  async fn mount(&self, source: &Path, target: &Path, fs_type: &str, options: &[String]) -> Result<()>;

  /// Same as [Mounter::mount], but `sensitive_options` are never logged.
  async fn mount_sensitive(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()>;

  async fn unmount(&self, target: &Path) -> Result<()>;

  /// All mounted filesystems.
  async fn list(&self) -> Result<Vec<MountPoint>>;

  /// Fast heuristic: a directory on the same device as its parent is likely
  /// not a mount point. Does not detect bind mounts. Fails with `NotFound`
  /// when `file` does not exist.
  async fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool>;

  /// Slow but exact check against the mount table.
  async fn is_not_mount_point(&self, file: &Path) -> Result<bool>;

  /// Other mount points referencing the same filesystem as `path`.
  /// `path` itself is not included.
  async fn get_mount_refs(&self, path: &Path) -> Result<Vec<PathBuf>>;

  /// The device mounted at `mount_path` and how many mounts reference it.
  async fn get_device_name_from_mount(&self, mount_path: &Path) -> Result<Option<(PathBuf, usize)>>;

  /// The filesystem on `device`, or `None` when it carries no recognizable
  /// filesystem or partition table.
  async fn get_disk_format(&self, device: &Path) -> Result<Option<String>>;

  /// Mounts `source` at `target`, formatting it as `fs_type` first if it is
  /// blank. Refuses to format a device holding a different filesystem.
  async fn format_and_mount(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &[String],
  ) -> Result<()>;

  /// Whether the filesystem on `device` is smaller than the device.
  async fn needs_resize(&self, device: &Path, mount_path: &Path) -> Result<bool>;

  /// Grows the filesystem on `device`, mounted at `mount_path`, to fill it.
  async fn resize(&self, device: &Path, mount_path: &Path) -> Result<()>;

  /// Size of the block device in bytes.
  async fn device_size(&self, device: &Path) -> Result<u64>;

  async fn stat_fs(&self, path: &Path) -> Result<FsStats>;
}

assert_obj_safe!(Mounter);

/// A single line of `/proc/mounts`.
#[derive(Clone, PartialEq, Eq)]
pub struct MountPoint {
  device: PathBuf,
  path: PathBuf,
  fs_type: String,
  opts: Vec<String>,
}

impl fmt::Debug for MountPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountPoint")
      .field("device", &self.device)
      .field("path", &self.path)
      .field("type", &self.fs_type)
      .field("opts", &format!("length={}", self.opts.len()))
      .finish()
  }
}

impl MountPoint {
  pub fn new(
    device: impl Into<PathBuf>,
    path: impl Into<PathBuf>,
    fs_type: impl Into<String>,
    opts: Vec<String>,
  ) -> Self {
    MountPoint {
      device: device.into(),
      path: path.into(),
      fs_type: fs_type.into(),
      opts,
    }
  }

  #[inline]
  pub fn device(&self) -> &Path {
    &self.device
  }

  #[inline]
  pub fn path(&self) -> &Path {
    &self.path
  }

  #[inline]
  pub fn fs_type(&self) -> &str {
    &self.fs_type
  }

  #[inline]
  pub fn opts(&self) -> &[String] {
    &self.opts
  }

  /// Whether this entry is mounted at `dir`, including a mount whose directory
  /// has since been deleted.
  pub fn matches(&self, dir: &Path) -> bool {
    if self.path == dir {
      return true;
    }

    let deleted = format!("{}\\040(deleted)", dir.display());
    self.path == Path::new(&deleted)
  }
}

#[derive(Debug, Error)]
pub enum MountError {
  #[error("{device} already holds a {existing} filesystem, refusing to format it as {requested}")]
  FilesystemMismatch {
    device: PathBuf,
    existing: String,
    requested: String,
  },

  #[error("{0} is unformatted and was requested read-only")]
  UnformattedReadOnly(PathBuf),

  #[error("Format of {0} failed")]
  FormatFailed(PathBuf, #[source] io::Error),

  #[error("Get disk format of {0} failed")]
  GetDiskFormatFailed(PathBuf, #[source] io::Error),

  #[error("Resize of {0} failed")]
  ResizeFailed(PathBuf, #[source] io::Error),

  #[error("Unknown mount error: {0}")]
  UnknownMountError(#[from] io::Error),
}

impl MountError {
  fn io(&self) -> Option<&io::Error> {
    match self {
      MountError::FilesystemMismatch { .. } => None,
      MountError::UnformattedReadOnly(_) => None,
      MountError::FormatFailed(_, e) => Some(e),
      MountError::GetDiskFormatFailed(_, e) => Some(e),
      MountError::ResizeFailed(_, e) => Some(e),
      MountError::UnknownMountError(e) => Some(e),
    }
  }

  pub fn is_permission_error(&self) -> bool {
    matches!(self.io().map(io::Error::kind), Some(io::ErrorKind::PermissionDenied))
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self.io().map(io::Error::kind), Some(io::ErrorKind::NotFound))
  }

  pub(crate) fn new(msg: impl Into<String>) -> Self {
    MountError::UnknownMountError(io::Error::new(io::ErrorKind::Other, msg.into()))
  }
}

fn owned(options: &[String]) -> Vec<String> {
  options.to_vec()
}

#[async_trait]
impl<T> Mounter for T
where
  T: MounterWrapper + Send + Sync + 'static,
{
  async fn mount(&self, source: &Path, target: &Path, fs_type: &str, options: &[String]) -> Result<()> {
    let (source, target, fs_type, options) = (source.to_owned(), target.to_owned(), fs_type.to_owned(), owned(options));

    run_inst(self.mounter().clone(), move |mounter| {
      mounter.mount(&source, &target, &fs_type, &options)
    })
    .await
  }

  async fn mount_sensitive(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()> {
    let (source, target, fs_type) = (source.to_owned(), target.to_owned(), fs_type.to_owned());
    let (options, sensitive_options) = (owned(options), owned(sensitive_options));

    run_inst(self.mounter().clone(), move |mounter| {
      mounter.mount_sensitive(&source, &target, &fs_type, &options, &sensitive_options)
    })
    .await
  }

  async fn unmount(&self, target: &Path) -> Result<()> {
    let target = target.to_owned();
    run_inst(self.mounter().clone(), move |mounter| mounter.unmount(&target)).await
  }

  async fn list(&self) -> Result<Vec<MountPoint>> {
    run_inst(self.mounter().clone(), |mounter| mounter.list()).await
  }

  async fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    let file = file.to_owned();
    run_inst(self.mounter().clone(), move |mounter| {
      mounter.is_likely_not_mount_point(&file)
    })
    .await
  }

  async fn is_not_mount_point(&self, file: &Path) -> Result<bool> {
    let file = file.to_owned();
    run_inst(self.mounter().clone(), move |mounter| mounter.is_not_mount_point(&file)).await
  }

  async fn get_mount_refs(&self, path: &Path) -> Result<Vec<PathBuf>> {
    let path = path.to_owned();
    run_inst(self.mounter().clone(), move |mounter| mounter.get_mount_refs(&path)).await
  }

  async fn get_device_name_from_mount(&self, mount_path: &Path) -> Result<Option<(PathBuf, usize)>> {
    let mount_path = mount_path.to_owned();
    run_inst(self.mounter().clone(), move |mounter| {
      mounter.get_device_name_from_mount(&mount_path)
    })
    .await
  }

  async fn get_disk_format(&self, device: &Path) -> Result<Option<String>> {
    let device = device.to_owned();
    run_inst(self.mounter().clone(), move |mounter| mounter.get_disk_format(&device)).await
  }

  async fn format_and_mount(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &[String],
  ) -> Result<()> {
    let (source, target, fs_type, options) = (source.to_owned(), target.to_owned(), fs_type.to_owned(), owned(options));

    run_inst(self.mounter().clone(), move |mounter| {
      mounter.format_and_mount(&source, &target, &fs_type, &options)
    })
    .await
  }

  async fn needs_resize(&self, device: &Path, mount_path: &Path) -> Result<bool> {
    let (device, mount_path) = (device.to_owned(), mount_path.to_owned());
    run_inst(self.mounter().clone(), move |mounter| {
      mounter.needs_resize(&device, &mount_path)
    })
    .await
  }

  async fn resize(&self, device: &Path, mount_path: &Path) -> Result<()> {
    let (device, mount_path) = (device.to_owned(), mount_path.to_owned());
    run_inst(self.mounter().clone(), move |mounter| mounter.resize(&device, &mount_path)).await
  }

  async fn device_size(&self, device: &Path) -> Result<u64> {
    let device = device.to_owned();
    run_inst(self.mounter().clone(), move |mounter| mounter.device_size(&device)).await
  }

  async fn stat_fs(&self, path: &Path) -> Result<FsStats> {
    let path = path.to_owned();
    run_inst(self.mounter().clone(), move |mounter| mounter.stat_fs(&path)).await
  }
}

assert_impl_all!(OsMounter: MounterImpl);
assert_impl_all!(fake::FakeMounterImpl: MounterImpl);

/// Mounter backed by the host's `mount(8)`, `blkid(8)` and mkfs tools.
pub struct DefaultMounter(Arc<OsMounter>);

impl DefaultMounter {
  pub async fn new() -> Result<Self> {
    let inner = run(OsMounter::new).await?;
    Ok(DefaultMounter(Arc::new(inner)))
  }
}

impl MounterWrapper for DefaultMounter {
  type Mounter = OsMounter;

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}

/// In-memory mounter for tests. Keeps a mount table and a log of every
/// mutating action.
pub struct FakeMounter(Arc<fake::FakeMounterImpl>);

impl FakeMounter {
  pub fn new(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    FakeMounter(Arc::new(fake::FakeMounterImpl::new(mps)))
  }

  /// Pretend `device` already holds a `fs_type` filesystem.
  pub fn set_disk_format(&self, device: impl Into<PathBuf>, fs_type: impl Into<String>) {
    self.0.set_disk_format(device.into(), fs_type.into())
  }

  pub fn set_device_size(&self, device: impl Into<PathBuf>, size: u64) {
    self.0.set_device_size(device.into(), size)
  }

  pub fn set_fs_size(&self, device: impl Into<PathBuf>, size: u64) {
    self.0.set_fs_size(device.into(), size)
  }

  pub fn set_fs_stats(&self, path: impl Into<PathBuf>, stats: FsStats) {
    self.0.set_fs_stats(path.into(), stats)
  }

  /// Make the next mount onto `target` fail with `message`.
  pub fn fail_mount(&self, target: impl Into<PathBuf>, message: impl Into<String>) {
    self.0.fail_mount(target.into(), message.into())
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    self.0.get_log()
  }
}

impl MounterWrapper for FakeMounter {
  type Mounter = fake::FakeMounterImpl;

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}
