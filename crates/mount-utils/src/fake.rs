use crate::{runner::MounterImpl, FsStats, MountError, MountPoint, Result};
use std::{
  collections::HashMap,
  fs, io,
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard},
};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeAction {
  Mount {
    target: PathBuf,
    source: PathBuf,
    fs_type: String,
    options: Vec<String>,
  },

  Unmount {
    target: PathBuf,
  },

  Format {
    device: PathBuf,
    fs_type: String,
  },

  Resize {
    device: PathBuf,
  },
}

#[derive(Default)]
struct State {
  mount_points: Vec<MountPoint>,
  log: Vec<FakeAction>,
  disk_formats: HashMap<PathBuf, String>,
  device_sizes: HashMap<PathBuf, u64>,
  fs_sizes: HashMap<PathBuf, u64>,
  fs_stats: HashMap<PathBuf, FsStats>,
  mount_errors: HashMap<PathBuf, String>,
}

pub struct FakeMounterImpl(Mutex<State>);

fn resolve(path: &Path) -> PathBuf {
  // paths under test are often never created
  fs::canonicalize(path).unwrap_or_else(|_| path.to_owned())
}

impl FakeMounterImpl {
  pub(crate) fn new(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    FakeMounterImpl(Mutex::new(State {
      mount_points: mps.into_iter().collect(),
      ..State::default()
    }))
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub(crate) fn set_disk_format(&self, device: PathBuf, fs_type: String) {
    self.state().disk_formats.insert(device, fs_type);
  }

  pub(crate) fn set_device_size(&self, device: PathBuf, size: u64) {
    self.state().device_sizes.insert(device, size);
  }

  pub(crate) fn set_fs_size(&self, device: PathBuf, size: u64) {
    self.state().fs_sizes.insert(device, size);
  }

  pub(crate) fn set_fs_stats(&self, path: PathBuf, stats: FsStats) {
    self.state().fs_stats.insert(resolve(&path), stats);
  }

  pub(crate) fn fail_mount(&self, target: PathBuf, message: String) {
    self.state().mount_errors.insert(resolve(&target), message);
  }

  pub(crate) fn get_log(&self) -> Vec<FakeAction> {
    self.state().log.clone()
  }
}

impl MounterImpl for FakeMounterImpl {
  fn mount_sensitive(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()> {
    let mut state = self.state();
    let target = resolve(target);

    if let Some(message) = state.mount_errors.remove(&target) {
      return Err(MountError::new(message));
    }

    let mut source = source.to_owned();
    if options.iter().any(|o| o == "bind") {
      // Like the kernel, record the device behind a bind mount rather than
      // the directory it was bound from.
      let resolved = resolve(&source);
      if let Some(mp) = state.mount_points.iter().find(|mp| mp.path() == resolved) {
        source = mp.device().to_owned();
      }
    }

    let opts = options.iter().chain(sensitive_options).cloned().collect();
    state.mount_points.push(MountPoint::new(&source, &target, fs_type, opts));
    info!(
      "Fake mounter: mounted {} to {}",
      source.display(),
      target.display()
    );

    state.log.push(FakeAction::Mount {
      target,
      source,
      fs_type: fs_type.to_owned(),
      options: options.to_vec(),
    });

    Ok(())
  }

  fn unmount(&self, target: &Path) -> Result<()> {
    let mut state = self.state();
    let target = resolve(target);

    match state.mount_points.iter().rposition(|mp| mp.path() == target) {
      Some(i) => {
        let mp = state.mount_points.remove(i);
        info!(
          "Fake mounter: unmounted {} from {}",
          mp.device().display(),
          target.display()
        );
      }
      None => {
        return Err(MountError::new(format!("{} is not mounted", target.display())));
      }
    }

    state.log.push(FakeAction::Unmount { target });
    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    Ok(self.state().mount_points.clone())
  }

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    fs::metadata(file)?;

    let file = resolve(file);
    let mounted = self.state().mount_points.iter().any(|mp| mp.path() == file);
    Ok(!mounted)
  }

  fn get_mount_refs(&self, path: &Path) -> Result<Vec<PathBuf>> {
    self.get_mount_refs_by_dev(&resolve(path))
  }

  fn get_disk_format(&self, device: &Path) -> Result<Option<String>> {
    Ok(self.state().disk_formats.get(device).cloned())
  }

  fn format(&self, device: &Path, fs_type: &str) -> Result<()> {
    let mut state = self.state();
    state.disk_formats.insert(device.to_owned(), fs_type.to_owned());
    if let Some(size) = state.device_sizes.get(device).copied() {
      state.fs_sizes.insert(device.to_owned(), size);
    }

    state.log.push(FakeAction::Format {
      device: device.to_owned(),
      fs_type: fs_type.to_owned(),
    });

    Ok(())
  }

  fn device_size(&self, device: &Path) -> Result<u64> {
    Ok(self.state().device_sizes.get(device).copied().unwrap_or_default())
  }

  fn filesystem_size(&self, device: &Path, _: &Path, _: &str) -> Result<u64> {
    Ok(self.state().fs_sizes.get(device).copied().unwrap_or_default())
  }

  fn resize(&self, device: &Path, _: &Path) -> Result<()> {
    let mut state = self.state();
    let size = state.device_sizes.get(device).copied().unwrap_or_default();
    state.fs_sizes.insert(device.to_owned(), size);
    state.log.push(FakeAction::Resize {
      device: device.to_owned(),
    });

    Ok(())
  }

  fn stat_fs(&self, path: &Path) -> Result<FsStats> {
    let path = resolve(path);
    self.state().fs_stats.get(&path).copied().ok_or_else(|| {
      MountError::UnknownMountError(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no filesystem stats for {}", path.display()),
      ))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  fn mp(device: &str, path: &str) -> MountPoint {
    MountPoint::new(device, path, "ext4", Vec::new())
  }

  fn table() -> FakeMounterImpl {
    FakeMounterImpl::new(vec![
      mp("/dev/sdb", "/var/lib/kubelet/plugins/pd/globalmount/disk-1"),
      mp("/dev/sdb", "/var/lib/kubelet/pods/a/volumes/disk-1"),
      mp("/dev/sdc", "/var/lib/kubelet/plugins/pd/globalmount/disk-2"),
      mp("/dev/sdc", "/var/lib/kubelet/pods/b/volumes/disk-2"),
      mp("/dev/sdc", "/var/lib/kubelet/pods/c/volumes/disk-2"),
    ])
  }

  fn set(paths: &[&str]) -> HashSet<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
  }

  #[test]
  fn mount_refs_share_a_device() {
    let fm = table();

    let refs = fm
      .get_mount_refs(Path::new("/var/lib/kubelet/pods/b/volumes/disk-2"))
      .unwrap();
    assert_eq!(
      refs.into_iter().collect::<HashSet<_>>(),
      set(&[
        "/var/lib/kubelet/plugins/pd/globalmount/disk-2",
        "/var/lib/kubelet/pods/c/volumes/disk-2",
      ])
    );

    let refs = fm.get_mount_refs(Path::new("/var/fake/directory")).unwrap();
    assert!(refs.is_empty());
  }

  #[test]
  fn device_name_from_mount_counts_refs() {
    let fm = table();
    let (device, refs) = fm
      .get_device_name_from_mount(Path::new("/var/lib/kubelet/pods/a/volumes/disk-1"))
      .unwrap()
      .expect("mounted");

    assert_eq!(device, PathBuf::from("/dev/sdb"));
    assert_eq!(refs, 2);
  }

  #[test]
  fn bind_mount_records_underlying_device() {
    let fm = table();
    fm.mount(
      Path::new("/var/lib/kubelet/plugins/pd/globalmount/disk-1"),
      Path::new("/var/lib/kubelet/pods/d/volumes/disk-1"),
      "ext4",
      &["bind".to_owned()],
    )
    .unwrap();

    let (device, refs) = fm
      .get_device_name_from_mount(Path::new("/var/lib/kubelet/pods/d/volumes/disk-1"))
      .unwrap()
      .expect("mounted");
    assert_eq!(device, PathBuf::from("/dev/sdb"));
    assert_eq!(refs, 3);
  }

  #[test]
  fn format_and_mount_formats_blank_disks_once() {
    let fm = FakeMounterImpl::new(None);
    let device = Path::new("/dev/sdz");

    fm.format_and_mount(device, Path::new("/mnt/a"), "ext4", &[]).unwrap();
    fm.unmount(Path::new("/mnt/a")).unwrap();
    fm.format_and_mount(device, Path::new("/mnt/a"), "ext4", &[]).unwrap();

    let formats = fm
      .get_log()
      .into_iter()
      .filter(|a| matches!(a, FakeAction::Format { .. }))
      .count();
    assert_eq!(formats, 1);
  }

  #[test]
  fn format_and_mount_guards_existing_filesystem() {
    let fm = FakeMounterImpl::new(None);
    fm.set_disk_format("/dev/sdz".into(), "xfs".into());

    let err = fm
      .format_and_mount(Path::new("/dev/sdz"), Path::new("/mnt/a"), "ext4", &[])
      .unwrap_err();
    assert!(matches!(err, MountError::FilesystemMismatch { .. }));
    assert!(fm.list().unwrap().is_empty());
  }

  #[test]
  fn blank_read_only_disk_is_not_formatted() {
    let fm = FakeMounterImpl::new(None);

    let err = fm
      .format_and_mount(Path::new("/dev/sdz"), Path::new("/mnt/a"), "ext4", &["ro".to_owned()])
      .unwrap_err();
    assert!(matches!(err, MountError::UnformattedReadOnly(_)));
    assert!(fm.get_log().is_empty());
  }

  #[test]
  fn resize_is_needed_until_filesystem_fills_device() {
    let fm = FakeMounterImpl::new(None);
    let device = Path::new("/dev/sdz");
    fm.set_disk_format(device.into(), "ext4".into());
    fm.set_device_size(device.into(), 20 << 30);
    fm.set_fs_size(device.into(), 10 << 30);

    assert!(fm.needs_resize(device, Path::new("/mnt/a")).unwrap());
    fm.resize(device, Path::new("/mnt/a")).unwrap();
    assert!(!fm.needs_resize(device, Path::new("/mnt/a")).unwrap());
  }

  #[test]
  fn not_mount_point_checks_table() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target");
    fs::create_dir(&target).unwrap();
    let fm = FakeMounterImpl::new(None);

    assert!(fm.is_not_mount_point(&target).unwrap());
    fm.mount(Path::new("/dev/sdz"), &target, "ext4", &[]).unwrap();
    assert!(!fm.is_not_mount_point(&target).unwrap());

    let missing = fm.is_likely_not_mount_point(&dir.path().join("missing")).unwrap_err();
    assert!(missing.is_not_found());
  }
}
