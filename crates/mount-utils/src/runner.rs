use crate::{FsStats, MountError, MountPoint, Result};
use futures::channel::oneshot;
use once_cell::sync::OnceCell;
use std::{
  fs,
  future::Future,
  panic::{catch_unwind, AssertUnwindSafe, RefUnwindSafe, UnwindSafe},
  path::{Path, PathBuf},
  sync::Arc,
};
use tracing::{error, info, Span};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Blocking half of a mounter. Every method runs on a dispatcher thread, so
/// implementations are free to shell out and wait. Calls may run concurrently;
/// callers serialize work on the same volume themselves.
pub trait MounterImpl: Sized + Send + Sync + UnwindSafe + RefUnwindSafe + 'static {
  fn mount(&self, source: &Path, target: &Path, fs_type: &str, options: &[String]) -> Result<()> {
    self.mount_sensitive(source, target, fs_type, options, &[])
  }

  fn mount_sensitive(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()>;

  fn unmount(&self, target: &Path) -> Result<()>;

  fn list(&self) -> Result<Vec<MountPoint>>;

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool>;

  fn get_mount_refs(&self, path: &Path) -> Result<Vec<PathBuf>>;

  fn get_disk_format(&self, device: &Path) -> Result<Option<String>>;

  fn format(&self, device: &Path, fs_type: &str) -> Result<()>;

  fn device_size(&self, device: &Path) -> Result<u64>;

  /// Size in bytes of the `fs_type` filesystem on `device`.
  fn filesystem_size(&self, device: &Path, mount_path: &Path, fs_type: &str) -> Result<u64>;

  fn resize(&self, device: &Path, mount_path: &Path) -> Result<()>;

  fn stat_fs(&self, path: &Path) -> Result<FsStats>;

  /// Mount points sharing a device with `mount_path`. `mount_path` must
  /// already be resolved.
  fn get_mount_refs_by_dev(&self, mount_path: &Path) -> Result<Vec<PathBuf>> {
    let mps = self.list()?;
    let device = mps
      .iter()
      .find(|m| m.path() == mount_path)
      .map(|m| m.device().to_owned());

    Ok(
      mps
        .into_iter()
        .filter(|m| m.path() != mount_path)
        .filter(|m| Some(m.device()) == device.as_deref() || m.device() == mount_path)
        .map(|m| m.path)
        .collect(),
    )
  }

  fn get_device_name_from_mount(&self, mount_path: &Path) -> Result<Option<(PathBuf, usize)>> {
    let mps = self.list()?;
    let mount_path = fs::canonicalize(mount_path).unwrap_or_else(|_| mount_path.to_owned());

    let device = match mps.iter().find(|m| m.path() == mount_path) {
      None => return Ok(None),
      Some(m) => m.device().to_owned(),
    };

    let refs = mps.iter().filter(|m| m.device() == device).count();
    Ok(Some((device, refs)))
  }

  fn is_not_mount_point(&self, file: &Path) -> Result<bool> {
    let likely_not = match self.is_likely_not_mount_point(file) {
      Ok(v) => v,
      // stat may be denied (root squash); fall back to the mount table
      Err(e) if e.is_permission_error() => true,
      Err(e) => return Err(e),
    };

    if !likely_not {
      return Ok(false);
    }

    // the kernel records resolved paths in the mount table
    let resolved = match fs::canonicalize(file) {
      Ok(v) => v,
      Err(_) => return Ok(true),
    };

    Ok(!self.list()?.iter().any(|mp| mp.matches(&resolved)))
  }

  fn format_and_mount(&self, source: &Path, target: &Path, fs_type: &str, options: &[String]) -> Result<()> {
    let read_only = options.iter().any(|o| o == "ro");

    match self.get_disk_format(source)? {
      None if read_only => Err(MountError::UnformattedReadOnly(source.to_owned())),
      None => {
        info!(
          "Disk {} appears to be unformatted, formatting as {}",
          source.display(),
          fs_type
        );
        self.format(source, fs_type)?;
        self.mount(source, target, fs_type, options)
      }
      Some(existing) if existing != fs_type => Err(MountError::FilesystemMismatch {
        device: source.to_owned(),
        existing,
        requested: fs_type.to_owned(),
      }),
      Some(_) => self.mount(source, target, fs_type, options),
    }
  }

  fn needs_resize(&self, device: &Path, mount_path: &Path) -> Result<bool> {
    let fs_type = match self.get_disk_format(device)? {
      None => return Ok(false),
      Some(v) => v,
    };

    let device_size = self.device_size(device)?;
    let fs_size = self.filesystem_size(device, mount_path, &fs_type)?;
    Ok(device_size > fs_size)
  }
}

/// Access to the [MounterImpl] behind a public mounter handle.
pub trait MounterWrapper {
  type Mounter: MounterImpl;

  fn mounter(&self) -> &Arc<Self::Mounter>;
}

/// Worker threads draining the shared job queue. A slow job (say, `mkfs` on a
/// large disk) only occupies one of them.
const DISPATCH_WORKERS: usize = 8;

static DISPATCHER: OnceCell<crossbeam::channel::Sender<Job>> = OnceCell::new();

fn dispatcher() -> Result<&'static crossbeam::channel::Sender<Job>> {
  DISPATCHER
    .get_or_try_init(|| {
      let (sender, receiver) = crossbeam::channel::unbounded::<Job>();

      for i in 0..DISPATCH_WORKERS {
        let receiver = receiver.clone();
        std::thread::Builder::new()
          .name(format!("mount-utils:dispatch-{}", i))
          .spawn(move || {
            for job in receiver.iter() {
              if let Err(e) = catch_unwind(AssertUnwindSafe(job)) {
                error!("Mount operation panicked in dispatcher: {:?}", e);
              }
            }
          })?;
      }

      Ok::<_, std::io::Error>(sender)
    })
    .map_err(|e| MountError::new(format!("failed to spawn dispatcher: {:?}", e)))
}

/// Runs `f` on a dispatcher thread inside the caller's span.
pub(crate) fn run<R, F>(f: F) -> impl Future<Output = Result<R>>
where
  F: FnOnce() -> Result<R> + Send + UnwindSafe + 'static,
  R: Send + 'static,
{
  let span = Span::current();
  let (sender, receiver) = oneshot::channel();

  let job: Job = Box::new(move || {
    let result = {
      let _enter = span.enter();
      f()
    };

    let _ = sender.send(result);
  });

  let queued = dispatcher().and_then(|dispatch| {
    dispatch
      .send(job)
      .map_err(|_| MountError::new("mount dispatcher has shut down"))
  });

  async move {
    queued?;
    match receiver.await {
      Ok(result) => result,
      Err(_) => Err(MountError::new("mount operation was cancelled (dispatcher panicked?)")),
    }
  }
}

pub(crate) fn run_inst<T, R, F>(mounter: Arc<T>, f: F) -> impl Future<Output = Result<R>>
where
  T: MounterImpl,
  F: FnOnce(&T) -> Result<R> + Send + UnwindSafe + 'static,
  R: Send + 'static,
{
  run(move || f(&*mounter))
}

/// Splits mount options for a bind mount. The kernel ignores options on the
/// initial bind, so they are applied by a second `bind,remount` pass.
///
/// Returns whether `bind` was requested, the options of the bind itself and
/// the options of the remount.
pub(crate) fn make_bind_opts(opts: &[String]) -> (bool, Vec<String>, Vec<String>) {
  let mut bind = false;
  let mut bind_opts = vec!["bind".to_owned()];
  let mut remount_opts = vec!["bind".to_owned(), "remount".to_owned()];

  for opt in opts {
    match opt.as_str() {
      "bind" => bind = true,
      // userspace only option, not carried over by the kernel
      "_netdev" => {
        bind_opts.push(opt.clone());
        remount_opts.push(opt.clone());
      }
      _ => remount_opts.push(opt.clone()),
    }
  }

  (bind, bind_opts, remount_opts)
}
