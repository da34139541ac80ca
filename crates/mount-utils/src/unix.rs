use crate::{
  format,
  runner::{make_bind_opts, MounterImpl},
  stats, FsStats, MountError, MountPoint, Result,
};
use duct::cmd;
use smallvec::SmallVec;
use std::{
  fs, io,
  os::unix::fs::MetadataExt,
  path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};
use which::which;

const PROC_MOUNTS_PATH: &str = "/proc/mounts";
const PROC_MOUNT_INFO_PATH: &str = "/proc/self/mountinfo";
const MAX_LIST_TRIES: usize = 3;
const FIELDS_PER_MOUNTS_LINE: usize = 6;
const MIN_FIELDS_PER_MOUNT_INFO: usize = 10;

pub struct OsMounter {
  systemd: bool,
}

impl OsMounter {
  pub(crate) fn new() -> Result<Self> {
    Ok(OsMounter {
      systemd: detect_systemd()?,
    })
  }

  fn do_mount(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()> {
    let (args, log_str) = make_mount_args(source, target, fs_type, options, sensitive_options);

    // Run under a transient systemd scope when available, so fuse helpers
    // forked by mount(8) outlive a restart of this process.
    let (program, args, log_str) = if self.systemd {
      let mut scoped = vec![
        format!("--description=pd-csi transient mount for {}", target.display()),
        "--scope".to_owned(),
        "--".to_owned(),
        "mount".to_owned(),
      ];
      let log_str = format!("{} {}", scoped.join(" "), log_str);
      scoped.extend(args);
      ("systemd-run", scoped, log_str)
    } else {
      ("mount", args, log_str)
    };

    info!("Mounting cmd {} with arguments ({})", program, log_str);
    format::run_command(cmd(program, args)).map(drop).map_err(|e| {
      error!("Mount failed: {}", e);
      e.into()
    })
  }
}

impl MounterImpl for OsMounter {
  fn mount_sensitive(
    &self,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &[String],
    sensitive_options: &[String],
  ) -> Result<()> {
    let (bind, bind_opts, remount_opts) = make_bind_opts(options);
    if bind {
      self.do_mount(source, target, fs_type, &bind_opts, sensitive_options)?;
      self.do_mount(source, target, fs_type, &remount_opts, sensitive_options)
    } else {
      self.do_mount(source, target, fs_type, options, sensitive_options)
    }
  }

  fn unmount(&self, target: &Path) -> Result<()> {
    info!("Unmounting {}", target.display());
    format::run_command(cmd!("umount", target))?;
    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    let content = consistent_read(Path::new(PROC_MOUNTS_PATH), MAX_LIST_TRIES)?;
    parse_proc_mounts(&content)
  }

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    let stat = fs::metadata(file)?;
    let parent = file
      .parent()
      .ok_or_else(|| MountError::new(format!("{} has no parent", file.display())))?;
    let parent_stat = fs::metadata(parent)?;

    Ok(stat.dev() == parent_stat.dev())
  }

  fn get_mount_refs(&self, path: &Path) -> Result<Vec<PathBuf>> {
    if let Err(e) = path.metadata() {
      return match e.raw_os_error() {
        Some(libc::ENOENT) => Ok(Vec::new()),
        Some(libc::ENOTCONN) | Some(libc::ESTALE) | Some(libc::EIO) | Some(libc::EACCES) => {
          warn!(
            "get_mount_refs found corrupted mount at {}, treating as unmounted path",
            path.display()
          );
          Ok(Vec::new())
        }
        _ => Err(e.into()),
      };
    }

    let resolved = path.canonicalize()?;
    let content = consistent_read(Path::new(PROC_MOUNT_INFO_PATH), MAX_LIST_TRIES)?;
    search_mount_points(&resolved, &parse_mount_info(&content)?)
  }

  fn get_disk_format(&self, device: &Path) -> Result<Option<String>> {
    format::disk_format(device)
      .map_err(|e| MountError::GetDiskFormatFailed(device.to_owned(), e))
  }

  fn format(&self, device: &Path, fs_type: &str) -> Result<()> {
    format::mkfs(device, fs_type).map_err(|e| MountError::FormatFailed(device.to_owned(), e))
  }

  fn device_size(&self, device: &Path) -> Result<u64> {
    Ok(format::block_device_size(device)?)
  }

  fn filesystem_size(&self, device: &Path, mount_path: &Path, fs_type: &str) -> Result<u64> {
    Ok(format::filesystem_size(device, mount_path, fs_type)?)
  }

  fn resize(&self, device: &Path, mount_path: &Path) -> Result<()> {
    let fs_type = self
      .get_disk_format(device)?
      .ok_or_else(|| MountError::new(format!("{} has no filesystem to resize", device.display())))?;

    format::grow_filesystem(device, mount_path, &fs_type)
      .map_err(|e| MountError::ResizeFailed(device.to_owned(), e))
  }

  fn stat_fs(&self, path: &Path) -> Result<FsStats> {
    Ok(stats::statvfs(path)?)
  }
}

/// Whether the host runs systemd as init. A `systemd-run` binary alone is not
/// enough: containers often ship one without systemd being pid 1.
fn detect_systemd() -> Result<bool> {
  let systemd_run = match which("systemd-run") {
    Ok(p) => p,
    Err(_) => {
      info!("Detected OS without systemd");
      return Ok(false);
    }
  };

  let result = cmd!(systemd_run, "--description=pd-csi systemd probe", "--scope", "true")
    .stderr_to_stdout()
    .stdout_capture()
    .unchecked()
    .run()?;

  if result.status.success() {
    info!("Detected OS with systemd");
    Ok(true)
  } else {
    info!("Cannot run systemd-run, assuming non-systemd OS");
    debug!(
      "systemd-run output: {}, failed with: {:?}",
      String::from_utf8_lossy(&result.stdout),
      result.status
    );
    Ok(false)
  }
}

/// Arguments to mount(8) and their loggable rendering, which leaves out
/// `sensitive_options`.
fn make_mount_args(
  source: &Path,
  target: &Path,
  fs_type: &str,
  options: &[String],
  sensitive_options: &[String],
) -> (Vec<String>, String) {
  let mut args = Vec::new();
  let mut log = Vec::new();

  if !fs_type.is_empty() {
    args.extend(["-t".to_owned(), fs_type.to_owned()]);
    log.extend(["-t".to_owned(), fs_type.to_owned()]);
  }

  if !options.is_empty() || !sensitive_options.is_empty() {
    let all = options.iter().chain(sensitive_options).cloned().collect::<Vec<_>>();
    args.extend(["-o".to_owned(), all.join(",")]);
    log.extend(["-o".to_owned(), options.join(",")]);
  }

  for path in &[source, target] {
    let path = path.to_string_lossy().into_owned();
    args.push(path.clone());
    log.push(path);
  }

  (args, log.join(" "))
}

/// Reads a file until two consecutive reads agree. Files in /proc larger
/// than a page may change between read calls.
fn consistent_read(path: &Path, attempts: usize) -> io::Result<String> {
  let mut previous = fs::read_to_string(path)?;

  for _ in 0..attempts {
    let current = fs::read_to_string(path)?;
    if current == previous {
      return Ok(current);
    }

    previous = current;
  }

  Err(io::Error::new(
    io::ErrorKind::Other,
    format!(
      "could not get consistent content of '{}' after {} attempts",
      path.display(),
      attempts
    ),
  ))
}

fn parse_proc_mounts(content: &str) -> Result<Vec<MountPoint>> {
  content
    .lines()
    .filter(|line| !line.trim().is_empty())
    .map(|line| {
      let fields = line
        .split_whitespace()
        .collect::<SmallVec<[&str; FIELDS_PER_MOUNTS_LINE]>>();
      if fields.len() != FIELDS_PER_MOUNTS_LINE {
        return Err(MountError::new(format!(
          "wrong number of fields (expected {}, got {}): {}",
          FIELDS_PER_MOUNTS_LINE,
          fields.len(),
          line
        )));
      }

      for (name, value) in &[("freq", fields[4]), ("pass", fields[5])] {
        value
          .parse::<u32>()
          .map_err(|e| MountError::new(format!("invalid {} {:?}: {}", name, value, e)))?;
      }

      Ok(MountPoint::new(
        fields[0],
        fields[1],
        fields[2],
        fields[3].split(',').map(ToOwned::to_owned).collect(),
      ))
    })
    .collect()
}

/// The fields of a `/proc/self/mountinfo` line needed to find bind mounts.
#[derive(Debug)]
struct MountInfo {
  id: u32,
  major: u32,
  minor: u32,
  /// Path inside the filesystem that forms the root of this mount.
  root: PathBuf,
  mount_point: PathBuf,
}

fn parse_mount_info(content: &str) -> io::Result<Vec<MountInfo>> {
  let invalid = |what: &str, line: &str| {
    io::Error::new(
      io::ErrorKind::InvalidData,
      format!("failed to parse {} in mountinfo line: {}", what, line),
    )
  };

  content
    .lines()
    .filter(|line| !line.trim().is_empty())
    .map(|line| {
      let fields = line.split_whitespace().collect::<SmallVec<[&str; 20]>>();
      if fields.len() < MIN_FIELDS_PER_MOUNT_INFO {
        return Err(invalid("field count", line));
      }

      let id = fields[0].parse().map_err(|_| invalid("id", line))?;
      let mut major_minor = fields[2].splitn(2, ':');
      let major = major_minor
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| invalid("major", line))?;
      let minor = major_minor
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| invalid("minor", line))?;

      // optional fields run up to a lone "-", followed by fs type, source and super options
      if !fields[6..].contains(&"-") {
        return Err(invalid("optional field separator", line));
      }

      Ok(MountInfo {
        id,
        major,
        minor,
        root: PathBuf::from(fields[3]),
        mount_point: PathBuf::from(fields[4]),
      })
    })
    .collect()
}

/// All other mount points showing the same directory of the same filesystem
/// as `source`.
fn search_mount_points(source: &Path, infos: &[MountInfo]) -> Result<Vec<PathBuf>> {
  // Later mounts may shadow earlier ones, so search from the back.
  let (owner, root) = infos
    .iter()
    .rev()
    .find_map(|mi| {
      source
        .strip_prefix(&mi.mount_point)
        .ok()
        .map(|rest| (mi, mi.root.join(rest)))
    })
    .ok_or_else(|| {
      MountError::new(format!(
        "failed to get root path and major:minor for '{}'",
        source.display()
      ))
    })?;

  Ok(
    infos
      .iter()
      .filter(|mi| mi.id != owner.id && mi.major == owner.major && mi.minor == owner.minor)
      .filter(|mi| mi.root == root)
      .map(|mi| mi.mount_point.clone())
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;
  use test_case::test_case;

  #[test]
  fn read_proc_mounts() {
    let content = "
/dev/0 /path/to/0 type0 flags 0 0
/dev/1    /path/to/1   type1	flags 1 1
/dev/2 /path/to/2 type2 flags,1,2=3 2 2
";

    let mounts = parse_proc_mounts(content).expect("parse succeeded");
    assert_eq!(mounts.len(), 3);
    assert_eq!(mounts[0], MountPoint::new("/dev/0", "/path/to/0", "type0", vec!["flags".into()]));
    assert_eq!(mounts[1].path(), Path::new("/path/to/1"));
    assert_eq!(mounts[2].opts(), &["flags", "1", "2=3"]);
  }

  #[test_case("/dev/0 /path/to/mount\n" ; "too few fields")]
  #[test_case("/dev/1 /path/to/mount type flags a 0\n" ; "bad freq")]
  #[test_case("/dev/2 /path/to/mount type flags 0 b\n" ; "bad pass")]
  fn reject_bad_proc_mounts(content: &str) {
    assert!(parse_proc_mounts(content).is_err());
  }

  const BASE: &str = "
20 25 0:4 / /proc rw,nosuid,nodev,noexec,relatime shared:12 - proc proc rw
21 25 0:6 / /dev rw,nosuid,relatime shared:2 - devtmpfs udev rw,size=4058156k,mode=755
25 0 252:0 / / rw,relatime shared:1 - ext4 /dev/mapper/vg-root rw,errors=remount-ro
58 25 8:16 / /var/lib/kubelet/plugins/pd/globalmount rw,relatime shared:38 - ext4 /dev/sdb rw
";

  fn refs(source: &str, extra: &str) -> HashSet<PathBuf> {
    let infos = parse_mount_info(&format!("{}{}", BASE, extra)).expect("mountinfo parses");
    search_mount_points(Path::new(source), &infos)
      .expect("search succeeds")
      .into_iter()
      .collect()
  }

  #[test]
  fn staged_disk_without_publications() {
    assert!(refs("/var/lib/kubelet/plugins/pd/globalmount", "").is_empty());
  }

  #[test]
  fn staged_disk_published_twice() {
    let extra = "62 25 8:16 / /var/lib/kubelet/pods/a/volumes/pd rw,relatime shared:38 - ext4 /dev/sdb rw
95 25 8:16 / /var/lib/kubelet/pods/b/volumes/pd rw,relatime shared:38 - ext4 /dev/sdb rw
";

    let expected = ["/var/lib/kubelet/pods/a/volumes/pd", "/var/lib/kubelet/pods/b/volumes/pd"]
      .iter()
      .map(PathBuf::from)
      .collect::<HashSet<_>>();
    assert_eq!(refs("/var/lib/kubelet/plugins/pd/globalmount", extra), expected);
  }

  #[test]
  fn directory_bind_mounted_into_pod() {
    let extra = "56 25 252:0 /mnt/disks/vol1 /var/lib/kubelet/pods/c/volumes/local rw,relatime shared:1 - ext4 /dev/mapper/vg-root rw
";

    let expected = ["/var/lib/kubelet/pods/c/volumes/local"]
      .iter()
      .map(PathBuf::from)
      .collect::<HashSet<_>>();
    assert_eq!(refs("/mnt/disks/vol1", extra), expected);
  }

  #[test]
  fn mountinfo_without_separator_is_rejected() {
    let line = "25 0 252:0 / / rw,relatime shared:1 ext4 /dev/mapper/vg-root rw,errors=remount-ro x\n";
    assert!(parse_mount_info(line).is_err());
  }

  #[test_case(&["o1", "o2"], &["s1", "s2"] ; "options and sensitive")]
  #[test_case(&[], &["s1", "s2"] ; "sensitive only")]
  #[test_case(&["o1", "o2"], &[] ; "options only")]
  fn sensitive_options_are_not_logged(options: &[&str], sensitive: &[&str]) {
    let options = options.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let sensitive = sensitive.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let (args, log) = make_mount_args(
      Path::new("/dev/sdb"),
      Path::new("/mnt/target"),
      "ext4",
      &options,
      &sensitive,
    );

    let option_arg = args
      .iter()
      .skip_while(|a| *a != "-o")
      .nth(1)
      .expect("-o is present");

    for option in &options {
      assert!(option_arg.contains(option.as_str()));
      assert!(log.contains(option.as_str()));
    }

    for option in &sensitive {
      assert!(option_arg.contains(option.as_str()));
      assert!(!log.contains(option.as_str()));
    }

    assert_eq!(args.last().map(String::as_str), Some("/mnt/target"));
  }
}
