use duct::{cmd, Expression};
use std::{io, path::Path, process::ExitStatus};
use tracing::{debug, info};

/// blkid exit code for "no recognizable type".
const BLKID_NOT_FOUND: i32 = 2;

/// Reported for a device with a partition table but no filesystem.
pub(crate) const PARTITIONED: &str = "unknown data, probably partitions";

fn run_capture(expr: Expression) -> io::Result<(ExitStatus, String)> {
  let output = expr.stderr_to_stdout().stdout_capture().unchecked().run()?;
  Ok((output.status, String::from_utf8_lossy(&output.stdout).into_owned()))
}

/// Runs `expr`, folding its output into the error when it fails.
pub(crate) fn run_command(expr: Expression) -> io::Result<String> {
  let (status, output) = run_capture(expr)?;
  if status.success() {
    Ok(output)
  } else {
    Err(io::Error::new(
      io::ErrorKind::Other,
      format!("command failed with {}: {}", status, output.trim()),
    ))
  }
}

fn is_ext(fs_type: &str) -> bool {
  matches!(fs_type, "ext2" | "ext3" | "ext4")
}

fn unsupported(fs_type: &str) -> io::Error {
  io::Error::new(
    io::ErrorKind::InvalidInput,
    format!("unsupported filesystem type {:?}", fs_type),
  )
}

pub(crate) fn disk_format(device: &Path) -> io::Result<Option<String>> {
  let (status, output) = run_capture(cmd!(
    "blkid", "-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export", device
  ))?;

  match status.code() {
    Some(0) => Ok(parse_blkid(&output)),
    Some(BLKID_NOT_FOUND) => Ok(None),
    _ => Err(io::Error::new(
      io::ErrorKind::Other,
      format!("blkid failed with {}: {}", status, output.trim()),
    )),
  }
}

fn parse_blkid(output: &str) -> Option<String> {
  let mut fs_type = None;
  let mut pt_type = None;

  for line in output.lines() {
    match line.trim().split_once('=') {
      Some(("TYPE", v)) if !v.is_empty() => fs_type = Some(v.to_owned()),
      Some(("PTTYPE", v)) if !v.is_empty() => pt_type = Some(v.to_owned()),
      _ => (),
    }
  }

  match (fs_type, pt_type) {
    (Some(fs), _) => Some(fs),
    (None, Some(_)) => Some(PARTITIONED.to_owned()),
    (None, None) => None,
  }
}

pub(crate) fn mkfs(device: &Path, fs_type: &str) -> io::Result<()> {
  let program = format!("mkfs.{}", fs_type);
  let device = device.as_os_str().to_owned();
  let args = if is_ext(fs_type) {
    vec!["-F".into(), "-m0".into(), device]
  } else {
    vec![device]
  };

  info!("Formatting with {} {:?}", program, args);
  let output = run_command(cmd(program, args))?;
  debug!("mkfs output: {}", output.trim());
  Ok(())
}

pub(crate) fn block_device_size(device: &Path) -> io::Result<u64> {
  let output = run_command(cmd!("blockdev", "--getsize64", device))?;
  output.trim().parse().map_err(|e| {
    io::Error::new(
      io::ErrorKind::InvalidData,
      format!("invalid blockdev output {:?}: {}", output.trim(), e),
    )
  })
}

pub(crate) fn filesystem_size(device: &Path, mount_path: &Path, fs_type: &str) -> io::Result<u64> {
  let parsed = if is_ext(fs_type) {
    parse_dumpe2fs(&run_command(cmd!("dumpe2fs", "-h", device))?)
  } else if fs_type == "xfs" {
    parse_xfs_io(&run_command(cmd!("xfs_io", "-c", "statfs", mount_path))?)
  } else {
    return Err(unsupported(fs_type));
  };

  parsed
    .map(|(block_size, block_count)| block_size * block_count)
    .ok_or_else(|| {
      io::Error::new(
        io::ErrorKind::InvalidData,
        format!("could not read filesystem size of {}", device.display()),
      )
    })
}

fn field<'a>(output: &'a str, key: &str, sep: char) -> Option<&'a str> {
  output.lines().find_map(|line| {
    let (k, v) = line.split_once(sep)?;
    if k.trim() == key {
      Some(v.trim())
    } else {
      None
    }
  })
}

/// Block size and count from `dumpe2fs -h`.
fn parse_dumpe2fs(output: &str) -> Option<(u64, u64)> {
  let size = field(output, "Block size", ':')?.parse().ok()?;
  let count = field(output, "Block count", ':')?.parse().ok()?;
  Some((size, count))
}

/// Block size and data block count from `xfs_io -c statfs`.
fn parse_xfs_io(output: &str) -> Option<(u64, u64)> {
  let size = field(output, "geom.bsize", '=')?.parse().ok()?;
  let count = field(output, "geom.datablocks", '=')?.parse().ok()?;
  Some((size, count))
}

pub(crate) fn grow_filesystem(device: &Path, mount_path: &Path, fs_type: &str) -> io::Result<()> {
  let expr = if is_ext(fs_type) {
    cmd!("resize2fs", device)
  } else if fs_type == "xfs" {
    cmd!("xfs_growfs", "-d", mount_path)
  } else if fs_type == "btrfs" {
    cmd!("btrfs", "filesystem", "resize", "max", mount_path)
  } else {
    return Err(unsupported(fs_type));
  };

  info!("Resizing {} filesystem on {}", fs_type, device.display());
  run_command(expr).map(drop)
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case("DEVNAME=/dev/sdb\nTYPE=ext4\n" => Some("ext4".to_owned()) ; "filesystem")]
  #[test_case("DEVNAME=/dev/sdb\nPTTYPE=gpt\n" => Some(PARTITIONED.to_owned()) ; "partition table only")]
  #[test_case("DEVNAME=/dev/sdb\nTYPE=xfs\nPTTYPE=dos\n" => Some("xfs".to_owned()) ; "filesystem wins")]
  #[test_case("" => None ; "blank")]
  fn blkid(output: &str) -> Option<String> {
    parse_blkid(output)
  }

  #[test]
  fn dumpe2fs_size() {
    let output = "Filesystem volume name:   <none>
Block count:              2621440
Reserved block count:     0
Free blocks:              2554148
Block size:               4096
";
    assert_eq!(parse_dumpe2fs(output), Some((4096, 2621440)));
  }

  #[test]
  fn xfs_io_size() {
    let output = "fd.path = \"/mnt\"
statfs.f_bsize = 4096
geom.bsize = 4096
geom.agcount = 4
geom.datablocks = 2621440
";
    assert_eq!(parse_xfs_io(output), Some((4096, 2621440)));
  }

  #[test]
  fn missing_fields_yield_none() {
    assert_eq!(parse_dumpe2fs("Block size: 4096\n"), None);
  }
}
