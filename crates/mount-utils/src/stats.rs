use std::{io, path::Path};

/// Capacity and inode usage of a mounted filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
  pub total_bytes: u64,
  pub available_bytes: u64,
  pub used_bytes: u64,
  pub total_inodes: u64,
  pub free_inodes: u64,
  pub used_inodes: u64,
}

pub(crate) fn statvfs(path: &Path) -> io::Result<FsStats> {
  let st = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
  let frsize = st.fragment_size() as u64;
  let (blocks, free, available) = (st.blocks() as u64, st.blocks_free() as u64, st.blocks_available() as u64);
  let (files, files_free) = (st.files() as u64, st.files_free() as u64);

  Ok(FsStats {
    total_bytes: blocks * frsize,
    available_bytes: available * frsize,
    used_bytes: blocks.saturating_sub(free) * frsize,
    total_inodes: files,
    free_inodes: files_free,
    used_inodes: files.saturating_sub(files_free),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stats_of_temp_dir() {
    let dir = tempfile::tempdir().unwrap();
    let stats = statvfs(dir.path()).unwrap();

    assert!(stats.total_bytes > 0);
    assert!(stats.available_bytes <= stats.total_bytes);
    assert!(stats.used_bytes <= stats.total_bytes);
    assert_eq!(stats.used_inodes + stats.free_inodes, stats.total_inodes);
  }

  #[test]
  fn missing_path_is_not_found() {
    let err = statvfs(Path::new("/definitely/not/a/real/path")).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
  }
}
