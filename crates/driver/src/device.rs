use pd_csi_proto::Error;
use std::{
  path::{Path, PathBuf},
  time::Duration,
};
use tokio::fs;
use tracing::{debug, warn};

pub const DISK_BY_ID_DIR: &str = "/dev/disk/by-id";

const DEFAULT_ATTEMPTS: u32 = 5;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Finds the local block device for an attached disk.
///
/// udev creates the by-id links some time after the attach operation
/// completes, so lookups are retried a bounded number of times.
#[derive(Debug, Clone)]
pub struct DeviceResolver {
  by_id_dir: PathBuf,
  attempts: u32,
  interval: Duration,
}

impl Default for DeviceResolver {
  fn default() -> Self {
    DeviceResolver::new(DISK_BY_ID_DIR)
  }
}

impl DeviceResolver {
  pub fn new(by_id_dir: impl Into<PathBuf>) -> Self {
    DeviceResolver {
      by_id_dir: by_id_dir.into(),
      attempts: DEFAULT_ATTEMPTS,
      interval: DEFAULT_INTERVAL,
    }
  }

  pub fn with_retry(mut self, attempts: u32, interval: Duration) -> Self {
    self.attempts = attempts.max(1);
    self.interval = interval;
    self
  }

  #[inline]
  pub fn by_id_dir(&self) -> &Path {
    &self.by_id_dir
  }

  /// Paths a disk attached with `device_name` may show up under.
  pub fn candidates(&self, device_name: &str) -> [PathBuf; 2] {
    [
      self.by_id_dir.join(format!("google-{}", device_name)),
      self
        .by_id_dir
        .join(format!("scsi-0Google_PersistentDisk_{}", device_name)),
    ]
  }

  pub async fn resolve(&self, device_name: &str) -> Result<PathBuf, Error> {
    let candidates = self.candidates(device_name);

    for attempt in 1..=self.attempts {
      for candidate in &candidates {
        if fs::metadata(candidate).await.is_ok() {
          debug!(device = %candidate.display(), attempt, "found device");
          return Ok(candidate.clone());
        }
      }

      if attempt < self.attempts {
        warn!(device_name, attempt, "device not visible yet, retrying");
        tokio::time::sleep(self.interval).await;
      }
    }

    Err(Error::internal(format!(
      "Unable to find device path out of attempted paths: {:?}",
      candidates
    )))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test]
  async fn finds_either_link() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("scsi-0Google_PersistentDisk_disk-1"), b"").unwrap();

    let resolver = DeviceResolver::new(dir.path()).with_retry(1, Duration::from_millis(1));
    let device = resolver.resolve("disk-1").await.unwrap();

    assert_eq!(device, dir.path().join("scsi-0Google_PersistentDisk_disk-1"));
  }

  #[tokio::test]
  async fn gives_up_after_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = DeviceResolver::new(dir.path()).with_retry(2, Duration::from_millis(1));

    let err = resolver.resolve("missing").await.unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
  }

  #[tokio::test]
  async fn waits_for_late_device() {
    let dir = Arc::new(tempfile::tempdir().unwrap());
    let resolver = DeviceResolver::new(dir.path()).with_retry(50, Duration::from_millis(10));

    let link = dir.path().join("google-late");
    let writer = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(30)).await;
      std::fs::write(link, b"").unwrap();
    });

    let device = resolver.resolve("late").await.unwrap();
    writer.await.unwrap();
    assert_eq!(device, dir.path().join("google-late"));
  }
}
