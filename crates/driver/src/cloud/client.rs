use super::{
  CloudError, CloudProvider, CloudSnapshot, Disk, DiskMode, DiskSpec, Instance, Operation,
  OperationStatus, Page, Quota, Result,
};
use crate::ids::{NodeId, SnapshotId, VolumeId};
use backoff::{future::retry_notify, Error as BackoffError, ExponentialBackoff};
use std::{
  future::Future,
  sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
  },
  time::Duration,
};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Retries of a transient failure before it is surfaced.
  pub max_retries: u32,
  pub initial_interval: Duration,
  pub max_interval: Duration,
  /// First delay between operation polls. Doubles up to `max_poll_interval`.
  pub poll_interval: Duration,
  pub max_poll_interval: Duration,
  /// Hard bound on waiting for one operation.
  pub operation_timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy {
      max_retries: 5,
      initial_interval: Duration::from_millis(250),
      max_interval: Duration::from_secs(16),
      poll_interval: Duration::from_secs(1),
      max_poll_interval: Duration::from_secs(10),
      operation_timeout: Duration::from_secs(300),
    }
  }
}

impl RetryPolicy {
  fn backoff(&self) -> ExponentialBackoff {
    ExponentialBackoff {
      current_interval: self.initial_interval,
      initial_interval: self.initial_interval,
      multiplier: 2.0,
      max_interval: self.max_interval,
      // attempts are bounded by max_retries instead
      max_elapsed_time: None,
      ..ExponentialBackoff::default()
    }
  }
}

/// A [CloudProvider] with retries, where every mutating call waits for its
/// operation to finish.
#[derive(Clone)]
pub struct CloudClient {
  provider: Arc<dyn CloudProvider>,
  policy: RetryPolicy,
}

impl CloudClient {
  pub fn new(provider: Arc<dyn CloudProvider>, policy: RetryPolicy) -> Self {
    CloudClient { provider, policy }
  }

  #[inline]
  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Runs `call` until it succeeds, fails permanently, or runs out of retries.
  async fn retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let max_retries = self.policy.max_retries;
    let attempts = AtomicU32::new(0);

    let attempt = || {
      let retries = attempts.fetch_add(1, Ordering::Relaxed);
      let fut = call();
      async move {
        fut.await.map_err(|err| {
          if err.is_transient() && retries < max_retries {
            BackoffError::transient(err)
          } else {
            BackoffError::permanent(err)
          }
        })
      }
    };

    let log_retry = |err: CloudError, delay: Duration| {
      warn!(what, ?delay, error = %err, "transient cloud error, retrying");
    };

    retry_notify(self.policy.backoff(), attempt, log_retry).await
  }

  /// Polls `operation` until it is done, with the poll interval growing
  /// exponentially. Gives up with `DeadlineExceeded` after the operation
  /// timeout.
  pub async fn wait(&self, operation: Operation) -> Result<()> {
    let name = operation.name.clone();
    let poll = async {
      let mut operation = operation;
      let mut interval = self.policy.poll_interval;

      loop {
        if let OperationStatus::Done(result) = &operation.status {
          return match result {
            None => Ok(()),
            Some(err) => Err(err.clone()),
          };
        }

        trace!(operation = %operation.name, ?interval, "operation not done yet");
        tokio::time::sleep(interval).await;
        interval = (interval * 2).min(self.policy.max_poll_interval);

        let current = operation;
        operation = self
          .retry("get operation", || self.provider.get_operation(&current))
          .await?;
      }
    };

    tokio::time::timeout(self.policy.operation_timeout, poll)
      .await
      .map_err(|_| {
        CloudError::DeadlineExceeded(format!(
          "Timed out after {:?} waiting for operation {}",
          self.policy.operation_timeout, name
        ))
      })?
  }

  async fn submit_and_wait<F, Fut>(&self, what: &str, submit: F) -> Result<()>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Operation>>,
  {
    let operation = self.retry(what, submit).await?;
    debug!(what, operation = %operation.name, "submitted operation");
    self.wait(operation).await
  }

  pub async fn get_disk(&self, id: &VolumeId) -> Result<Disk> {
    debug!(disk = %id, "get disk");
    self.retry("get disk", || self.provider.get_disk(id)).await
  }

  pub async fn list_disks(
    &self,
    project: &str,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<Disk>> {
    debug!(project, ?max_results, "list disks");
    self
      .retry("list disks", || {
        self.provider.list_disks(project, max_results, page_token)
      })
      .await
  }

  /// Creates the disk and returns it as the provider reports it afterwards.
  pub async fn insert_disk(&self, spec: &DiskSpec) -> Result<Disk> {
    debug!(disk = %spec.id, size_gb = spec.size_gb, disk_type = %spec.disk_type, "insert disk");
    self
      .submit_and_wait("insert disk", || self.provider.insert_disk(spec))
      .await?;
    info!(disk = %spec.id, "created disk");
    self.get_disk(&spec.id).await
  }

  pub async fn delete_disk(&self, id: &VolumeId) -> Result<()> {
    debug!(disk = %id, "delete disk");
    self
      .submit_and_wait("delete disk", || self.provider.delete_disk(id))
      .await?;
    info!(disk = %id, "deleted disk");
    Ok(())
  }

  pub async fn resize_disk(&self, id: &VolumeId, size_gb: u64) -> Result<()> {
    debug!(disk = %id, size_gb, "resize disk");
    self
      .submit_and_wait("resize disk", || self.provider.resize_disk(id, size_gb))
      .await?;
    info!(disk = %id, size_gb, "resized disk");
    Ok(())
  }

  pub async fn get_instance(&self, id: &NodeId) -> Result<Instance> {
    debug!(instance = %id, "get instance");
    self.retry("get instance", || self.provider.get_instance(id)).await
  }

  pub async fn attach_disk(
    &self,
    node: &NodeId,
    disk: &VolumeId,
    device_name: &str,
    mode: DiskMode,
  ) -> Result<()> {
    debug!(instance = %node, disk = %disk, %mode, "attach disk");
    self
      .submit_and_wait("attach disk", || {
        self.provider.attach_disk(node, disk, device_name, mode)
      })
      .await?;
    info!(instance = %node, disk = %disk, %mode, "attached disk");
    Ok(())
  }

  pub async fn detach_disk(&self, node: &NodeId, device_name: &str) -> Result<()> {
    debug!(instance = %node, device_name, "detach disk");
    self
      .submit_and_wait("detach disk", || self.provider.detach_disk(node, device_name))
      .await?;
    info!(instance = %node, device_name, "detached disk");
    Ok(())
  }

  pub async fn get_snapshot(&self, id: &SnapshotId) -> Result<CloudSnapshot> {
    debug!(snapshot = %id, "get snapshot");
    self.retry("get snapshot", || self.provider.get_snapshot(id)).await
  }

  pub async fn list_snapshots(
    &self,
    project: &str,
    source_disk: Option<&VolumeId>,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<CloudSnapshot>> {
    debug!(project, ?source_disk, ?max_results, "list snapshots");
    self
      .retry("list snapshots", || {
        self
          .provider
          .list_snapshots(project, source_disk, max_results, page_token)
      })
      .await
  }

  pub async fn create_snapshot(&self, id: &SnapshotId, source: &VolumeId) -> Result<CloudSnapshot> {
    debug!(snapshot = %id, source = %source, "create snapshot");
    self
      .submit_and_wait("create snapshot", || self.provider.create_snapshot(id, source))
      .await?;
    info!(snapshot = %id, source = %source, "created snapshot");
    self.get_snapshot(id).await
  }

  pub async fn delete_snapshot(&self, id: &SnapshotId) -> Result<()> {
    debug!(snapshot = %id, "delete snapshot");
    self
      .submit_and_wait("delete snapshot", || self.provider.delete_snapshot(id))
      .await?;
    info!(snapshot = %id, "deleted snapshot");
    Ok(())
  }

  pub async fn region_quotas(&self, project: &str, region: &str) -> Result<Vec<Quota>> {
    debug!(project, region, "get region quotas");
    self
      .retry("get region", || self.provider.region_quotas(project, region))
      .await
  }
}
