//! Access to the Compute Engine disk API.
//!
//! [CloudProvider] is the raw capability set, one call per API verb, returning
//! long-running operations as they were submitted. [CloudClient] wraps a
//! provider with retries and turns every mutating call into a synchronous
//! submit-then-poll.

mod client;
pub mod fake;
mod gce;

pub use client::{CloudClient, RetryPolicy};
pub use gce::GceProvider;

use crate::ids::{NodeId, SnapshotId, VolumeId};
use async_trait::async_trait;
use pd_csi_proto::Error;
use std::{collections::BTreeMap, fmt, time::SystemTime};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CloudError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloudError {
  #[error("{0}")]
  NotFound(String),

  #[error("{0}")]
  AlreadyExists(String),

  /// Rate limit or quota. Retried before it is surfaced.
  #[error("{0}")]
  RateLimited(String),

  #[error("{0}")]
  FailedPrecondition(String),

  #[error("{0}")]
  InvalidArgument(String),

  /// Server side or network failure. Retried before it is surfaced.
  #[error("{0}")]
  Transient(String),

  #[error("{0}")]
  Internal(String),

  #[error("{0}")]
  DeadlineExceeded(String),
}

impl CloudError {
  #[inline]
  pub fn is_transient(&self) -> bool {
    matches!(self, CloudError::RateLimited(_) | CloudError::Transient(_))
  }

  #[inline]
  pub fn is_not_found(&self) -> bool {
    matches!(self, CloudError::NotFound(_))
  }
}

impl From<CloudError> for Error {
  fn from(value: CloudError) -> Self {
    match value {
      CloudError::NotFound(msg) => Error::NotFound(msg),
      CloudError::AlreadyExists(msg) => Error::AlreadyExists(msg),
      CloudError::RateLimited(msg) => Error::ResourceExhausted(msg),
      CloudError::FailedPrecondition(msg) => Error::FailedPrecondition(msg),
      CloudError::InvalidArgument(msg) => Error::InvalidArgument(msg),
      CloudError::Transient(msg) | CloudError::Internal(msg) => Error::Internal(msg),
      CloudError::DeadlineExceeded(msg) => Error::DeadlineExceeded(msg),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskMode {
  ReadWrite,
  ReadOnly,
}

impl DiskMode {
  pub fn as_str(self) -> &'static str {
    match self {
      DiskMode::ReadWrite => "READ_WRITE",
      DiskMode::ReadOnly => "READ_ONLY",
    }
  }
}

impl fmt::Display for DiskMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskSource {
  Snapshot(SnapshotId),
  Disk(VolumeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
  pub id: VolumeId,
  pub size_gb: u64,
  /// Short type name, e.g. `pd-ssd`.
  pub disk_type: String,
  pub replica_zones: Vec<String>,
  pub source: Option<DiskSource>,
  pub kms_key: Option<String>,
  pub labels: BTreeMap<String, String>,
  /// Instances the disk is attached to.
  pub users: Vec<NodeId>,
}

/// What to create. The disk name and location come from `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
  pub id: VolumeId,
  pub size_gb: u64,
  pub disk_type: String,
  pub replica_zones: Vec<String>,
  pub source: Option<DiskSource>,
  pub kms_key: Option<String>,
  pub labels: BTreeMap<String, String>,
  pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDisk {
  pub device_name: String,
  pub source: VolumeId,
  pub mode: DiskMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
  pub id: NodeId,
  pub machine_type: String,
  pub disks: Vec<AttachedDisk>,
}

impl Instance {
  pub fn attachment(&self, disk: &VolumeId) -> Option<&AttachedDisk> {
    self.disks.iter().find(|d| &d.source == disk)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
  Creating,
  Uploading,
  Ready,
  Failed,
  Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSnapshot {
  pub id: SnapshotId,
  pub source_disk: VolumeId,
  pub disk_size_gb: u64,
  pub created_at: Option<SystemTime>,
  pub status: SnapshotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quota {
  pub metric: String,
  pub limit: f64,
  pub usage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationScope {
  Zone(String),
  Region(String),
  Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
  Pending,
  Running,
  /// Terminal, with the error the operation failed with, if any.
  Done(Option<CloudError>),
}

/// Handle to a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
  pub project: String,
  pub name: String,
  pub scope: OperationScope,
  pub status: OperationStatus,
}

impl Operation {
  #[inline]
  pub fn is_done(&self) -> bool {
    matches!(self.status, OperationStatus::Done(_))
  }
}

/// The disk API, one call per verb.
///
/// Mutating calls return the submitted operation without waiting for it.
#[async_trait]
pub trait CloudProvider: Send + Sync + 'static {
  async fn get_disk(&self, id: &VolumeId) -> Result<Disk>;

  /// Disks in every zone and region of `project`.
  async fn list_disks(
    &self,
    project: &str,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<Disk>>;

  async fn insert_disk(&self, spec: &DiskSpec) -> Result<Operation>;

  async fn delete_disk(&self, id: &VolumeId) -> Result<Operation>;

  async fn resize_disk(&self, id: &VolumeId, size_gb: u64) -> Result<Operation>;

  async fn get_instance(&self, id: &NodeId) -> Result<Instance>;

  async fn attach_disk(
    &self,
    node: &NodeId,
    disk: &VolumeId,
    device_name: &str,
    mode: DiskMode,
  ) -> Result<Operation>;

  async fn detach_disk(&self, node: &NodeId, device_name: &str) -> Result<Operation>;

  async fn get_snapshot(&self, id: &SnapshotId) -> Result<CloudSnapshot>;

  async fn list_snapshots(
    &self,
    project: &str,
    source_disk: Option<&VolumeId>,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<CloudSnapshot>>;

  async fn create_snapshot(&self, id: &SnapshotId, source: &VolumeId) -> Result<Operation>;

  async fn delete_snapshot(&self, id: &SnapshotId) -> Result<Operation>;

  /// Current state of a previously submitted operation.
  async fn get_operation(&self, operation: &Operation) -> Result<Operation>;

  async fn region_quotas(&self, project: &str, region: &str) -> Result<Vec<Quota>>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case(CloudError::RateLimited("x".into()) => true)]
  #[test_case(CloudError::Transient("x".into()) => true)]
  #[test_case(CloudError::NotFound("x".into()) => false)]
  #[test_case(CloudError::Internal("x".into()) => false)]
  #[test_case(CloudError::DeadlineExceeded("x".into()) => false)]
  fn transient_classes(err: CloudError) -> bool {
    err.is_transient()
  }

  #[test_case(CloudError::RateLimited("x".into()) => Error::ResourceExhausted("x".into()))]
  #[test_case(CloudError::Transient("x".into()) => Error::Internal("x".into()))]
  #[test_case(CloudError::AlreadyExists("x".into()) => Error::AlreadyExists("x".into()))]
  #[test_case(CloudError::DeadlineExceeded("x".into()) => Error::DeadlineExceeded("x".into()))]
  fn maps_to_status(err: CloudError) -> Error {
    err.into()
  }
}
