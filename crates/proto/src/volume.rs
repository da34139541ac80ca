use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  fmt,
  num::NonZeroU64,
};

use crate::{proto, utils::require_non_empty};

pub type Topology = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeContentSource {
  Snapshot(String),
  Volume(String),
}

impl TryFrom<proto::VolumeContentSource> for Option<VolumeContentSource> {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeContentSource) -> Result<Self, Self::Error> {
    Ok(match value.r#type {
      None => None,
      Some(proto::volume_content_source::Type::Volume(v)) => Some(VolumeContentSource::Volume(
        require_non_empty(v.volume_id, "VolumeContentSource volume_id cannot be empty")?,
      )),
      Some(proto::volume_content_source::Type::Snapshot(v)) => {
        Some(VolumeContentSource::Snapshot(require_non_empty(
          v.snapshot_id,
          "VolumeContentSource snapshot_id cannot be empty",
        )?))
      }
    })
  }
}

impl From<VolumeContentSource> for proto::VolumeContentSource {
  fn from(value: VolumeContentSource) -> Self {
    proto::VolumeContentSource {
      r#type: Some(match value {
        VolumeContentSource::Snapshot(snapshot_id) => proto::volume_content_source::Type::Snapshot(
          proto::volume_content_source::SnapshotSource { snapshot_id },
        ),
        VolumeContentSource::Volume(volume_id) => {
          proto::volume_content_source::Type::Volume(proto::volume_content_source::VolumeSource {
            volume_id,
          })
        }
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
  capacity_bytes: Option<NonZeroU64>,
  volume_id: String,
  volume_context: HashMap<String, String>,
  content_source: Option<VolumeContentSource>,
  accessible_topology: Vec<Topology>,
}

impl Volume {
  pub fn new(volume_id: impl Into<String>, capacity_bytes: u64) -> Self {
    Volume {
      capacity_bytes: NonZeroU64::new(capacity_bytes),
      volume_id: volume_id.into(),
      volume_context: HashMap::new(),
      content_source: None,
      accessible_topology: Vec::new(),
    }
  }

  pub fn with_content_source(mut self, source: Option<VolumeContentSource>) -> Self {
    self.content_source = source;
    self
  }

  pub fn with_accessible_topology(mut self, topology: impl IntoIterator<Item = Topology>) -> Self {
    self.accessible_topology = topology.into_iter().collect();
    self
  }

  pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
    self.volume_context = context;
    self
  }

  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn capacity_bytes(&self) -> u64 {
    self.capacity_bytes.map(NonZeroU64::get).unwrap_or_default()
  }

  #[inline]
  pub fn content_source(&self) -> Option<&VolumeContentSource> {
    self.content_source.as_ref()
  }

  #[inline]
  pub fn accessible_topology(&self) -> &[Topology] {
    &self.accessible_topology
  }
}

impl From<Volume> for proto::Volume {
  fn from(value: Volume) -> Self {
    let accessible_topology = value
      .accessible_topology
      .into_iter()
      .map(|segments| proto::Topology { segments })
      .collect();

    proto::Volume {
      capacity_bytes: value.capacity_bytes.map(|v| v.get() as i64).unwrap_or_default(),
      volume_id: value.volume_id,
      volume_context: value.volume_context,
      content_source: value.content_source.map(Into::into),
      accessible_topology,
    }
  }
}

impl From<Volume> for proto::CreateVolumeResponse {
  fn from(value: Volume) -> Self {
    proto::CreateVolumeResponse {
      volume: Some(value.into()),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCapability {
  access_mode: AccessMode,
  access_type: AccessType,
}

impl VolumeCapability {
  pub fn new(access_mode: AccessMode, access_type: AccessType) -> Self {
    VolumeCapability {
      access_mode,
      access_type,
    }
  }

  #[inline]
  pub fn access_mode(&self) -> AccessMode {
    self.access_mode
  }

  #[inline]
  pub fn access_type(&self) -> &AccessType {
    &self.access_type
  }

  #[inline]
  pub fn is_block(&self) -> bool {
    matches!(self.access_type, AccessType::Block)
  }

  /// The mount capability, if this is a filesystem volume.
  #[inline]
  pub fn mount(&self) -> Option<&MountVolume> {
    match &self.access_type {
      AccessType::Mount(m) => Some(m),
      AccessType::Block => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AccessMode {
  Unknown,
  /// Can only be published once as read/write on a single node, at
  /// any given time.
  SingleNodeWriter,
  /// Can only be published once as readonly on a single node, at
  /// any given time.
  SingleNodeReaderOnly,
  /// Can be published as readonly at multiple nodes simultaneously.
  MultiNodeReaderOnly,
  /// Can be published at multiple nodes simultaneously. Only one of
  /// the node can be used as read/write. The rest will be readonly.
  MultiNodeSingleWriter,
  /// Can be published as read/write at multiple nodes
  /// simultaneously.
  MultiNodeMultiWriter,
}

impl AccessMode {
  /// Modes under which a publish must never be writable.
  #[inline]
  pub fn is_read_only(self) -> bool {
    matches!(
      self,
      AccessMode::SingleNodeReaderOnly | AccessMode::MultiNodeReaderOnly
    )
  }
}

impl From<proto::volume_capability::AccessMode> for AccessMode {
  fn from(value: proto::volume_capability::AccessMode) -> Self {
    use proto::volume_capability::access_mode::Mode;

    match Mode::from_i32(value.mode) {
      Some(Mode::SingleNodeWriter) => AccessMode::SingleNodeWriter,
      Some(Mode::SingleNodeReaderOnly) => AccessMode::SingleNodeReaderOnly,
      Some(Mode::MultiNodeReaderOnly) => AccessMode::MultiNodeReaderOnly,
      Some(Mode::MultiNodeSingleWriter) => AccessMode::MultiNodeSingleWriter,
      Some(Mode::MultiNodeMultiWriter) => AccessMode::MultiNodeMultiWriter,
      _ => AccessMode::Unknown,
    }
  }
}

impl From<AccessMode> for proto::volume_capability::AccessMode {
  fn from(value: AccessMode) -> Self {
    use proto::volume_capability::access_mode::Mode;

    let mode = match value {
      AccessMode::Unknown => Mode::Unknown,
      AccessMode::SingleNodeWriter => Mode::SingleNodeWriter,
      AccessMode::SingleNodeReaderOnly => Mode::SingleNodeReaderOnly,
      AccessMode::MultiNodeReaderOnly => Mode::MultiNodeReaderOnly,
      AccessMode::MultiNodeSingleWriter => Mode::MultiNodeSingleWriter,
      AccessMode::MultiNodeMultiWriter => Mode::MultiNodeMultiWriter,
    } as i32;

    proto::volume_capability::AccessMode { mode }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessType {
  /// Indicate that the volume will be accessed via the block device API.
  Block,

  /// Indicate that the volume will be accessed via the filesystem API.
  Mount(MountVolume),
}

impl From<proto::volume_capability::AccessType> for AccessType {
  fn from(value: proto::volume_capability::AccessType) -> Self {
    match value {
      proto::volume_capability::AccessType::Block(_) => AccessType::Block,
      proto::volume_capability::AccessType::Mount(v) => AccessType::Mount(v.into()),
    }
  }
}

impl From<AccessType> for proto::volume_capability::AccessType {
  fn from(value: AccessType) -> Self {
    match value {
      AccessType::Block => {
        proto::volume_capability::AccessType::Block(proto::volume_capability::BlockVolume {})
      }
      AccessType::Mount(v) => proto::volume_capability::AccessType::Mount(v.into()),
    }
  }
}

#[derive(Clone, PartialEq)]
pub struct MountVolume {
  fs_type: Option<String>,
  mount_flags: Vec<String>,
}

impl MountVolume {
  pub fn new(fs_type: Option<String>, mount_flags: Vec<String>) -> Self {
    MountVolume {
      fs_type,
      mount_flags,
    }
  }

  /// The filesystem type.
  #[inline]
  pub fn fs_type(&self) -> Option<&str> {
    self.fs_type.as_deref()
  }

  /// The mount options that can be used for the volume. `mount_flags`
  /// MAY contain sensitive information and must not be logged.
  pub fn mount_flags(&self) -> impl Iterator<Item = &str> + ExactSizeIterator {
    self.mount_flags.iter().map(|v| &**v)
  }
}

impl From<proto::volume_capability::MountVolume> for MountVolume {
  fn from(value: proto::volume_capability::MountVolume) -> Self {
    let fs_type = match value.fs_type {
      v if v.is_empty() => None,
      v => Some(v),
    };

    MountVolume {
      fs_type,
      mount_flags: value.mount_flags,
    }
  }
}

impl From<MountVolume> for proto::volume_capability::MountVolume {
  fn from(value: MountVolume) -> Self {
    proto::volume_capability::MountVolume {
      fs_type: value.fs_type.unwrap_or_default(),
      mount_flags: value.mount_flags,
    }
  }
}

impl fmt::Debug for MountVolume {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountVolume")
      .field("fs_type", &self.fs_type)
      .field(
        "mount_flags",
        &format!("REDACTED ({} items)", self.mount_flags.len()),
      )
      .finish()
  }
}

impl TryFrom<proto::VolumeCapability> for VolumeCapability {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeCapability) -> Result<Self, Self::Error> {
    let access_mode = value
      .access_mode
      .ok_or_else(|| tonic::Status::invalid_argument("Missing access_mode for VolumeCapability"))?
      .into();

    let access_type = value
      .access_type
      .ok_or_else(|| tonic::Status::invalid_argument("Missing access_type for VolumeCapability"))?
      .into();

    Ok(VolumeCapability {
      access_mode,
      access_type,
    })
  }
}

impl From<VolumeCapability> for proto::VolumeCapability {
  fn from(value: VolumeCapability) -> Self {
    proto::VolumeCapability {
      access_mode: Some(value.access_mode.into()),
      access_type: Some(value.access_type.into()),
    }
  }
}

pub(crate) fn volume_capabilities(
  values: Vec<proto::VolumeCapability>,
  error: &'static str,
) -> Result<Vec<VolumeCapability>, tonic::Status> {
  if values.is_empty() {
    return Err(tonic::Status::invalid_argument(error));
  }

  values.into_iter().map(TryInto::try_into).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeStatus {
  /// Node IDs the volume is controller published on.
  published_node_ids: Vec<String>,
}

impl VolumeStatus {
  pub fn new(published_node_ids: Vec<String>) -> Self {
    VolumeStatus { published_node_ids }
  }

  #[inline]
  pub fn published_node_ids(&self) -> &[String] {
    &self.published_node_ids
  }
}

impl From<VolumeStatus> for proto::list_volumes_response::VolumeStatus {
  fn from(value: VolumeStatus) -> Self {
    proto::list_volumes_response::VolumeStatus {
      published_node_ids: value.published_node_ids,
      volume_condition: None,
    }
  }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeUsageUnit {
  Bytes,
  Inodes,
}

impl From<VolumeUsageUnit> for proto::volume_usage::Unit {
  fn from(value: VolumeUsageUnit) -> Self {
    match value {
      VolumeUsageUnit::Bytes => proto::volume_usage::Unit::Bytes,
      VolumeUsageUnit::Inodes => proto::volume_usage::Unit::Inodes,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeUsage {
  available: Option<u64>,
  total: u64,
  used: Option<u64>,
  unit: VolumeUsageUnit,
}

impl VolumeUsage {
  pub fn new(unit: VolumeUsageUnit, total: u64, available: Option<u64>, used: Option<u64>) -> Self {
    VolumeUsage {
      available,
      total,
      used,
      unit,
    }
  }

  #[inline]
  pub fn unit(&self) -> VolumeUsageUnit {
    self.unit
  }

  #[inline]
  pub fn total(&self) -> u64 {
    self.total
  }

  #[inline]
  pub fn available(&self) -> Option<u64> {
    self.available
  }

  #[inline]
  pub fn used(&self) -> Option<u64> {
    self.used
  }
}

impl From<VolumeUsage> for proto::VolumeUsage {
  fn from(value: VolumeUsage) -> Self {
    proto::VolumeUsage {
      available: value.available.unwrap_or_default() as i64,
      total: value.total as i64,
      used: value.used.unwrap_or_default() as i64,
      unit: proto::volume_usage::Unit::from(value.unit) as i32,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityRange {
  AtLeast(NonZeroU64),
  AtMost(NonZeroU64),
  /// Effectively AtLeast(.0) & AtMost(.1)
  Between(NonZeroU64, NonZeroU64),
}

impl CapacityRange {
  #[inline]
  pub fn required_bytes(&self) -> Option<u64> {
    match self {
      CapacityRange::AtLeast(r) | CapacityRange::Between(r, _) => Some(r.get()),
      CapacityRange::AtMost(_) => None,
    }
  }

  #[inline]
  pub fn limit_bytes(&self) -> Option<u64> {
    match self {
      CapacityRange::AtMost(l) | CapacityRange::Between(_, l) => Some(l.get()),
      CapacityRange::AtLeast(_) => None,
    }
  }
}

/// A range with neither bound set is no range at all.
impl TryFrom<proto::CapacityRange> for Option<CapacityRange> {
  type Error = tonic::Status;

  fn try_from(value: proto::CapacityRange) -> Result<Self, Self::Error> {
    if value.required_bytes < 0 {
      return Err(tonic::Status::invalid_argument(
        "CapacityRange.required_bytes cannot be negative",
      ));
    }

    if value.limit_bytes < 0 {
      return Err(tonic::Status::invalid_argument(
        "CapacityRange.limit_bytes cannot be negative",
      ));
    }

    let required = NonZeroU64::new(value.required_bytes as u64);
    let limit = NonZeroU64::new(value.limit_bytes as u64);
    Ok(match (required, limit) {
      (None, None) => None,
      (Some(r), None) => Some(CapacityRange::AtLeast(r)),
      (None, Some(l)) => Some(CapacityRange::AtMost(l)),
      (Some(r), Some(l)) if l < r => {
        return Err(tonic::Status::invalid_argument(
          "CapacityRange.limit_bytes is less than required_bytes",
        ))
      }
      (Some(r), Some(l)) => Some(CapacityRange::Between(r, l)),
    })
  }
}

pub(crate) fn capacity_range(
  value: Option<proto::CapacityRange>,
) -> Result<Option<CapacityRange>, tonic::Status> {
  match value {
    None => Ok(None),
    Some(v) => v.try_into(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case(0, 0 => Ok(None) ; "unset")]
  #[test_case(10, 0 => Ok(Some((Some(10), None))) ; "at least")]
  #[test_case(0, 10 => Ok(Some((None, Some(10)))) ; "at most")]
  #[test_case(5, 10 => Ok(Some((Some(5), Some(10)))) ; "between")]
  #[test_case(10, 5 => Err(tonic::Code::InvalidArgument) ; "inverted")]
  #[test_case(-1, 0 => Err(tonic::Code::InvalidArgument) ; "negative")]
  fn parse_capacity_range(
    required_bytes: i64,
    limit_bytes: i64,
  ) -> Result<Option<(Option<u64>, Option<u64>)>, tonic::Code> {
    let range: Result<Option<CapacityRange>, _> = proto::CapacityRange {
      required_bytes,
      limit_bytes,
    }
    .try_into();

    range
      .map(|r| r.map(|r| (r.required_bytes(), r.limit_bytes())))
      .map_err(|e| e.code())
  }

  #[test]
  fn mount_flags_are_redacted() {
    let mount = MountVolume::new(Some("ext4".into()), vec!["password=hunter2".into()]);
    let debug = format!("{:?}", mount);

    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("REDACTED (1 items)"));
  }

  #[test]
  fn capability_requires_access_mode() {
    let capability = proto::VolumeCapability {
      access_mode: None,
      access_type: Some(proto::volume_capability::AccessType::Block(
        proto::volume_capability::BlockVolume {},
      )),
    };

    let err = VolumeCapability::try_from(capability).expect_err("missing access mode");
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }
}
