//! Structured identifiers for disks, instances and snapshots.
//!
//! Every identifier has a single canonical string form which is what the CO
//! sees and hands back to us.

use pd_csi_proto::Error;
use std::{fmt, str::FromStr};
use thiserror::Error;

pub const GIB: u64 = 1 << 30;

/// Topology segment key carrying the zone of a node or volume.
pub const TOPOLOGY_KEY: &str = "topology.gke.io/zone";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed {kind} id {id:?}, expected {expected}")]
pub struct IdError {
  kind: &'static str,
  id: String,
  expected: &'static str,
}

impl From<IdError> for Error {
  fn from(value: IdError) -> Self {
    Error::InvalidArgument(value.to_string())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
  Zone(String),
  Region(String),
}

impl Location {
  /// The region the location lives in.
  pub fn region(&self) -> &str {
    match self {
      Location::Zone(zone) => region_of(zone),
      Location::Region(region) => region,
    }
  }
}

/// `us-central1-a` lives in `us-central1`.
pub fn region_of(zone: &str) -> &str {
  zone.rsplit_once('-').map(|(region, _)| region).unwrap_or(zone)
}

/// Number of whole GiB needed to hold `bytes`.
pub fn round_up_gib(bytes: u64) -> u64 {
  (bytes + GIB - 1) / GIB
}

fn segments<'a>(id: &'a str, n: usize) -> Option<Vec<&'a str>> {
  let parts: Vec<&str> = id.split('/').collect();
  if parts.len() != n || parts.iter().any(|p| p.is_empty()) {
    return None;
  }

  Some(parts)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeId {
  project: String,
  location: Location,
  name: String,
}

impl VolumeId {
  pub fn zonal(project: impl Into<String>, zone: impl Into<String>, name: impl Into<String>) -> Self {
    VolumeId {
      project: project.into(),
      location: Location::Zone(zone.into()),
      name: name.into(),
    }
  }

  pub fn regional(
    project: impl Into<String>,
    region: impl Into<String>,
    name: impl Into<String>,
  ) -> Self {
    VolumeId {
      project: project.into(),
      location: Location::Region(region.into()),
      name: name.into(),
    }
  }

  #[inline]
  pub fn project(&self) -> &str {
    &self.project
  }

  #[inline]
  pub fn location(&self) -> &Location {
    &self.location
  }

  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  #[inline]
  pub fn is_regional(&self) -> bool {
    matches!(self.location, Location::Region(_))
  }
}

impl FromStr for VolumeId {
  type Err = IdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let malformed = || IdError {
      kind: "volume",
      id: s.to_owned(),
      expected: "projects/{project}/{zones|regions}/{location}/disks/{name}",
    };

    let parts = segments(s, 6).ok_or_else(malformed)?;
    if parts[0] != "projects" || parts[4] != "disks" {
      return Err(malformed());
    }

    let location = match parts[2] {
      "zones" => Location::Zone(parts[3].to_owned()),
      "regions" => Location::Region(parts[3].to_owned()),
      _ => return Err(malformed()),
    };

    Ok(VolumeId {
      project: parts[1].to_owned(),
      location,
      name: parts[5].to_owned(),
    })
  }
}

impl fmt::Display for VolumeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.location {
      Location::Zone(zone) => write!(f, "projects/{}/zones/{}/disks/{}", self.project, zone, self.name),
      Location::Region(region) => write!(
        f,
        "projects/{}/regions/{}/disks/{}",
        self.project, region, self.name
      ),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
  project: String,
  zone: String,
  name: String,
}

impl NodeId {
  pub fn new(project: impl Into<String>, zone: impl Into<String>, name: impl Into<String>) -> Self {
    NodeId {
      project: project.into(),
      zone: zone.into(),
      name: name.into(),
    }
  }

  #[inline]
  pub fn project(&self) -> &str {
    &self.project
  }

  #[inline]
  pub fn zone(&self) -> &str {
    &self.zone
  }

  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }
}

impl FromStr for NodeId {
  type Err = IdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let malformed = || IdError {
      kind: "node",
      id: s.to_owned(),
      expected: "projects/{project}/zones/{zone}/instances/{name}",
    };

    let parts = segments(s, 6).ok_or_else(malformed)?;
    if parts[0] != "projects" || parts[2] != "zones" || parts[4] != "instances" {
      return Err(malformed());
    }

    Ok(NodeId::new(parts[1], parts[3], parts[5]))
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "projects/{}/zones/{}/instances/{}",
      self.project, self.zone, self.name
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId {
  project: String,
  name: String,
}

impl SnapshotId {
  pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
    SnapshotId {
      project: project.into(),
      name: name.into(),
    }
  }

  #[inline]
  pub fn project(&self) -> &str {
    &self.project
  }

  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }
}

impl FromStr for SnapshotId {
  type Err = IdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let malformed = || IdError {
      kind: "snapshot",
      id: s.to_owned(),
      expected: "projects/{project}/global/snapshots/{name}",
    };

    let parts = segments(s, 5).ok_or_else(malformed)?;
    if parts[0] != "projects" || parts[2] != "global" || parts[3] != "snapshots" {
      return Err(malformed());
    }

    Ok(SnapshotId::new(parts[1], parts[4]))
  }
}

impl fmt::Display for SnapshotId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "projects/{}/global/snapshots/{}", self.project, self.name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case("projects/p/zones/us-central1-a/disks/d" => Ok(VolumeId::zonal("p", "us-central1-a", "d")) ; "zonal")]
  #[test_case("projects/p/regions/us-central1/disks/d" => Ok(VolumeId::regional("p", "us-central1", "d")) ; "regional")]
  #[test_case("projects/p/zones/z/disk/d" => Err(()) ; "wrong collection")]
  #[test_case("projects/p/continents/z/disks/d" => Err(()) ; "wrong scope")]
  #[test_case("projects/p/zones//disks/d" => Err(()) ; "empty segment")]
  #[test_case("d" => Err(()) ; "bare name")]
  fn parse_volume_id(id: &str) -> Result<VolumeId, ()> {
    id.parse().map_err(|_| ())
  }

  #[test_case("projects/p/zones/z/instances/n" => Ok(NodeId::new("p", "z", "n")) ; "valid")]
  #[test_case("projects/p/regions/z/instances/n" => Err(()) ; "regional")]
  #[test_case("projects/p/zones/z/instances/n/extra" => Err(()) ; "trailing")]
  fn parse_node_id(id: &str) -> Result<NodeId, ()> {
    id.parse().map_err(|_| ())
  }

  #[test_case("projects/p/global/snapshots/s" => Ok(SnapshotId::new("p", "s")) ; "valid")]
  #[test_case("projects/p/zones/z/snapshots/s" => Err(()) ; "zonal")]
  fn parse_snapshot_id(id: &str) -> Result<SnapshotId, ()> {
    id.parse().map_err(|_| ())
  }

  #[test_case("projects/p/zones/us-central1-a/disks/d")]
  #[test_case("projects/p/regions/us-central1/disks/d")]
  fn volume_id_display_is_canonical(id: &str) {
    let parsed: VolumeId = id.parse().unwrap();
    assert_eq!(parsed.to_string(), id);
  }

  #[test_case(0 => 0)]
  #[test_case(1 => 1)]
  #[test_case(GIB => 1)]
  #[test_case(GIB + 1 => 2)]
  #[test_case(10 * GIB => 10)]
  fn rounds_up_to_gib(bytes: u64) -> u64 {
    round_up_gib(bytes)
  }

  #[test_case("us-central1-a" => "us-central1")]
  #[test_case("europe-west4-b" => "europe-west4")]
  #[test_case("local" => "local")]
  fn zone_region(zone: &str) -> &str {
    region_of(zone)
  }

  #[test]
  fn malformed_id_is_invalid_argument() {
    let err: Error = "nope".parse::<VolumeId>().unwrap_err().into();
    assert!(matches!(err, Error::InvalidArgument(_)));
  }
}
