use bitflags::bitflags;

use crate::proto;

#[rustfmt::skip]
bitflags! {
  pub struct ControllerCapabilities: u32 {
    const CREATE_DELETE_VOLUME         = 0b_0000_0000_0000_0001;
    const PUBLISH_UNPUBLISH_VOLUME     = 0b_0000_0000_0000_0010;
    const LIST_VOLUMES                 = 0b_0000_0000_0000_0100;
    const GET_CAPACITY                 = 0b_0000_0000_0000_1000;

    /// Plugins supporting `CREATE_DELETE_SNAPSHOT` MUST support
    /// creating volume from snapshot.
    const CREATE_DELETE_SNAPSHOT       = 0b_0000_0000_0001_0000;
    const LIST_SNAPSHOTS               = 0b_0000_0000_0010_0000;
    const CLONE_VOLUME                 = 0b_0000_0000_0100_0000;

    /// Indicates the SP supports ControllerPublishVolume.readonly
    /// field.
    const PUBLISH_READONLY             = 0b_0000_0000_1000_0000;
    const EXPAND_VOLUME                = 0b_0000_0001_0000_0000;

    /// Indicates the SP supports the
    /// ListVolumesResponse.entry.published_nodes field
    const LIST_VOLUMES_PUBLISHED_NODES = 0b_0000_0010_0000_0000;
  }
}

use proto::controller_service_capability::rpc::Type;

const CAPABILITY_TYPES: &[(ControllerCapabilities, Type)] = &[
  (ControllerCapabilities::CREATE_DELETE_VOLUME, Type::CreateDeleteVolume),
  (ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME, Type::PublishUnpublishVolume),
  (ControllerCapabilities::LIST_VOLUMES, Type::ListVolumes),
  (ControllerCapabilities::GET_CAPACITY, Type::GetCapacity),
  (ControllerCapabilities::CREATE_DELETE_SNAPSHOT, Type::CreateDeleteSnapshot),
  (ControllerCapabilities::LIST_SNAPSHOTS, Type::ListSnapshots),
  (ControllerCapabilities::CLONE_VOLUME, Type::CloneVolume),
  (ControllerCapabilities::PUBLISH_READONLY, Type::PublishReadonly),
  (ControllerCapabilities::EXPAND_VOLUME, Type::ExpandVolume),
  (ControllerCapabilities::LIST_VOLUMES_PUBLISHED_NODES, Type::ListVolumesPublishedNodes),
];

impl From<ControllerCapabilities> for proto::ControllerGetCapabilitiesResponse {
  fn from(value: ControllerCapabilities) -> Self {
    let capabilities = CAPABILITY_TYPES
      .iter()
      .filter(|(flag, _)| value.contains(*flag))
      .map(|(_, ty)| proto::ControllerServiceCapability {
        r#type: Some(proto::controller_service_capability::Type::Rpc(
          proto::controller_service_capability::Rpc { r#type: *ty as i32 },
        )),
      })
      .collect();

    proto::ControllerGetCapabilitiesResponse { capabilities }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_set_capabilities_are_reported() {
    let caps = ControllerCapabilities::CREATE_DELETE_VOLUME | ControllerCapabilities::EXPAND_VOLUME;
    let response = proto::ControllerGetCapabilitiesResponse::from(caps);

    let types = response
      .capabilities
      .into_iter()
      .filter_map(|c| match c.r#type {
        Some(proto::controller_service_capability::Type::Rpc(rpc)) => Type::from_i32(rpc.r#type),
        None => None,
      })
      .collect::<Vec<_>>();

    assert_eq!(types, vec![Type::CreateDeleteVolume, Type::ExpandVolume]);
  }
}
