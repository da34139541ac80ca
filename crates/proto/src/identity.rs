use crate::{
  proto,
  utils::{record_request, Record},
  IdentityService, VolumeExpansionSupport,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Adapter serving an [IdentityService] as the generated `csi.v1.Identity` service.
pub struct Identity<T: IdentityService>(Arc<T>);

impl<T: IdentityService> Identity<T> {
  pub fn new(inner: Arc<T>) -> Self {
    Identity(inner)
  }
}

fn service_capability(ty: proto::plugin_capability::service::Type) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(proto::plugin_capability::Type::Service(
      proto::plugin_capability::Service { r#type: ty.into() },
    )),
  }
}

fn expansion_capability(
  ty: proto::plugin_capability::volume_expansion::Type,
) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(proto::plugin_capability::Type::VolumeExpansion(
      proto::plugin_capability::VolumeExpansion { r#type: ty.into() },
    )),
  }
}

pub(crate) fn get_capabilities(s: &impl IdentityService) -> proto::GetPluginCapabilitiesResponse {
  use proto::plugin_capability::{service, volume_expansion};

  let mut response = proto::GetPluginCapabilitiesResponse::default();

  let controller_service = s.controller_service();
  if controller_service {
    response
      .capabilities
      .push(service_capability(service::Type::ControllerService));
  }

  let volume_accessibility_constraints_support = s.volume_accessibility_constraints_support();
  if volume_accessibility_constraints_support {
    response.capabilities.push(service_capability(
      service::Type::VolumeAccessibilityConstraints,
    ));
  }

  let volume_expansion_support = s.volume_expansion_support();
  match volume_expansion_support {
    VolumeExpansionSupport::None => (),
    VolumeExpansionSupport::Offline => response
      .capabilities
      .push(expansion_capability(volume_expansion::Type::Offline)),
    VolumeExpansionSupport::Online => response
      .capabilities
      .push(expansion_capability(volume_expansion::Type::Online)),
  }

  debug!(
    ?controller_service,
    ?volume_accessibility_constraints_support,
    ?volume_expansion_support
  );
  response
}

#[async_trait]
impl<T: IdentityService> proto::identity_server::Identity for Identity<T> {
  #[instrument(
    name = "identity.get_plugin_info",
    skip(self, request),
    fields(request, name, vendor_version, manifest)
  )]
  async fn get_plugin_info(
    &self,
    request: tonic::Request<proto::GetPluginInfoRequest>,
  ) -> Result<tonic::Response<proto::GetPluginInfoResponse>, tonic::Status> {
    record_request(request.into_inner());
    let name = self.0.name();
    if name.is_empty() {
      return Err(tonic::Status::unavailable("Driver name not configured"));
    }

    let vendor_version = self.0.version();
    if vendor_version.is_empty() {
      return Err(tonic::Status::unavailable("Driver is missing version"));
    }

    let response = proto::GetPluginInfoResponse {
      name: name.record_field("name").into(),
      vendor_version: vendor_version.record_field("vendor_version").into(),
      manifest: self.0.manifest().record_field("manifest").clone(),
    };

    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "identity.get_plugin_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn get_plugin_capabilities(
    &self,
    _request: tonic::Request<proto::GetPluginCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::GetPluginCapabilitiesResponse>, tonic::Status> {
    let response = get_capabilities(&*self.0).record_response();

    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "identity.probe", skip(self, _request), fields(ready))]
  async fn probe(
    &self,
    _request: tonic::Request<proto::ProbeRequest>,
  ) -> Result<tonic::Response<proto::ProbeResponse>, tonic::Status> {
    let response = proto::ProbeResponse {
      ready: Some(self.0.ready().record_field("ready")),
    };

    Ok(tonic::Response::new(response))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proto::identity_server::Identity as _;

  struct TestPlugin {
    controller: bool,
  }

  impl IdentityService for TestPlugin {
    fn name(&self) -> &str {
      "test.csi.example.com"
    }

    fn version(&self) -> &str {
      "v0.0.1"
    }

    fn controller_service(&self) -> bool {
      self.controller
    }

    fn volume_expansion_support(&self) -> VolumeExpansionSupport {
      VolumeExpansionSupport::Online
    }
  }

  #[tokio::test]
  async fn plugin_info() {
    let identity = Identity::new(Arc::new(TestPlugin { controller: true }));
    let info = identity
      .get_plugin_info(tonic::Request::new(proto::GetPluginInfoRequest {}))
      .await
      .expect("plugin info")
      .into_inner();

    assert_eq!(info.name, "test.csi.example.com");
    assert_eq!(info.vendor_version, "v0.0.1");
  }

  #[test]
  fn controller_capability_follows_service() {
    let with = get_capabilities(&TestPlugin { controller: true });
    let without = get_capabilities(&TestPlugin { controller: false });

    assert_eq!(with.capabilities.len(), 2);
    assert_eq!(without.capabilities.len(), 1);
    assert_eq!(
      with.capabilities[0],
      service_capability(proto::plugin_capability::service::Type::ControllerService)
    );
  }
}
