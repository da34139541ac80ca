use crate::{controller::GceController, node::GceNode};
use pd_csi_proto::{
  server::{self, ServeError},
  Endpoint, IdentityService, VolumeExpansionSupport,
};
use std::{future::Future, sync::Arc};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DriverError {
  #[error("driver name is empty")]
  MissingName,

  #[error("driver vendor version is empty")]
  MissingVersion,

  #[error("neither the controller nor the node service is enabled")]
  NoService,

  #[error(transparent)]
  Serve(#[from] ServeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
  pub name: String,
  pub vendor_version: String,
}

/// What the identity service reports about this plugin.
pub struct DriverIdentity {
  config: DriverConfig,
  controller: bool,
}

impl IdentityService for DriverIdentity {
  fn name(&self) -> &str {
    &self.config.name
  }

  fn version(&self) -> &str {
    &self.config.vendor_version
  }

  fn controller_service(&self) -> bool {
    self.controller
  }

  fn volume_accessibility_constraints_support(&self) -> bool {
    true
  }

  fn volume_expansion_support(&self) -> VolumeExpansionSupport {
    VolumeExpansionSupport::Online
  }
}

/// The services one process serves on its endpoint.
pub struct Driver {
  identity: Arc<DriverIdentity>,
  controller: Option<Arc<GceController>>,
  node: Option<Arc<GceNode>>,
}

impl Driver {
  pub fn new(
    config: DriverConfig,
    controller: Option<GceController>,
    node: Option<GceNode>,
  ) -> Result<Self, DriverError> {
    if config.name.is_empty() {
      return Err(DriverError::MissingName);
    }

    if config.vendor_version.is_empty() {
      return Err(DriverError::MissingVersion);
    }

    if controller.is_none() && node.is_none() {
      return Err(DriverError::NoService);
    }

    Ok(Driver {
      identity: Arc::new(DriverIdentity {
        config,
        controller: controller.is_some(),
      }),
      controller: controller.map(Arc::new),
      node: node.map(Arc::new),
    })
  }

  #[inline]
  pub fn identity(&self) -> &Arc<DriverIdentity> {
    &self.identity
  }

  /// Serves until `shutdown` resolves.
  pub async fn run<F>(self, endpoint: Endpoint, shutdown: F) -> Result<(), DriverError>
  where
    F: Future<Output = ()>,
  {
    info!(
      name = %self.identity.config.name,
      version = %self.identity.config.vendor_version,
      controller = self.controller.is_some(),
      node = self.node.is_some(),
      "starting driver"
    );

    server::serve(endpoint, self.identity, self.controller, self.node, shutdown).await?;
    info!("driver stopped");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    cloud::{fake::FakeCloudProvider, CloudClient, RetryPolicy},
    device::DeviceResolver,
    lock::OperationLocks,
    metadata::Metadata,
  };
  use pd_csi_mount_utils::FakeMounter;
  use pd_csi_proto::{identity::Identity, proto};
  use proto::identity_server::Identity as _;
  use tonic::Request;

  fn meta() -> Metadata {
    Metadata::new("p", "us-central1-c", "node-1", "n1-standard-4")
  }

  fn config() -> DriverConfig {
    DriverConfig {
      name: "pd.csi.storage.gke.io".into(),
      vendor_version: "v1.2.3".into(),
    }
  }

  fn controller() -> GceController {
    let provider = Arc::new(FakeCloudProvider::new("p", "us-central1-c"));
    GceController::new(
      CloudClient::new(provider, RetryPolicy::default()),
      meta(),
      OperationLocks::new(),
    )
  }

  fn node() -> GceNode {
    GceNode::new(
      Arc::new(FakeMounter::new(None)),
      DeviceResolver::default(),
      meta(),
      OperationLocks::new(),
    )
  }

  #[test]
  fn needs_a_service() {
    let err = Driver::new(config(), None, None).err().unwrap();
    assert!(matches!(err, DriverError::NoService));
  }

  #[test]
  fn needs_name_and_version() {
    let nameless = DriverConfig {
      name: String::new(),
      ..config()
    };
    let err = Driver::new(nameless, Some(controller()), None).err().unwrap();
    assert!(matches!(err, DriverError::MissingName));

    let unversioned = DriverConfig {
      vendor_version: String::new(),
      ..config()
    };
    let err = Driver::new(unversioned, None, Some(node())).err().unwrap();
    assert!(matches!(err, DriverError::MissingVersion));
  }

  #[tokio::test]
  async fn identity_reports_services() {
    let full = Driver::new(config(), Some(controller()), Some(node())).unwrap();
    let identity = Identity::new(full.identity().clone());

    let info = identity
      .get_plugin_info(Request::new(proto::GetPluginInfoRequest {}))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(info.name, "pd.csi.storage.gke.io");
    assert_eq!(info.vendor_version, "v1.2.3");

    let capabilities = identity
      .get_plugin_capabilities(Request::new(proto::GetPluginCapabilitiesRequest {}))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(capabilities.capabilities.len(), 3);

    let node_only = Driver::new(config(), None, Some(node())).unwrap();
    let capabilities = Identity::new(node_only.identity().clone())
      .get_plugin_capabilities(Request::new(proto::GetPluginCapabilitiesRequest {}))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(capabilities.capabilities.len(), 2);

    let probe = identity
      .probe(Request::new(proto::ProbeRequest {}))
      .await
      .unwrap()
      .into_inner();
    assert_eq!(probe.ready, Some(true));
  }
}
