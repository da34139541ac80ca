macro_rules! unsupported {
  ($name:expr) => {{
    ::tracing::error!("Unsupported method {} called", $name);
    return Err($crate::Error::Unimplemented(format!(
      "Unsupported method {} called",
      $name
    )));
  }};
}

pub mod controller;
pub mod identity;
pub mod node;
pub mod proto;
pub mod server;
pub mod volume;

mod error;
mod utils;

use std::collections::HashMap;

use lazy_static::lazy_static;

pub use controller::ControllerService;
pub use error::{Error, Result};
pub use identity::Identity;
pub use node::NodeService;
pub use server::Endpoint;

#[derive(Eq, Clone, Copy, PartialEq, Debug, Hash)]
pub enum VolumeExpansionSupport {
  None,
  Offline,
  Online,
}

pub trait IdentityService: Send + Sync + 'static {
  /// The name MUST follow domain name notation format
  /// (<https://tools.ietf.org/html/rfc1035#section-2.3.1>).
  fn name(&self) -> &str;

  /// Plugin version. Value of this field is opaque to the CO.
  fn version(&self) -> &str;

  /// Whether the controller service is served next to this identity.
  #[inline]
  fn controller_service(&self) -> bool {
    false
  }

  #[inline]
  fn volume_accessibility_constraints_support(&self) -> bool {
    false
  }

  #[inline]
  fn volume_expansion_support(&self) -> VolumeExpansionSupport {
    VolumeExpansionSupport::None
  }

  #[inline]
  fn ready(&self) -> bool {
    true
  }

  #[inline]
  fn manifest(&self) -> &HashMap<String, String> {
    lazy_static! {
      static ref EMPTY_MANIFEST: HashMap<String, String> = HashMap::new();
    }

    &EMPTY_MANIFEST
  }
}
