use super::VolumeCapability;
use crate::{proto, utils::require_non_empty, volume::volume_capabilities};
use std::{collections::HashMap, convert::TryFrom};

#[derive(Debug)]
pub struct ValidateVolumeCapabilitiesRequest {
  volume_id: String,
  volume_context: HashMap<String, String>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
}

impl ValidateVolumeCapabilitiesRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }

  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }
}

impl TryFrom<proto::ValidateVolumeCapabilitiesRequest> for ValidateVolumeCapabilitiesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ValidateVolumeCapabilitiesRequest) -> Result<Self, Self::Error> {
    let volume_id = require_non_empty(
      value.volume_id,
      "ValidateVolumeCapabilitiesRequest.volume_id is empty",
    )?;

    let volume_capabilities = volume_capabilities(
      value.volume_capabilities,
      "ValidateVolumeCapabilitiesRequest.volume_capabilities is empty",
    )?;

    Ok(ValidateVolumeCapabilitiesRequest {
      volume_id,
      volume_context: value.volume_context,
      volume_capabilities,
      parameters: value.parameters,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidateVolumeCapabilitiesResponse {
  /// Every requested capability is supported; echoes what was validated.
  Confirmed {
    volume_context: HashMap<String, String>,
    volume_capabilities: Vec<VolumeCapability>,
    parameters: HashMap<String, String>,
  },
  /// Why the capabilities could not be confirmed.
  Unconfirmed(String),
}

impl ValidateVolumeCapabilitiesResponse {
  pub fn confirmed(request: &ValidateVolumeCapabilitiesRequest) -> Self {
    ValidateVolumeCapabilitiesResponse::Confirmed {
      volume_context: request.volume_context.clone(),
      volume_capabilities: request.volume_capabilities.clone(),
      parameters: request.parameters.clone(),
    }
  }

  #[inline]
  pub fn is_confirmed(&self) -> bool {
    matches!(self, ValidateVolumeCapabilitiesResponse::Confirmed { .. })
  }
}

impl From<ValidateVolumeCapabilitiesResponse> for proto::ValidateVolumeCapabilitiesResponse {
  fn from(value: ValidateVolumeCapabilitiesResponse) -> Self {
    match value {
      ValidateVolumeCapabilitiesResponse::Confirmed {
        volume_context,
        volume_capabilities,
        parameters,
      } => proto::ValidateVolumeCapabilitiesResponse {
        confirmed: Some(proto::validate_volume_capabilities_response::Confirmed {
          volume_context,
          volume_capabilities: volume_capabilities.into_iter().map(Into::into).collect(),
          parameters,
        }),
        message: String::new(),
      },
      ValidateVolumeCapabilitiesResponse::Unconfirmed(message) => {
        proto::ValidateVolumeCapabilitiesResponse {
          confirmed: None,
          message,
        }
      }
    }
  }
}
