use crate::ids::{region_of, NodeId};
use thiserror::Error;
use tracing::debug;

const METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1/";

#[derive(Debug, Error)]
pub enum MetadataError {
  #[error("request for metadata {path} failed")]
  Request {
    path: &'static str,
    #[source]
    err: reqwest::Error,
  },

  #[error("metadata {path} is empty")]
  Empty { path: &'static str },
}

/// Facts about the instance the driver runs on. Fetched once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
  project: String,
  zone: String,
  instance_name: String,
  machine_type: String,
}

impl Metadata {
  pub fn new(
    project: impl Into<String>,
    zone: impl Into<String>,
    instance_name: impl Into<String>,
    machine_type: impl Into<String>,
  ) -> Self {
    Metadata {
      project: project.into(),
      zone: zone.into(),
      instance_name: instance_name.into(),
      machine_type: machine_type.into(),
    }
  }

  /// Reads the metadata server of the instance we are running on.
  pub async fn fetch(http: &reqwest::Client) -> Result<Self, MetadataError> {
    let project = get(http, "project/project-id").await?;
    // projects/{number}/zones/{zone}
    let zone = last_segment(&get(http, "instance/zone").await?).to_owned();
    let instance_name = get(http, "instance/name").await?;
    let machine_type = last_segment(&get(http, "instance/machine-type").await?).to_owned();

    let metadata = Metadata {
      project,
      zone,
      instance_name,
      machine_type,
    };
    debug!(?metadata, "fetched instance metadata");
    Ok(metadata)
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
  pub fn region(&self) -> &str {
    region_of(&self.zone)
  }

  #[inline]
  pub fn instance_name(&self) -> &str {
    &self.instance_name
  }

  #[inline]
  pub fn machine_type(&self) -> &str {
    &self.machine_type
  }

  pub fn node_id(&self) -> NodeId {
    NodeId::new(&self.project, &self.zone, &self.instance_name)
  }

  /// Overrides the project and zone, keeping the instance facts.
  pub fn with_overrides(mut self, project: Option<&str>, zone: Option<&str>) -> Self {
    if let Some(project) = project {
      self.project = project.to_owned();
    }

    if let Some(zone) = zone {
      self.zone = zone.to_owned();
    }

    self
  }
}

fn last_segment(value: &str) -> &str {
  value.rsplit('/').next().unwrap_or(value)
}

async fn fetch_text(http: &reqwest::Client, path: &str) -> Result<String, reqwest::Error> {
  http
    .get(format!("{}{}", METADATA_URL, path))
    .header("Metadata-Flavor", "Google")
    .send()
    .await?
    .error_for_status()?
    .text()
    .await
}

async fn get(http: &reqwest::Client, path: &'static str) -> Result<String, MetadataError> {
  let body = fetch_text(http, path)
    .await
    .map_err(|err| MetadataError::Request { path, err })?;

  let body = body.trim();
  if body.is_empty() {
    return Err(MetadataError::Empty { path });
  }

  Ok(body.to_owned())
}
