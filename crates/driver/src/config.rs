//! Command line flags and the cloud config file.

use crate::cloud::RetryPolicy;
use clap::Parser;
use serde::Deserialize;
use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  time::Duration,
};
use thiserror::Error;

pub const DEFAULT_DRIVER_NAME: &str = "pd.csi.storage.gke.io";
pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1/";

#[derive(Debug, Parser)]
#[command(name = "gce-pd-csi-driver")]
#[command(about = "CSI driver for Compute Engine persistent disks")]
pub struct Args {
  /// CSI endpoint, `unix:/path`, `unix:///path` or `tcp://host:port`
  #[arg(long, default_value = "unix:/tmp/csi.sock")]
  pub endpoint: String,

  /// Path to the cloud config file
  #[arg(long)]
  pub cloud_config: Option<PathBuf>,

  /// Serve the controller service
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
  pub run_controller_service: bool,

  /// Serve the node service
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
  pub run_node_service: bool,

  #[arg(long, default_value = DEFAULT_DRIVER_NAME)]
  pub driver_name: String,

  /// Vendor version reported by GetPluginInfo
  #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
  pub vendor_version: String,

  /// Log filter used when RUST_LOG is not set
  #[arg(long, default_value = "info")]
  pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CloudConfig {
  /// Overrides the project from the metadata server.
  pub project_id: Option<String>,
  /// Overrides the zone from the metadata server.
  pub zone: Option<String>,
  pub compute_endpoint: String,
  /// Where to get access tokens. Defaults to the metadata server.
  pub token_url: Option<String>,
  pub operation_timeout_secs: u64,
  pub operation_poll_interval_ms: u64,
  pub max_retries: u32,
  /// Labels added to every disk the driver creates.
  pub extra_labels: BTreeMap<String, String>,
}

impl Default for CloudConfig {
  fn default() -> Self {
    CloudConfig {
      project_id: None,
      zone: None,
      compute_endpoint: DEFAULT_COMPUTE_ENDPOINT.to_owned(),
      token_url: None,
      operation_timeout_secs: 300,
      operation_poll_interval_ms: 1000,
      max_retries: 5,
      extra_labels: BTreeMap::new(),
    }
  }
}

impl CloudConfig {
  pub fn from_file(path: &Path) -> Result<CloudConfig, LoadError> {
    let file_contents = std::fs::read_to_string(path).map_err(|err| LoadError::Io {
      path: path.into(),
      err,
    })?;
    let config_parsed: CloudConfig = toml::from_str(&file_contents).map_err(|err| LoadError::Parse {
      path: path.into(),
      err,
    })?;
    Ok(config_parsed)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_retries,
      poll_interval: Duration::from_millis(self.operation_poll_interval_ms),
      operation_timeout: Duration::from_secs(self.operation_timeout_secs),
      ..RetryPolicy::default()
    }
  }
}

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("error reading \"{}\": {err}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    err: std::io::Error,
  },
  #[error("error parsing \"{}\": {err}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    err: toml::de::Error,
  },
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn empty_file_uses_defaults() {
    let file = write_config("");
    let config = CloudConfig::from_file(file.path()).unwrap();

    assert_eq!(config, CloudConfig::default());
  }

  #[test]
  fn reads_overrides() {
    let file = write_config(
      r#"
project_id = "my-project"
zone = "europe-west4-a"
max_retries = 2
operation_poll_interval_ms = 50

[extra_labels]
cluster = "c1"
"#,
    );
    let config = CloudConfig::from_file(file.path()).unwrap();

    assert_eq!(config.project_id.as_deref(), Some("my-project"));
    assert_eq!(config.zone.as_deref(), Some("europe-west4-a"));
    assert_eq!(config.extra_labels.get("cluster").map(String::as_str), Some("c1"));

    let policy = config.retry_policy();
    assert_eq!(policy.max_retries, 2);
    assert_eq!(policy.poll_interval, Duration::from_millis(50));
    assert_eq!(policy.operation_timeout, Duration::from_secs(300));
  }

  #[test]
  fn unknown_key_is_a_parse_error() {
    let file = write_config("zonez = \"a\"");
    let err = CloudConfig::from_file(file.path()).unwrap_err();

    assert!(matches!(err, LoadError::Parse { .. }), "{}", err);
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = CloudConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();

    assert!(matches!(err, LoadError::Io { .. }));
  }

  #[test]
  fn boolean_service_flags() {
    let args = Args::try_parse_from(&[
      "gce-pd-csi-driver",
      "--run-controller-service",
      "false",
      "--cloud-config",
      "/etc/gce.toml",
    ])
    .unwrap();

    assert!(!args.run_controller_service);
    assert!(args.run_node_service);
    assert_eq!(args.driver_name, DEFAULT_DRIVER_NAME);
    assert_eq!(args.endpoint, "unix:/tmp/csi.sock");
    assert_eq!(args.cloud_config, Some(PathBuf::from("/etc/gce.toml")));
  }
}
