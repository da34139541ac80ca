use pd_csi_proto::Error;
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_DISK_TYPE: &str = "pd-standard";

const PARAM_TYPE: &str = "type";
const PARAM_REPLICATION_TYPE: &str = "replication-type";
const PARAM_KMS_KEY: &str = "disk-encryption-kms-key";
const PARAM_LABELS: &str = "labels";

/// Parameters injected by the external provisioner. Never meant for us.
const RESERVED_PREFIX: &str = "csi.storage.k8s.io/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replication {
  None,
  RegionalPd,
}

/// Disk creation parameters taken from a storage class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskParameters {
  disk_type: String,
  replication: Replication,
  kms_key: Option<String>,
  labels: BTreeMap<String, String>,
}

impl Default for DiskParameters {
  fn default() -> Self {
    DiskParameters {
      disk_type: DEFAULT_DISK_TYPE.to_owned(),
      replication: Replication::None,
      kms_key: None,
      labels: BTreeMap::new(),
    }
  }
}

impl DiskParameters {
  /// Keys are matched case-insensitively.
  pub fn parse(parameters: &HashMap<String, String>) -> Result<Self, Error> {
    let mut params = DiskParameters::default();

    for (key, value) in parameters {
      let key = key.to_lowercase();
      match key.as_str() {
        PARAM_TYPE if !value.is_empty() => params.disk_type = value.clone(),
        PARAM_TYPE => (),
        PARAM_REPLICATION_TYPE => {
          params.replication = match value.to_lowercase().as_str() {
            "" | "none" => Replication::None,
            "regional-pd" => Replication::RegionalPd,
            other => {
              return Err(Error::invalid_argument(format!(
                "Invalid replication-type {:?}, must be none or regional-pd",
                other
              )))
            }
          }
        }
        PARAM_KMS_KEY if !value.is_empty() => params.kms_key = Some(value.clone()),
        PARAM_KMS_KEY => (),
        PARAM_LABELS => params.labels = parse_labels(value)?,
        k if k.starts_with(RESERVED_PREFIX) => (),
        k => {
          return Err(Error::invalid_argument(format!(
            "Invalid option {:?} in parameters",
            k
          )))
        }
      }
    }

    Ok(params)
  }

  #[inline]
  pub fn disk_type(&self) -> &str {
    &self.disk_type
  }

  #[inline]
  pub fn replication(&self) -> Replication {
    self.replication
  }

  #[inline]
  pub fn kms_key(&self) -> Option<&str> {
    self.kms_key.as_deref()
  }

  #[inline]
  pub fn labels(&self) -> &BTreeMap<String, String> {
    &self.labels
  }

  /// Adds `extra` labels that are not already set.
  pub fn with_extra_labels(mut self, extra: &BTreeMap<String, String>) -> Self {
    for (k, v) in extra {
      self.labels.entry(k.clone()).or_insert_with(|| v.clone());
    }

    self
  }
}

/// `k1=v1,k2=v2`
fn parse_labels(value: &str) -> Result<BTreeMap<String, String>, Error> {
  let mut labels = BTreeMap::new();
  for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
    let (k, v) = pair.split_once('=').ok_or_else(|| {
      Error::invalid_argument(format!("Label {:?} is not of the form key=value", pair))
    })?;

    let k = k.trim();
    if k.is_empty() {
      return Err(Error::invalid_argument(format!("Label {:?} has an empty key", pair)));
    }

    if labels.insert(k.to_owned(), v.trim().to_owned()).is_some() {
      return Err(Error::invalid_argument(format!("Label {:?} is given twice", k)));
    }
  }

  Ok(labels)
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn defaults() {
    let parsed = DiskParameters::parse(&HashMap::new()).unwrap();
    assert_eq!(parsed, DiskParameters::default());
    assert_eq!(parsed.disk_type(), "pd-standard");
  }

  #[test]
  fn all_keys() {
    let parsed = DiskParameters::parse(&params(&[
      ("Type", "pd-ssd"),
      ("replication-type", "Regional-PD"),
      ("disk-encryption-kms-key", "projects/p/locations/l/keyRings/r/cryptoKeys/k"),
      ("labels", "team=storage, env=prod"),
      ("csi.storage.k8s.io/pvc/name", "claim"),
    ]))
    .unwrap();

    assert_eq!(parsed.disk_type(), "pd-ssd");
    assert_eq!(parsed.replication(), Replication::RegionalPd);
    assert_eq!(
      parsed.kms_key(),
      Some("projects/p/locations/l/keyRings/r/cryptoKeys/k")
    );
    assert_eq!(parsed.labels().get("team").map(String::as_str), Some("storage"));
    assert_eq!(parsed.labels().get("env").map(String::as_str), Some("prod"));
  }

  #[test_case(&[("zone", "us-central1-a")] ; "unknown key")]
  #[test_case(&[("replication-type", "triple")] ; "bad replication")]
  #[test_case(&[("labels", "novalue")] ; "label without value")]
  #[test_case(&[("labels", "=v")] ; "label without key")]
  #[test_case(&[("labels", "a=1,a=2")] ; "duplicate label")]
  fn rejects(pairs: &[(&str, &str)]) {
    let err = DiskParameters::parse(&params(pairs)).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{:?}", err);
  }

  #[test]
  fn extra_labels_do_not_override() {
    let parsed = DiskParameters::parse(&params(&[("labels", "env=prod")])).unwrap();
    let extra = vec![
      ("env".to_owned(), "dev".to_owned()),
      ("cluster".to_owned(), "c1".to_owned()),
    ]
    .into_iter()
    .collect();

    let labels = parsed.with_extra_labels(&extra).labels().clone();
    assert_eq!(labels.get("env").map(String::as_str), Some("prod"));
    assert_eq!(labels.get("cluster").map(String::as_str), Some("c1"));
  }
}
