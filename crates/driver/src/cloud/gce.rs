use super::{
  AttachedDisk, CloudError, CloudProvider, CloudSnapshot, Disk, DiskMode, DiskSource, DiskSpec,
  Instance, Operation, OperationScope, OperationStatus, Page, Quota, Result, SnapshotStatus,
};
use crate::ids::{Location, NodeId, SnapshotId, VolumeId};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::{
  collections::BTreeMap,
  time::{Duration, Instant, SystemTime},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const METADATA_TOKEN_URL: &str =
  "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

fn de_int64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
  // int64 fields are JSON strings in the compute API
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Repr {
    Str(String),
    Num(u64),
  }

  match Repr::deserialize(d)? {
    Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    Repr::Num(n) => Ok(n),
  }
}

/// `https://www.googleapis.com/compute/v1/projects/p/zones/z` becomes
/// `projects/p/zones/z`.
fn relative(url: &str) -> &str {
  url.find("projects/").map(|i| &url[i..]).unwrap_or(url)
}

fn last_segment(url: &str) -> &str {
  url.rsplit('/').next().unwrap_or(url)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskResource {
  name: String,
  #[serde(default, deserialize_with = "de_int64")]
  size_gb: u64,
  #[serde(rename = "type", default)]
  disk_type: String,
  zone: Option<String>,
  region: Option<String>,
  #[serde(default)]
  replica_zones: Vec<String>,
  source_snapshot: Option<String>,
  source_disk: Option<String>,
  disk_encryption_key: Option<EncryptionKey>,
  #[serde(default)]
  labels: BTreeMap<String, String>,
  #[serde(default)]
  users: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptionKey {
  kms_key_name: Option<String>,
}

fn disk_from_resource(project: &str, r: DiskResource) -> Result<Disk> {
  let id = match (&r.zone, &r.region) {
    (Some(zone), _) => VolumeId::zonal(project, last_segment(zone), &r.name),
    (None, Some(region)) => VolumeId::regional(project, last_segment(region), &r.name),
    (None, None) => {
      return Err(CloudError::Internal(format!(
        "disk {} has neither zone nor region",
        r.name
      )))
    }
  };

  let source = match (r.source_snapshot, r.source_disk) {
    (Some(snapshot), _) => relative(&snapshot).parse().ok().map(DiskSource::Snapshot),
    (None, Some(disk)) => relative(&disk).parse().ok().map(DiskSource::Disk),
    (None, None) => None,
  };

  let users = r
    .users
    .iter()
    .filter_map(|u| relative(u).parse::<NodeId>().ok())
    .collect();

  Ok(Disk {
    id,
    size_gb: r.size_gb,
    disk_type: last_segment(&r.disk_type).to_owned(),
    replica_zones: r.replica_zones.iter().map(|z| last_segment(z).to_owned()).collect(),
    source,
    kms_key: r.disk_encryption_key.and_then(|k| k.kms_key_name),
    labels: r.labels,
    users,
  })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedDisks {
  #[serde(default)]
  items: BTreeMap<String, ScopedDisks>,
  next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopedDisks {
  #[serde(default)]
  disks: Vec<DiskResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceResource {
  name: String,
  zone: String,
  #[serde(default)]
  machine_type: String,
  #[serde(default)]
  disks: Vec<AttachedDiskResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachedDiskResource {
  #[serde(default)]
  device_name: String,
  source: Option<String>,
  #[serde(default)]
  mode: String,
}

fn instance_from_resource(project: &str, r: InstanceResource) -> Instance {
  let disks = r
    .disks
    .into_iter()
    .filter_map(|d| {
      let source = relative(d.source.as_deref()?).parse().ok()?;
      let mode = match d.mode.as_str() {
        "READ_ONLY" => DiskMode::ReadOnly,
        _ => DiskMode::ReadWrite,
      };
      Some(AttachedDisk {
        device_name: d.device_name,
        source,
        mode,
      })
    })
    .collect();

  Instance {
    id: NodeId::new(project, last_segment(&r.zone), r.name),
    machine_type: last_segment(&r.machine_type).to_owned(),
    disks,
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotResource {
  name: String,
  #[serde(default)]
  source_disk: String,
  #[serde(default, deserialize_with = "de_int64")]
  disk_size_gb: u64,
  creation_timestamp: Option<String>,
  #[serde(default)]
  status: String,
}

fn snapshot_from_resource(project: &str, r: SnapshotResource) -> Result<CloudSnapshot> {
  let source_disk = relative(&r.source_disk).parse().map_err(|_| {
    CloudError::Internal(format!(
      "snapshot {} has unexpected source disk {:?}",
      r.name, r.source_disk
    ))
  })?;

  let created_at = r
    .creation_timestamp
    .as_deref()
    .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
    .map(SystemTime::from);

  let status = match r.status.as_str() {
    "READY" => SnapshotStatus::Ready,
    "UPLOADING" => SnapshotStatus::Uploading,
    "FAILED" => SnapshotStatus::Failed,
    "DELETING" => SnapshotStatus::Deleting,
    _ => SnapshotStatus::Creating,
  };

  Ok(CloudSnapshot {
    id: SnapshotId::new(project, r.name),
    source_disk,
    disk_size_gb: r.disk_size_gb,
    created_at,
    status,
  })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotList {
  #[serde(default)]
  items: Vec<SnapshotResource>,
  next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationResource {
  name: String,
  #[serde(default)]
  status: String,
  zone: Option<String>,
  region: Option<String>,
  error: Option<OperationErrors>,
}

#[derive(Debug, Deserialize)]
struct OperationErrors {
  #[serde(default)]
  errors: Vec<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
  #[serde(default)]
  code: String,
  #[serde(default)]
  message: String,
}

/// Translates the first error of a finished operation.
fn operation_error(errors: &OperationErrors) -> CloudError {
  let first = match errors.errors.first() {
    Some(first) => first,
    None => return CloudError::Internal("operation failed without an error".to_owned()),
  };

  let message = format!("{}: {}", first.code, first.message);
  match first.code.as_str() {
    "RESOURCE_NOT_FOUND" | "NOT_FOUND" => CloudError::NotFound(message),
    "RESOURCE_ALREADY_EXISTS" | "ALREADY_EXISTS" => CloudError::AlreadyExists(message),
    "QUOTA_EXCEEDED" | "RATE_LIMIT_EXCEEDED" | "ZONE_RESOURCE_POOL_EXHAUSTED" => {
      CloudError::RateLimited(message)
    }
    "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE" | "RESOURCE_NOT_READY" => {
      CloudError::FailedPrecondition(message)
    }
    "INVALID_USAGE" | "INVALID_FIELD_VALUE" => CloudError::InvalidArgument(message),
    _ => CloudError::Internal(message),
  }
}

fn operation_from_resource(project: &str, r: OperationResource) -> Operation {
  let scope = match (&r.zone, &r.region) {
    (Some(zone), _) => OperationScope::Zone(last_segment(zone).to_owned()),
    (None, Some(region)) => OperationScope::Region(last_segment(region).to_owned()),
    (None, None) => OperationScope::Global,
  };

  let status = match r.status.as_str() {
    "DONE" => OperationStatus::Done(r.error.as_ref().map(operation_error)),
    "RUNNING" => OperationStatus::Running,
    _ => OperationStatus::Pending,
  };

  Operation {
    project: project.to_owned(),
    name: r.name,
    scope,
    status,
  }
}

#[derive(Debug, Deserialize)]
struct RegionResource {
  #[serde(default)]
  quotas: Vec<QuotaResource>,
}

#[derive(Debug, Deserialize)]
struct QuotaResource {
  metric: String,
  #[serde(default)]
  limit: f64,
  #[serde(default)]
  usage: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
  error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
  #[serde(default)]
  message: String,
  #[serde(default)]
  errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
  #[serde(default)]
  reason: String,
}

/// Translates a failed API response.
fn status_error(status: StatusCode, body: &str) -> CloudError {
  let (message, reasons) = match serde_json::from_str::<ErrorBody>(body) {
    Ok(parsed) => (
      parsed.error.message,
      parsed.error.errors.into_iter().map(|e| e.reason).collect(),
    ),
    Err(_) => (body.to_owned(), Vec::new()),
  };

  let message = format!("{}: {}", status, message);
  let rate_limited = reasons
    .iter()
    .any(|r| r == "rateLimitExceeded" || r == "userRateLimitExceeded" || r == "quotaExceeded");

  match status {
    StatusCode::NOT_FOUND => CloudError::NotFound(message),
    StatusCode::CONFLICT => CloudError::AlreadyExists(message),
    StatusCode::TOO_MANY_REQUESTS => CloudError::RateLimited(message),
    StatusCode::FORBIDDEN if rate_limited => CloudError::RateLimited(message),
    StatusCode::BAD_REQUEST => CloudError::InvalidArgument(message),
    StatusCode::PRECONDITION_FAILED => CloudError::FailedPrecondition(message),
    s if s.is_server_error() => CloudError::Transient(message),
    _ => CloudError::Internal(message),
  }
}

fn transport_error(err: reqwest::Error) -> CloudError {
  if err.is_timeout() || err.is_connect() || err.is_request() {
    CloudError::Transient(err.to_string())
  } else {
    CloudError::Internal(err.to_string())
  }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  #[serde(default)]
  expires_in: u64,
}

struct CachedToken {
  token: String,
  refresh_at: Instant,
}

/// Access token from the metadata server, cached until shortly before it
/// expires.
struct TokenSource {
  url: String,
  cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
  async fn token(&self, http: &reqwest::Client) -> Result<String> {
    let mut cached = self.cached.lock().await;
    if let Some(c) = cached.as_ref() {
      if Instant::now() < c.refresh_at {
        return Ok(c.token.clone());
      }
    }

    debug!(url = %self.url, "fetching access token");
    let response = http
      .get(&self.url)
      .header("Metadata-Flavor", "Google")
      .send()
      .await
      .map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(status_error(status, &body));
    }

    let token: TokenResponse = response.json().await.map_err(transport_error)?;
    let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_SLACK);
    *cached = Some(CachedToken {
      token: token.access_token.clone(),
      refresh_at: Instant::now() + lifetime,
    });

    Ok(token.access_token)
  }
}

/// Provider speaking to the Compute Engine REST API.
pub struct GceProvider {
  http: reqwest::Client,
  endpoint: String,
  tokens: TokenSource,
}

impl GceProvider {
  pub fn new(http: reqwest::Client, endpoint: &str, token_url: Option<&str>) -> Self {
    let mut endpoint = endpoint.to_owned();
    if !endpoint.ends_with('/') {
      endpoint.push('/');
    }

    GceProvider {
      http,
      endpoint,
      tokens: TokenSource {
        url: token_url.unwrap_or(METADATA_TOKEN_URL).to_owned(),
        cached: Mutex::new(None),
      },
    }
  }

  async fn call<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<serde_json::Value>,
  ) -> Result<T> {
    let token = self.tokens.token(&self.http).await?;
    let url = format!("{}{}", self.endpoint, path);

    let mut request = self
      .http
      .request(method.clone(), &url)
      .bearer_auth(token)
      .query(query);
    if let Some(body) = body {
      request = request.json(&body);
    }

    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      let err = status_error(status, &body);
      if !err.is_not_found() {
        warn!(%method, %url, error = %err, "compute API call failed");
      }
      return Err(err);
    }

    response.json().await.map_err(transport_error)
  }

  async fn operation(
    &self,
    project: &str,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<serde_json::Value>,
  ) -> Result<Operation> {
    let resource: OperationResource = self.call(method, path, query, body).await?;
    Ok(operation_from_resource(project, resource))
  }
}

fn disk_path(id: &VolumeId) -> String {
  id.to_string()
}

fn disk_collection(id: &VolumeId) -> String {
  match id.location() {
    Location::Zone(zone) => format!("projects/{}/zones/{}/disks", id.project(), zone),
    Location::Region(region) => format!("projects/{}/regions/{}/disks", id.project(), region),
  }
}

fn disk_type_url(id: &VolumeId, disk_type: &str) -> String {
  match id.location() {
    Location::Zone(zone) => format!("projects/{}/zones/{}/diskTypes/{}", id.project(), zone, disk_type),
    Location::Region(region) => format!(
      "projects/{}/regions/{}/diskTypes/{}",
      id.project(),
      region,
      disk_type
    ),
  }
}

fn insert_body(spec: &DiskSpec) -> serde_json::Value {
  let mut body = json!({
    "name": spec.id.name(),
    "sizeGb": spec.size_gb.to_string(),
    "type": disk_type_url(&spec.id, &spec.disk_type),
    "description": spec.description,
  });

  if !spec.labels.is_empty() {
    body["labels"] = json!(spec.labels);
  }

  if !spec.replica_zones.is_empty() {
    let zones: Vec<String> = spec
      .replica_zones
      .iter()
      .map(|z| format!("projects/{}/zones/{}", spec.id.project(), z))
      .collect();
    body["replicaZones"] = json!(zones);
  }

  match &spec.source {
    Some(DiskSource::Snapshot(id)) => body["sourceSnapshot"] = json!(id.to_string()),
    Some(DiskSource::Disk(id)) => body["sourceDisk"] = json!(id.to_string()),
    None => (),
  }

  if let Some(key) = &spec.kms_key {
    body["diskEncryptionKey"] = json!(EncryptionKey {
      kms_key_name: Some(key.clone())
    });
  }

  body
}

fn page_query(max_results: Option<u32>, page_token: Option<&str>) -> Vec<(&'static str, String)> {
  let mut query = Vec::new();
  if let Some(max) = max_results {
    query.push(("maxResults", max.to_string()));
  }

  if let Some(token) = page_token {
    query.push(("pageToken", token.to_owned()));
  }

  query
}

#[async_trait]
impl CloudProvider for GceProvider {
  async fn get_disk(&self, id: &VolumeId) -> Result<Disk> {
    let resource: DiskResource = self.call(Method::GET, &disk_path(id), &[], None).await?;
    disk_from_resource(id.project(), resource)
  }

  async fn list_disks(
    &self,
    project: &str,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<Disk>> {
    let path = format!("projects/{}/aggregated/disks", project);
    let list: AggregatedDisks = self
      .call(Method::GET, &path, &page_query(max_results, page_token), None)
      .await?;

    let items = list
      .items
      .into_iter()
      .flat_map(|(_, scoped)| scoped.disks)
      .map(|d| disk_from_resource(project, d))
      .collect::<Result<_>>()?;

    Ok(Page {
      items,
      next_token: list.next_page_token,
    })
  }

  async fn insert_disk(&self, spec: &DiskSpec) -> Result<Operation> {
    self
      .operation(
        spec.id.project(),
        Method::POST,
        &disk_collection(&spec.id),
        &[],
        Some(insert_body(spec)),
      )
      .await
  }

  async fn delete_disk(&self, id: &VolumeId) -> Result<Operation> {
    self
      .operation(id.project(), Method::DELETE, &disk_path(id), &[], None)
      .await
  }

  async fn resize_disk(&self, id: &VolumeId, size_gb: u64) -> Result<Operation> {
    let path = format!("{}/resize", disk_path(id));
    let body = json!({ "sizeGb": size_gb.to_string() });
    self
      .operation(id.project(), Method::POST, &path, &[], Some(body))
      .await
  }

  async fn get_instance(&self, id: &NodeId) -> Result<Instance> {
    let resource: InstanceResource = self
      .call(Method::GET, &id.to_string(), &[], None)
      .await?;
    Ok(instance_from_resource(id.project(), resource))
  }

  async fn attach_disk(
    &self,
    node: &NodeId,
    disk: &VolumeId,
    device_name: &str,
    mode: DiskMode,
  ) -> Result<Operation> {
    let path = format!("{}/attachDisk", node);
    let body = json!({
      "source": disk.to_string(),
      "deviceName": device_name,
      "mode": mode.as_str(),
      "type": "PERSISTENT",
    });
    self
      .operation(node.project(), Method::POST, &path, &[], Some(body))
      .await
  }

  async fn detach_disk(&self, node: &NodeId, device_name: &str) -> Result<Operation> {
    let path = format!("{}/detachDisk", node);
    let query = [("deviceName", device_name.to_owned())];
    self
      .operation(node.project(), Method::POST, &path, &query, None)
      .await
  }

  async fn get_snapshot(&self, id: &SnapshotId) -> Result<CloudSnapshot> {
    let resource: SnapshotResource = self
      .call(Method::GET, &id.to_string(), &[], None)
      .await?;
    snapshot_from_resource(id.project(), resource)
  }

  async fn list_snapshots(
    &self,
    project: &str,
    source_disk: Option<&VolumeId>,
    max_results: Option<u32>,
    page_token: Option<&str>,
  ) -> Result<Page<CloudSnapshot>> {
    let path = format!("projects/{}/global/snapshots", project);
    let mut query = page_query(max_results, page_token);
    if let Some(source) = source_disk {
      query.push(("filter", format!("sourceDisk = \"*{}\"", source)));
    }

    let list: SnapshotList = self.call(Method::GET, &path, &query, None).await?;
    let items = list
      .items
      .into_iter()
      .map(|s| snapshot_from_resource(project, s))
      .collect::<Result<_>>()?;

    Ok(Page {
      items,
      next_token: list.next_page_token,
    })
  }

  async fn create_snapshot(&self, id: &SnapshotId, source: &VolumeId) -> Result<Operation> {
    let path = format!("projects/{}/global/snapshots", id.project());
    let body = json!({
      "name": id.name(),
      "sourceDisk": source.to_string(),
    });
    self
      .operation(id.project(), Method::POST, &path, &[], Some(body))
      .await
  }

  async fn delete_snapshot(&self, id: &SnapshotId) -> Result<Operation> {
    self
      .operation(id.project(), Method::DELETE, &id.to_string(), &[], None)
      .await
  }

  async fn get_operation(&self, operation: &Operation) -> Result<Operation> {
    let project = &operation.project;
    let path = match &operation.scope {
      OperationScope::Zone(zone) => {
        format!("projects/{}/zones/{}/operations/{}", project, zone, operation.name)
      }
      OperationScope::Region(region) => format!(
        "projects/{}/regions/{}/operations/{}",
        project, region, operation.name
      ),
      OperationScope::Global => {
        format!("projects/{}/global/operations/{}", project, operation.name)
      }
    };

    self.operation(project, Method::GET, &path, &[], None).await
  }

  async fn region_quotas(&self, project: &str, region: &str) -> Result<Vec<Quota>> {
    let path = format!("projects/{}/regions/{}", project, region);
    let resource: RegionResource = self.call(Method::GET, &path, &[], None).await?;

    Ok(
      resource
        .quotas
        .into_iter()
        .map(|q| Quota {
          metric: q.metric,
          limit: q.limit,
          usage: q.usage,
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test]
  fn parses_zonal_disk() {
    let resource: DiskResource = serde_json::from_value(json!({
      "name": "pvc-1",
      "sizeGb": "10",
      "type": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/diskTypes/pd-ssd",
      "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a",
      "sourceSnapshot": "https://www.googleapis.com/compute/v1/projects/p/global/snapshots/snap",
      "labels": { "team": "storage" },
      "users": [
        "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/instances/node-1"
      ]
    }))
    .unwrap();

    let disk = disk_from_resource("p", resource).unwrap();
    assert_eq!(disk.id, VolumeId::zonal("p", "us-central1-a", "pvc-1"));
    assert_eq!(disk.size_gb, 10);
    assert_eq!(disk.disk_type, "pd-ssd");
    assert_eq!(
      disk.source,
      Some(DiskSource::Snapshot(SnapshotId::new("p", "snap")))
    );
    assert_eq!(disk.users, vec![NodeId::new("p", "us-central1-a", "node-1")]);
  }

  #[test]
  fn parses_regional_disk() {
    let resource: DiskResource = serde_json::from_value(json!({
      "name": "pvc-2",
      "sizeGb": 200,
      "type": "projects/p/regions/us-central1/diskTypes/pd-standard",
      "region": "projects/p/regions/us-central1",
      "replicaZones": [
        "projects/p/zones/us-central1-a",
        "projects/p/zones/us-central1-b"
      ]
    }))
    .unwrap();

    let disk = disk_from_resource("p", resource).unwrap();
    assert!(disk.id.is_regional());
    assert_eq!(disk.size_gb, 200);
    assert_eq!(disk.replica_zones, vec!["us-central1-a", "us-central1-b"]);
  }

  #[test]
  fn finished_operation_carries_error() {
    let resource: OperationResource = serde_json::from_value(json!({
      "name": "operation-1",
      "status": "DONE",
      "zone": "projects/p/zones/z",
      "error": { "errors": [{ "code": "QUOTA_EXCEEDED", "message": "Quota 'SSD_TOTAL_GB' exceeded" }] }
    }))
    .unwrap();

    let op = operation_from_resource("p", resource);
    assert_eq!(op.scope, OperationScope::Zone("z".into()));
    assert!(matches!(
      op.status,
      OperationStatus::Done(Some(CloudError::RateLimited(_)))
    ));
  }

  #[test]
  fn global_operation_in_progress() {
    let resource: OperationResource = serde_json::from_value(json!({
      "name": "operation-2",
      "status": "RUNNING"
    }))
    .unwrap();

    let op = operation_from_resource("p", resource);
    assert_eq!(op.scope, OperationScope::Global);
    assert_eq!(op.status, OperationStatus::Running);
  }

  #[test]
  fn parses_snapshot() {
    let resource: SnapshotResource = serde_json::from_value(json!({
      "name": "snap",
      "sourceDisk": "https://www.googleapis.com/compute/v1/projects/p/zones/z/disks/d",
      "diskSizeGb": "10",
      "creationTimestamp": "2021-03-04T05:06:07.890-08:00",
      "status": "UPLOADING"
    }))
    .unwrap();

    let snapshot = snapshot_from_resource("p", resource).unwrap();
    assert_eq!(snapshot.source_disk, VolumeId::zonal("p", "z", "d"));
    assert_eq!(snapshot.status, SnapshotStatus::Uploading);
    assert!(snapshot.created_at.is_some());
  }

  #[test_case(StatusCode::NOT_FOUND, "" => CloudError::NotFound("404 Not Found: ".into()) ; "not found")]
  #[test_case(StatusCode::SERVICE_UNAVAILABLE, "down" => CloudError::Transient("503 Service Unavailable: down".into()) ; "unavailable")]
  #[test_case(
    StatusCode::FORBIDDEN,
    r#"{"error":{"message":"slow down","errors":[{"reason":"rateLimitExceeded"}]}}"#
    => CloudError::RateLimited("403 Forbidden: slow down".into()) ; "rate limited")]
  #[test_case(
    StatusCode::FORBIDDEN,
    r#"{"error":{"message":"denied","errors":[{"reason":"forbidden"}]}}"#
    => CloudError::Internal("403 Forbidden: denied".into()) ; "forbidden")]
  fn maps_status(status: StatusCode, body: &str) -> CloudError {
    status_error(status, body)
  }

  #[test]
  fn insert_body_for_regional_clone() {
    let spec = DiskSpec {
      id: VolumeId::regional("p", "us-central1", "d"),
      size_gb: 200,
      disk_type: "pd-ssd".into(),
      replica_zones: vec!["us-central1-a".into(), "us-central1-b".into()],
      source: Some(DiskSource::Disk(VolumeId::regional("p", "us-central1", "src"))),
      kms_key: Some("key".into()),
      labels: BTreeMap::new(),
      description: "Disk created by the CSI driver".into(),
    };

    let body = insert_body(&spec);
    assert_eq!(body["sizeGb"], "200");
    assert_eq!(body["type"], "projects/p/regions/us-central1/diskTypes/pd-ssd");
    assert_eq!(body["replicaZones"][1], "projects/p/zones/us-central1-b");
    assert_eq!(body["sourceDisk"], "projects/p/regions/us-central1/disks/src");
    assert_eq!(body["diskEncryptionKey"]["kmsKeyName"], "key");
    assert!(body.get("labels").is_none());
  }
}
