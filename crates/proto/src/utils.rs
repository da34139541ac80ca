use crate::Error;
use std::{fmt, future::Future, path::PathBuf, time::Duration};
use tracing::{field, Span};

pub(crate) trait Record: Sized {
  fn record_field(self, field: &'static str) -> Self;

  #[inline]
  fn record_request(self) -> Self {
    self.record_field("request")
  }

  #[inline]
  fn record_response(self) -> Self {
    self.record_field("response")
  }
}

impl<T: fmt::Debug> Record for T {
  #[inline]
  fn record_field(self, field: &'static str) -> Self {
    Span::current().record(field, &field::debug(&self));
    self
  }
}

#[inline]
pub(crate) fn record_request<T: fmt::Debug>(request: T) -> T {
  request.record_request()
}

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Reads the caller supplied deadline from the `grpc-timeout` header.
pub(crate) fn request_timeout(metadata: &tonic::metadata::MetadataMap) -> Option<Duration> {
  metadata
    .get(GRPC_TIMEOUT_HEADER)
    .and_then(|v| v.to_str().ok())
    .and_then(parse_grpc_timeout)
}

fn parse_grpc_timeout(value: &str) -> Option<Duration> {
  if value.len() < 2 || value.len() > 9 {
    return None;
  }

  let (amount, unit) = value.split_at(value.len() - 1);
  let amount: u64 = amount.parse().ok()?;
  let duration = match unit {
    "H" => Duration::from_secs(amount * 60 * 60),
    "M" => Duration::from_secs(amount * 60),
    "S" => Duration::from_secs(amount),
    "m" => Duration::from_millis(amount),
    "u" => Duration::from_micros(amount),
    "n" => Duration::from_nanos(amount),
    _ => return None,
  };

  Some(duration)
}

/// Bounds `fut` by the caller deadline. Dropping the inner future on expiry
/// runs the destructors of anything it holds, operation locks included.
pub(crate) async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, Error>
where
  F: Future<Output = Result<T, Error>>,
{
  match timeout {
    None => fut.await,
    Some(timeout) => match tokio::time::timeout(timeout, fut).await {
      Ok(result) => result,
      Err(_) => Err(Error::DeadlineExceeded(format!(
        "request deadline of {:?} exceeded",
        timeout
      ))),
    },
  }
}

pub(crate) fn require_non_empty(value: String, error: &'static str) -> Result<String, tonic::Status> {
  if value.is_empty() {
    Err(tonic::Status::invalid_argument(error))
  } else {
    Ok(value)
  }
}

pub(crate) fn optional(value: String) -> Option<String> {
  if value.is_empty() {
    None
  } else {
    Some(value)
  }
}

pub(crate) fn absolute_path(value: String, field: &'static str) -> Result<PathBuf, tonic::Status> {
  if value.is_empty() {
    return Err(tonic::Status::invalid_argument(format!("{} is empty", field)));
  }

  match PathBuf::from(value) {
    v if !v.is_absolute() => Err(tonic::Status::invalid_argument(format!(
      "{} is not absolute",
      field
    ))),
    v => Ok(v),
  }
}

pub(crate) fn optional_absolute_path(
  value: String,
  field: &'static str,
) -> Result<Option<PathBuf>, tonic::Status> {
  if value.is_empty() {
    Ok(None)
  } else {
    absolute_path(value, field).map(Some)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case("1S" => Some(Duration::from_secs(1)) ; "seconds")]
  #[test_case("250m" => Some(Duration::from_millis(250)) ; "millis")]
  #[test_case("2M" => Some(Duration::from_secs(120)) ; "minutes")]
  #[test_case("10x" => None ; "bad unit")]
  #[test_case("S" => None ; "missing amount")]
  #[test_case("1234567890S" => None ; "too long")]
  fn grpc_timeout(value: &str) -> Option<Duration> {
    parse_grpc_timeout(value)
  }

  #[tokio::test]
  async fn timeout_maps_to_deadline_exceeded() {
    let result: Result<(), Error> = with_timeout(Some(Duration::from_millis(5)), async {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok(())
    })
    .await;

    assert!(matches!(result, Err(Error::DeadlineExceeded(_))));
  }
}
