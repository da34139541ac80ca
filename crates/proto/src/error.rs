use thiserror::Error;
use tonic::{Code, Status};

pub type Result<T> = std::result::Result<T, Error>;

/// Status taxonomy shared by every service method. Each variant maps to
/// exactly one gRPC status code.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  #[error("{0}")]
  InvalidArgument(String),

  #[error("{0}")]
  NotFound(String),

  /// A resource with the same name exists but is incompatible with the request.
  #[error("{0}")]
  AlreadyExists(String),

  /// The request is valid but illegal in the current state of the resource.
  #[error("{0}")]
  FailedPrecondition(String),

  /// Another operation holds the resource. The caller should retry later.
  #[error("{0}")]
  Aborted(String),

  #[error("{0}")]
  ResourceExhausted(String),

  #[error("{0}")]
  OutOfRange(String),

  #[error("{0}")]
  DeadlineExceeded(String),

  #[error("{0}")]
  Unimplemented(String),

  #[error("{0}")]
  Internal(String),
}

impl Error {
  pub fn code(&self) -> Code {
    match self {
      Error::InvalidArgument(_) => Code::InvalidArgument,
      Error::NotFound(_) => Code::NotFound,
      Error::AlreadyExists(_) => Code::AlreadyExists,
      Error::FailedPrecondition(_) => Code::FailedPrecondition,
      Error::Aborted(_) => Code::Aborted,
      Error::ResourceExhausted(_) => Code::ResourceExhausted,
      Error::OutOfRange(_) => Code::OutOfRange,
      Error::DeadlineExceeded(_) => Code::DeadlineExceeded,
      Error::Unimplemented(_) => Code::Unimplemented,
      Error::Internal(_) => Code::Internal,
    }
  }

  pub fn invalid_argument(msg: impl Into<String>) -> Self {
    Error::InvalidArgument(msg.into())
  }

  pub fn not_found(msg: impl Into<String>) -> Self {
    Error::NotFound(msg.into())
  }

  pub fn failed_precondition(msg: impl Into<String>) -> Self {
    Error::FailedPrecondition(msg.into())
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Error::Internal(msg.into())
  }
}

impl From<Error> for Status {
  fn from(value: Error) -> Status {
    let code = value.code();
    Status::new(code, value.to_string())
  }
}

impl From<Status> for Error {
  fn from(value: Status) -> Error {
    let message = value.message().to_owned();
    match value.code() {
      Code::InvalidArgument => Error::InvalidArgument(message),
      Code::NotFound => Error::NotFound(message),
      Code::AlreadyExists => Error::AlreadyExists(message),
      Code::FailedPrecondition => Error::FailedPrecondition(message),
      Code::Aborted => Error::Aborted(message),
      Code::ResourceExhausted => Error::ResourceExhausted(message),
      Code::OutOfRange => Error::OutOfRange(message),
      Code::DeadlineExceeded => Error::DeadlineExceeded(message),
      Code::Unimplemented => Error::Unimplemented(message),
      _ => Error::Internal(message),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case(Error::InvalidArgument("x".into()) => Code::InvalidArgument)]
  #[test_case(Error::AlreadyExists("x".into()) => Code::AlreadyExists)]
  #[test_case(Error::Aborted("x".into()) => Code::Aborted)]
  #[test_case(Error::DeadlineExceeded("x".into()) => Code::DeadlineExceeded)]
  fn maps_to_status_code(error: Error) -> Code {
    Status::from(error).code()
  }

  #[test]
  fn unknown_status_becomes_internal() {
    let err = Error::from(Status::new(Code::DataLoss, "gone"));
    assert_eq!(err, Error::Internal("gone".into()));
  }
}
