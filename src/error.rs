use std::{fmt, path::PathBuf, time::Duration};

use derive_more::Display;
use thiserror::Error;

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// The contract operation an error was raised from.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Operation {
  #[display("create bucket")]
  CreateBucket,
  #[display("list buckets")]
  ListBuckets,
  #[display("list bucket content")]
  ListBucketContent,
  #[display("delete bucket")]
  DeleteBucket,
  #[display("store object")]
  StoreObject,
  #[display("retrieve object")]
  RetrieveObject,
  #[display("delete object")]
  DeleteObject,
}

/// Remote resource an operation was addressing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Target {
  pub bucket: Option<String>,
  pub key: Option<String>,
}

impl Target {
  /// The account-wide scope, used by bucket listing.
  pub fn account() -> Self {
    Self::default()
  }

  pub fn bucket(bucket: &str) -> Self {
    Self { bucket: Some(bucket.to_string()), key: None }
  }

  pub fn object(bucket: &str, key: &str) -> Self {
    Self { bucket: Some(bucket.to_string()), key: Some(key.to_string()) }
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (&self.bucket, &self.key) {
      (Some(bucket), Some(key)) => write!(f, "{bucket}/{key}"),
      (Some(bucket), None) => write!(f, "{bucket}"),
      _ => write!(f, "<account>"),
    }
  }
}

#[derive(Debug, Error)]
pub enum StorageError {
  /// A required identifier is missing; raised before any adapter is built.
  #[error("invalid storage configuration: {0}")]
  Configuration(String),

  /// Ambient credentials could not be resolved while constructing an adapter.
  #[error("{provider} authentication failed: {message}")]
  Authentication { provider: &'static str, message: String },

  #[error("{operation} failed, {target} not found: {message}")]
  NotFound { operation: Operation, target: Target, message: String },

  #[error("{operation} failed, conflict on {target}: {message}")]
  Conflict { operation: Operation, target: Target, message: String },

  /// The local side of a transfer could not be read or written.
  #[error("local transfer failed for {}: {source}", path.display())]
  Transfer {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Opaque passthrough of anything else the backend reported. Never retried here.
  #[error("{operation} failed on {target}: {message}")]
  Backend { operation: Operation, target: Target, message: String },

  #[error("{operation} on {target} timed out after {}s", elapsed.as_secs())]
  Timeout { operation: Operation, target: Target, elapsed: Duration },
}

impl StorageError {
  pub fn configuration(message: impl Into<String>) -> Self {
    StorageError::Configuration(message.into())
  }

  pub fn authentication(provider: &'static str, message: impl ToString) -> Self {
    StorageError::Authentication { provider, message: message.to_string() }
  }

  pub fn transfer(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    StorageError::Transfer { path: path.into(), source }
  }

  /// Maps an HTTP status reported by a backend onto the common error kinds.
  pub fn from_status(status: Option<u16>, operation: Operation, target: Target, message: impl Into<String>) -> Self {
    let message = message.into();
    match status {
      Some(404) => StorageError::NotFound { operation, target, message },
      Some(409) => StorageError::Conflict { operation, target, message },
      _ => StorageError::Backend { operation, target, message },
    }
  }

  /// The same failure re-addressed to a single object, used when one request
  /// failure has to be reported against every key it covered.
  pub(crate) fn for_object(&self, bucket: &str, key: &str) -> StorageError {
    let target = Target::object(bucket, key);
    match self {
      StorageError::NotFound { operation, message, .. } => {
        StorageError::NotFound { operation: *operation, target, message: message.clone() }
      }
      StorageError::Conflict { operation, message, .. } => {
        StorageError::Conflict { operation: *operation, target, message: message.clone() }
      }
      StorageError::Backend { operation, message, .. } => {
        StorageError::Backend { operation: *operation, target, message: message.clone() }
      }
      StorageError::Timeout { operation, elapsed, .. } => {
        StorageError::Timeout { operation: *operation, target, elapsed: *elapsed }
      }
      other => StorageError::Backend { operation: Operation::DeleteObject, target, message: other.to_string() },
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, StorageError::NotFound { .. })
  }

  pub fn is_conflict(&self) -> bool {
    matches!(self, StorageError::Conflict { .. })
  }

  pub fn is_configuration(&self) -> bool {
    matches!(self, StorageError::Configuration(_))
  }
}
