use std::{path::PathBuf, time::Duration};

use clap::{Args, ValueEnum};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Default per-operation deadline applied to every remote call.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 50;

#[derive(Clone, Debug, Args, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
  /// Storage backend: "s3", "gcp" or "azure".
  #[clap(long, env = "STORAGE_KIND")]
  pub storage_kind: StorageKind,
  /// GCP project ID (required when using GCP)
  #[clap(long, env = "GCP_PROJECT_ID")]
  pub project_id: Option<String>,
  /// GCP service account key path (optional, ambient credentials otherwise)
  #[clap(long, env = "GCP_SERVICE_ACCOUNT_KEY_PATH")]
  pub gcp_credentials_file: Option<PathBuf>,
  /// Azure storage account name (required when using Azure)
  #[clap(long, env = "AZURE_STORAGE_ACCOUNT")]
  pub storage_account: Option<String>,
  /// Provider-specific location: S3 region, GCP bucket location or Azure blob endpoint.
  #[clap(long, env = "STORAGE_LOCATION")]
  pub location: Option<String>,
  /// Deadline for a single remote operation, in seconds.
  #[clap(long, env = "STORAGE_OPERATION_TIMEOUT", default_value_t = DEFAULT_OPERATION_TIMEOUT_SECS)]
  #[serde(default = "default_operation_timeout_secs")]
  pub operation_timeout_secs: u64,
}

fn default_operation_timeout_secs() -> u64 {
  DEFAULT_OPERATION_TIMEOUT_SECS
}

impl StorageConfig {
  fn new(storage_kind: StorageKind) -> Self {
    StorageConfig {
      storage_kind,
      project_id: None,
      gcp_credentials_file: None,
      storage_account: None,
      location: None,
      operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
    }
  }

  /// S3 resolves its region from the ambient environment unless a location is set.
  pub fn s3() -> Self {
    Self::new(StorageKind::S3)
  }

  pub fn gcp(project_id: impl Into<String>) -> Self {
    StorageConfig { project_id: Some(project_id.into()), ..Self::new(StorageKind::Gcp) }
  }

  pub fn azure(storage_account: impl Into<String>) -> Self {
    StorageConfig { storage_account: Some(storage_account.into()), ..Self::new(StorageKind::Azure) }
  }

  pub fn with_location(mut self, location: impl Into<String>) -> Self {
    self.location = Some(location.into());
    self
  }

  pub fn with_gcp_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.gcp_credentials_file = Some(path.into());
    self
  }

  /// Sub-second remainders round up to the next whole second.
  pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
    self.operation_timeout_secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    self
  }

  pub fn operation_timeout(&self) -> Duration {
    Duration::from_secs(self.operation_timeout_secs)
  }

  /// Checks the identifiers each backend requires. Never touches the network.
  pub fn validate(&self) -> Result<()> {
    match self.storage_kind {
      StorageKind::S3 => {}
      StorageKind::Gcp => {
        self.required_project_id()?;
      }
      StorageKind::Azure => {
        self.required_storage_account()?;
      }
    }
    if self.location.as_deref().is_some_and(|location| location.trim().is_empty()) {
      return Err(StorageError::configuration("STORAGE_LOCATION must not be blank when set"));
    }
    if self.operation_timeout_secs == 0 {
      return Err(StorageError::configuration("STORAGE_OPERATION_TIMEOUT must be at least one second"));
    }
    Ok(())
  }

  pub fn required_project_id(&self) -> Result<&str> {
    required(&self.project_id, "GCP_PROJECT_ID required when using the GCP storage provider")
  }

  pub fn required_storage_account(&self) -> Result<&str> {
    required(&self.storage_account, "AZURE_STORAGE_ACCOUNT required when using the Azure storage provider")
  }

  /// The location override, trimmed, if one was given.
  pub fn location(&self) -> Option<&str> {
    self.location.as_deref().map(str::trim)
  }
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str> {
  match value.as_deref().map(str::trim) {
    Some(value) if !value.is_empty() => Ok(value),
    _ => Err(StorageError::configuration(message)),
  }
}

#[derive(Clone, Copy, ValueEnum, Debug, Display, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  #[display("s3")]
  #[value(name = "s3", alias = "aws")]
  S3,
  #[display("gcp")]
  #[value(name = "gcp", alias = "gcs")]
  Gcp,
  #[display("azure")]
  #[value(name = "azure")]
  Azure,
}
