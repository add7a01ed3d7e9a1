use std::sync::Arc;

use super::{AmbientCredentials, AwsS3Storage, AzureBlobStorage, CredentialResolver, GcsStorage, Storage};
use crate::{
  config::{StorageConfig, StorageKind},
  error::Result,
};

/// Builds the adapter selected by `config`, using ambient credentials.
pub async fn new_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
  new_storage_with(config, &AmbientCredentials).await
}

/// Builds the adapter selected by `config`.
///
/// The configuration is validated before `resolver` is consulted, so a missing
/// identifier fails with `Configuration` without any credential lookup or
/// network traffic. A credential failure comes back as `Authentication`.
pub async fn new_storage_with<R>(config: &StorageConfig, resolver: &R) -> Result<Arc<dyn Storage>>
where
  R: CredentialResolver + ?Sized,
{
  config.validate()?;
  let deadline = config.operation_timeout();

  match config.storage_kind {
    StorageKind::S3 => {
      let s3_config = resolver.aws(config.location()).await?;
      Ok(Arc::new(AwsS3Storage::new(s3_config, deadline)))
    }
    StorageKind::Gcp => {
      let project_id = config.required_project_id()?;
      let client_config = resolver.gcp(config.gcp_credentials_file.as_deref()).await?;
      let mut storage = GcsStorage::new(client_config, project_id, deadline);
      if let Some(location) = config.location() {
        storage = storage.with_default_location(location);
      }
      Ok(Arc::new(storage))
    }
    StorageKind::Azure => {
      let storage_account = config.required_storage_account()?;
      let credentials = resolver.azure(storage_account).await?;
      Ok(Arc::new(AzureBlobStorage::new(storage_account, credentials, config.location(), deadline)))
    }
  }
}
