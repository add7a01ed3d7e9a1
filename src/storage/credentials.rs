//! Credential bootstrap for the three backends.
//!
//! Adapters never discover credentials on their own; the factory asks a
//! [`CredentialResolver`] once, at construction time, and only after the
//! configuration has been validated.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion};
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::{config::Region, error::DisplayErrorContext};
use azure_core::auth::TokenCredential;
use azure_storage::StorageCredentials;
use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::ClientConfig;

use crate::error::{Result, StorageError};

pub const DEFAULT_AWS_REGION: &str = "us-east-1";

const AZURE_STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

#[async_trait]
pub trait CredentialResolver: Send + Sync {
  /// A ready S3 client configuration. `region` overrides the ambient region.
  async fn aws(&self, region: Option<&str>) -> Result<aws_sdk_s3::Config>;

  /// A GCS client configuration, optionally from an explicit service account key file.
  async fn gcp(&self, credentials_file: Option<&Path>) -> Result<ClientConfig>;

  async fn azure(&self, storage_account: &str) -> Result<StorageCredentials>;
}

/// Resolves credentials from each vendor's standard environment discovery.
///
/// Credentials are fetched eagerly so that a misconfigured environment fails
/// construction instead of the first request.
#[derive(Clone, Copy, Debug, Default)]
pub struct AmbientCredentials;

#[async_trait]
impl CredentialResolver for AmbientCredentials {
  async fn aws(&self, region: Option<&str>) -> Result<aws_sdk_s3::Config> {
    let region = RegionProviderChain::first_try(region.map(|region| Region::new(region.to_string())))
      .or_default_provider()
      .or_else(Region::from_static(DEFAULT_AWS_REGION));
    let shared = aws_config::defaults(BehaviorVersion::latest()).region(region).load().await;

    let provider = shared
      .credentials_provider()
      .ok_or_else(|| StorageError::authentication("AWS S3", "no credentials provider in the default chain"))?;
    provider
      .provide_credentials()
      .await
      .map_err(|err| StorageError::authentication("AWS S3", DisplayErrorContext(&err)))?;

    Ok(aws_sdk_s3::config::Builder::from(&shared).build())
  }

  async fn gcp(&self, credentials_file: Option<&Path>) -> Result<ClientConfig> {
    let config = match credentials_file {
      Some(path) => {
        let credentials = CredentialsFile::new_from_file(path.to_string_lossy().into_owned())
          .await
          .map_err(|err| StorageError::authentication("Google Cloud Storage", err))?;
        ClientConfig::default().with_credentials(credentials).await
      }
      None => ClientConfig::default().with_auth().await,
    };
    config.map_err(|err| StorageError::authentication("Google Cloud Storage", err))
  }

  async fn azure(&self, storage_account: &str) -> Result<StorageCredentials> {
    let credential: Arc<dyn TokenCredential> =
      azure_identity::create_credential().map_err(|err| StorageError::authentication("Azure Blob Storage", err))?;
    credential
      .get_token(&[AZURE_STORAGE_SCOPE])
      .await
      .map_err(|err| StorageError::authentication("Azure Blob Storage", err))?;
    tracing::debug!(storage_account, "resolved Azure token credential");
    Ok(StorageCredentials::token_credential(credential))
  }
}
