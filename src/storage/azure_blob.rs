use std::{num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use azure_core::{error::ErrorKind, request_options::MaxResults, StatusCode};
use azure_storage::{CloudLocation, StorageCredentials};
use azure_storage_blobs::prelude::{BlobServiceClient, ClientBuilder, ContainerClient};
use bytes::Bytes;

use super::{
  pagination::{any_item, drain_stream},
  DeleteReport, Storage,
};
use crate::{
  error::{Operation, Result, StorageError, Target},
  util::{unique_keys, with_deadline},
};

/// Azure Blob Storage adapter. Buckets map to containers, objects to block blobs.
///
/// Clients are cheap clones over a shared pipeline and safe to use from
/// concurrent callers.
pub struct AzureBlobStorage {
  service: BlobServiceClient,
  storage_account: String,
  deadline: Duration,
}

impl AzureBlobStorage {
  /// `endpoint` replaces the public-cloud blob endpoint of the account, e.g.
  /// for sovereign clouds or a local emulator.
  pub fn new(
    storage_account: &str,
    credentials: StorageCredentials,
    endpoint: Option<&str>,
    deadline: Duration,
  ) -> Self {
    let location = match endpoint {
      Some(uri) => CloudLocation::Custom { account: storage_account.to_string(), uri: uri.to_string() },
      None => CloudLocation::Public { account: storage_account.to_string() },
    };
    tracing::info!(endpoint = ?endpoint, "Initializing Azure Blob storage provider with account: {}", storage_account);
    AzureBlobStorage {
      service: ClientBuilder::with_location(location, credentials).blob_service_client(),
      storage_account: storage_account.to_string(),
      deadline,
    }
  }

  pub fn storage_account(&self) -> &str {
    &self.storage_account
  }

  fn container(&self, bucket: &str) -> ContainerClient {
    self.service.container_client(bucket)
  }

  async fn delete_one(&self, bucket: &str, key: &str) -> Result<()> {
    let target = Target::object(bucket, key);
    with_deadline(self.deadline, Operation::DeleteObject, target.clone(), async {
      self.container(bucket).blob_client(key).delete().await.map_err(azure_error(Operation::DeleteObject, target.clone()))?;
      Ok(())
    })
    .await
  }
}

#[async_trait]
impl Storage for AzureBlobStorage {
  async fn create_bucket(&self, bucket: &str) -> Result<()> {
    let target = Target::bucket(bucket);
    tracing::debug!(bucket, storage_account = %self.storage_account, "creating Azure container");
    with_deadline(self.deadline, Operation::CreateBucket, target.clone(), async {
      self.container(bucket).create().await.map_err(azure_error(Operation::CreateBucket, target.clone()))?;
      Ok(())
    })
    .await
    .inspect_err(|err| {
      tracing::warn!(bucket, storage_account = %self.storage_account, "Couldn't create container: {}", err)
    })
  }

  async fn list_buckets(&self) -> Result<Vec<String>> {
    let target = Target::account();
    with_deadline(self.deadline, Operation::ListBuckets, target.clone(), async {
      let pages = self.service.list_containers().into_stream();
      drain_stream(pages, |page| page.containers.into_iter().map(|container| container.name).collect())
        .await
        .map_err(azure_error(Operation::ListBuckets, target.clone()))
    })
    .await
  }

  async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
    let target = Target::bucket(bucket);
    with_deadline(self.deadline, Operation::ListBucketContent, target.clone(), async {
      let mut request = self.container(bucket).list_blobs();
      if let Some(prefix) = prefix {
        request = request.prefix(prefix.to_string());
      }
      drain_stream(request.into_stream(), |page| page.blobs.blobs().map(|blob| blob.name.clone()).collect())
        .await
        .map_err(azure_error(Operation::ListBucketContent, target.clone()))
    })
    .await
  }

  /// Azure would delete a container together with its blobs, so emptiness is
  /// checked first to keep the non-recursive contract. Empty pages with a
  /// continuation marker are followed until a blob shows up or the listing ends.
  async fn delete_bucket(&self, bucket: &str) -> Result<()> {
    let target = Target::bucket(bucket);
    with_deadline(self.deadline, Operation::DeleteBucket, target.clone(), async {
      let container = self.container(bucket);
      let pages = container.list_blobs().max_results(MaxResults::new(NonZeroU32::MIN)).into_stream();
      let occupied = any_item(pages, |page| page.blobs.blobs().next().is_some())
        .await
        .map_err(azure_error(Operation::DeleteBucket, target.clone()))?;
      if occupied {
        return Err(StorageError::Conflict {
          operation: Operation::DeleteBucket,
          target: target.clone(),
          message: "container is not empty".to_string(),
        });
      }
      container.delete().await.map_err(azure_error(Operation::DeleteBucket, target.clone()))?;
      Ok(())
    })
    .await
  }

  async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
    let target = Target::object(bucket, key);
    tracing::debug!(bucket, key, bytes = data.len(), "uploading Azure block blob");
    with_deadline(self.deadline, Operation::StoreObject, target.clone(), async {
      self
        .container(bucket)
        .blob_client(key)
        .put_block_blob(data)
        .await
        .map_err(azure_error(Operation::StoreObject, target.clone()))?;
      Ok(())
    })
    .await
  }

  async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
    let target = Target::object(bucket, key);
    with_deadline(self.deadline, Operation::RetrieveObject, target.clone(), async {
      let content = self
        .container(bucket)
        .blob_client(key)
        .get_content()
        .await
        .map_err(azure_error(Operation::RetrieveObject, target.clone()))?;
      Ok(Bytes::from(content))
    })
    .await
  }

  /// Blob deletes are per key; every key is attempted and reported.
  async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport> {
    let mut report = DeleteReport::default();
    for key in unique_keys(keys) {
      let outcome = self.delete_one(bucket, &key).await;
      report.record(key, outcome);
    }
    Ok(report)
  }

  fn provider_name(&self) -> &'static str {
    "Azure Blob Storage"
  }
}

fn azure_error(operation: Operation, target: Target) -> impl FnOnce(azure_core::Error) -> StorageError {
  move |err| {
    let (status, code) = match err.kind() {
      ErrorKind::HttpResponse { status, error_code } => (status_code(status), error_code.clone()),
      _ => (None, None),
    };
    classify(code.as_deref(), status, operation, target, err.to_string())
  }
}

fn status_code(status: &StatusCode) -> Option<u16> {
  match status {
    StatusCode::NotFound => Some(404),
    StatusCode::Conflict => Some(409),
    _ => None,
  }
}

fn classify(
  code: Option<&str>,
  status: Option<u16>,
  operation: Operation,
  target: Target,
  message: String,
) -> StorageError {
  match code {
    Some("ContainerNotFound" | "BlobNotFound" | "ResourceNotFound") => {
      StorageError::NotFound { operation, target, message }
    }
    Some("ContainerAlreadyExists" | "ContainerBeingDeleted" | "BlobAlreadyExists") => {
      StorageError::Conflict { operation, target, message }
    }
    _ => StorageError::from_status(status, operation, target, message),
  }
}
