//! The provider-neutral storage contract and its adapters.
//!
//! Every adapter implements [`Storage`] with the same observable behavior:
//! listings are fully drained before they are returned, file transfers are
//! whole-file and validated locally before any remote call, every remote call
//! runs under a fixed deadline, and backend failures are normalized into
//! [`StorageError`](crate::StorageError). Nothing here retries.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, StorageError};

pub mod aws_s3;
pub mod azure_blob;
pub mod credentials;
pub mod factory;
pub mod gcs;
pub mod memory;
pub mod pagination;
pub mod transfer;

pub use aws_s3::AwsS3Storage;
pub use azure_blob::AzureBlobStorage;
pub use credentials::{AmbientCredentials, CredentialResolver};
pub use factory::{new_storage, new_storage_with};
pub use gcs::GcsStorage;
pub use memory::MemoryStorage;

/// Bucket and object operations shared by all backends.
///
/// Implementations must be `Send + Sync`; each documents whether a single
/// instance may be shared between concurrent callers.
#[async_trait]
pub trait Storage: Send + Sync {
  /// Creating a bucket that already exists is backend-specific: most backends
  /// fail with `Conflict`, S3 in `us-east-1` accepts it for the owner.
  async fn create_bucket(&self, bucket: &str) -> Result<()>;

  /// Every bucket visible to the configured account, in backend order.
  async fn list_buckets(&self) -> Result<Vec<String>>;

  /// Keys in `bucket`, optionally restricted to those starting with `prefix`.
  async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>>;

  async fn list_bucket_content(&self, bucket: &str) -> Result<Vec<String>> {
    self.list_objects(bucket, None).await
  }

  /// Fails with `Conflict` if the bucket still holds objects.
  async fn delete_bucket(&self, bucket: &str) -> Result<()>;

  async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()>;

  async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

  /// Uploads the whole file at `source`. The file is read before the backend is contacted.
  async fn store_object(&self, bucket: &str, key: &str, source: &Path) -> Result<()> {
    let data = transfer::read_source(source).await?;
    self.put_object(bucket, key, data).await
  }

  /// Downloads an object into `destination`, replacing it. On a remote failure
  /// the destination is left untouched; no empty file is created.
  async fn retrieve_object(&self, bucket: &str, key: &str, destination: &Path) -> Result<()> {
    transfer::check_sink(destination).await?;
    let data = self.get_object(bucket, key).await?;
    transfer::write_sink(destination, &data).await
  }

  /// Deletes a batch of keys and reports the outcome for each of them.
  ///
  /// The outer `Result` fails only when the batch as a whole could not be
  /// attempted; per-key failures live in the returned report.
  async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport>;

  /// Short provider label, e.g. for logging.
  fn provider_name(&self) -> &'static str;
}

/// Per-key outcome of a batch delete.
#[derive(Debug, Default)]
pub struct DeleteReport {
  pub deleted: Vec<String>,
  pub failed: Vec<DeleteFailure>,
}

#[derive(Debug)]
pub struct DeleteFailure {
  pub key: String,
  pub error: StorageError,
}

impl DeleteReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }

  pub(crate) fn record(&mut self, key: String, outcome: Result<()>) {
    match outcome {
      Ok(()) => self.deleted.push(key),
      Err(error) => {
        tracing::warn!(%key, %error, "failed to delete object");
        self.failed.push(DeleteFailure { key, error });
      }
    }
  }

  /// Collapses the report into the first failure, for callers that want
  /// fail-fast semantics.
  pub fn into_result(self) -> Result<Vec<String>> {
    match self.failed.into_iter().next() {
      Some(failure) => Err(failure.error),
      None => Ok(self.deleted),
    }
  }
}
