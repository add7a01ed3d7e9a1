//! In-process storage honoring the same contract as the cloud adapters.
//!
//! Useful for exercising caller code without credentials. Listings are served
//! in pages of a configurable size and drained exactly like the remote ones.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{
  pagination::{drain_pages, Page},
  DeleteReport, Storage,
};
use crate::{
  error::{Operation, Result, StorageError, Target},
  util::unique_keys,
};

const DEFAULT_PAGE_SIZE: usize = 1000;

type Bucket = BTreeMap<String, Bytes>;

pub struct MemoryStorage {
  buckets: RwLock<BTreeMap<String, Bucket>>,
  page_size: usize,
}

impl MemoryStorage {
  pub fn new() -> Self {
    MemoryStorage { buckets: RwLock::new(BTreeMap::new()), page_size: DEFAULT_PAGE_SIZE }
  }

  /// Serves listings in pages of `page_size` entries (at least one).
  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  async fn bucket_names_page(&self, after: Option<String>) -> Result<Page<String>> {
    let buckets = self.buckets.read().await;
    Ok(page_after(buckets.keys(), after, self.page_size))
  }

  async fn object_keys_page(&self, bucket: &str, prefix: Option<&str>, after: Option<String>) -> Result<Page<String>> {
    let buckets = self.buckets.read().await;
    let objects = buckets.get(bucket).ok_or_else(|| missing_bucket(Operation::ListBucketContent, bucket))?;
    let keys = objects.keys().filter(|key| prefix.map_or(true, |prefix| key.starts_with(prefix)));
    Ok(page_after(keys, after, self.page_size))
  }
}

impl Default for MemoryStorage {
  fn default() -> Self {
    Self::new()
  }
}

/// The next `page_size` names strictly after `after`; the token is the last name returned.
fn page_after<'a>(names: impl Iterator<Item = &'a String>, after: Option<String>, page_size: usize) -> Page<String> {
  let mut remaining = names.filter(|name| after.as_ref().map_or(true, |after| name.as_str() > after.as_str()));
  let items: Vec<String> = remaining.by_ref().take(page_size).cloned().collect();
  let next_token = match (remaining.next(), items.last()) {
    (Some(_), Some(last)) => Some(last.clone()),
    _ => None,
  };
  Page::new(items, next_token)
}

fn missing_bucket(operation: Operation, bucket: &str) -> StorageError {
  StorageError::NotFound { operation, target: Target::bucket(bucket), message: "bucket does not exist".to_string() }
}

#[async_trait]
impl Storage for MemoryStorage {
  async fn create_bucket(&self, bucket: &str) -> Result<()> {
    let mut buckets = self.buckets.write().await;
    if buckets.contains_key(bucket) {
      return Err(StorageError::Conflict {
        operation: Operation::CreateBucket,
        target: Target::bucket(bucket),
        message: "bucket already exists".to_string(),
      });
    }
    buckets.insert(bucket.to_string(), Bucket::new());
    Ok(())
  }

  async fn list_buckets(&self) -> Result<Vec<String>> {
    drain_pages(|after| self.bucket_names_page(after)).await
  }

  async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
    drain_pages(|after| self.object_keys_page(bucket, prefix, after)).await
  }

  async fn delete_bucket(&self, bucket: &str) -> Result<()> {
    let mut buckets = self.buckets.write().await;
    match buckets.get(bucket) {
      None => Err(missing_bucket(Operation::DeleteBucket, bucket)),
      Some(objects) if !objects.is_empty() => Err(StorageError::Conflict {
        operation: Operation::DeleteBucket,
        target: Target::bucket(bucket),
        message: format!("bucket still holds {} objects", objects.len()),
      }),
      Some(_) => {
        buckets.remove(bucket);
        Ok(())
      }
    }
  }

  async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
    let mut buckets = self.buckets.write().await;
    let objects = buckets.get_mut(bucket).ok_or_else(|| missing_bucket(Operation::StoreObject, bucket))?;
    objects.insert(key.to_string(), data);
    Ok(())
  }

  async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
    let buckets = self.buckets.read().await;
    let objects = buckets.get(bucket).ok_or_else(|| missing_bucket(Operation::RetrieveObject, bucket))?;
    objects.get(key).cloned().ok_or_else(|| StorageError::NotFound {
      operation: Operation::RetrieveObject,
      target: Target::object(bucket, key),
      message: "object does not exist".to_string(),
    })
  }

  /// Absent keys are reported as `NotFound`, like GCS and Azure do.
  async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport> {
    let mut buckets = self.buckets.write().await;
    let objects = buckets.get_mut(bucket).ok_or_else(|| missing_bucket(Operation::DeleteObject, bucket))?;
    let mut report = DeleteReport::default();
    for key in unique_keys(keys) {
      let outcome = match objects.remove(&key) {
        Some(_) => Ok(()),
        None => Err(StorageError::NotFound {
          operation: Operation::DeleteObject,
          target: Target::object(bucket, &key),
          message: "object does not exist".to_string(),
        }),
      };
      report.record(key, outcome);
    }
    Ok(report)
  }

  fn provider_name(&self) -> &'static str {
    "memory"
  }
}
