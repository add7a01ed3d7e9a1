use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::buckets::delete::DeleteBucketRequest;
use google_cloud_storage::http::buckets::insert::{BucketCreationConfig, InsertBucketParam, InsertBucketRequest};
use google_cloud_storage::http::buckets::list::ListBucketsRequest;
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::http::Error as GcsHttpError;

use super::{
  pagination::{drain_pages, Page},
  DeleteReport, Storage,
};
use crate::{
  error::{Operation, Result, StorageError, Target},
  util::{unique_keys, with_deadline},
};

/// Location used for new buckets unless overridden.
pub const DEFAULT_GCS_LOCATION: &str = "US-CENTRAL1";

/// Google Cloud Storage adapter, bound to one project.
///
/// The underlying client shares its HTTP pool and token source and is safe to
/// use from concurrent callers.
pub struct GcsStorage {
  client: Client,
  project_id: String,
  location: String,
  deadline: Duration,
}

impl GcsStorage {
  pub fn new(config: ClientConfig, project_id: &str, deadline: Duration) -> Self {
    tracing::info!("Initializing GCS storage provider with project: {}", project_id);
    GcsStorage {
      client: Client::new(config),
      project_id: project_id.to_string(),
      location: DEFAULT_GCS_LOCATION.to_string(),
      deadline,
    }
  }

  /// Overrides the location new buckets are created in.
  pub fn with_default_location(mut self, location: impl Into<String>) -> Self {
    self.location = location.into();
    self
  }

  pub fn project_id(&self) -> &str {
    &self.project_id
  }

  pub fn default_location(&self) -> &str {
    &self.location
  }

  async fn delete_one(&self, bucket: &str, key: &str) -> Result<()> {
    let target = Target::object(bucket, key);
    with_deadline(self.deadline, Operation::DeleteObject, target.clone(), async {
      let request = DeleteObjectRequest { bucket: bucket.to_string(), object: key.to_string(), ..Default::default() };
      self.client.delete_object(&request).await.map_err(gcs_error(Operation::DeleteObject, target.clone()))
    })
    .await
  }
}

#[async_trait]
impl Storage for GcsStorage {
  async fn create_bucket(&self, bucket: &str) -> Result<()> {
    let target = Target::bucket(bucket);
    tracing::debug!(bucket, location = %self.location, "creating GCS bucket");
    with_deadline(self.deadline, Operation::CreateBucket, target.clone(), async {
      let request = InsertBucketRequest {
        name: bucket.to_string(),
        param: InsertBucketParam { project: self.project_id.clone(), ..Default::default() },
        bucket: BucketCreationConfig { location: self.location.clone(), ..Default::default() },
        ..Default::default()
      };
      self.client.insert_bucket(&request).await.map_err(gcs_error(Operation::CreateBucket, target.clone()))?;
      Ok(())
    })
    .await
    .inspect_err(|err| {
      tracing::warn!(bucket, project = %self.project_id, location = %self.location, "Couldn't create bucket: {}", err)
    })
  }

  async fn list_buckets(&self) -> Result<Vec<String>> {
    let target = Target::account();
    with_deadline(
      self.deadline,
      Operation::ListBuckets,
      target.clone(),
      drain_pages(|page_token| {
        let request = ListBucketsRequest { project: self.project_id.clone(), page_token, ..Default::default() };
        let target = target.clone();
        async move {
          let response = self.client.list_buckets(&request).await.map_err(gcs_error(Operation::ListBuckets, target))?;
          let names = response.items.into_iter().map(|bucket| bucket.name).collect();
          Ok(Page::new(names, response.next_page_token))
        }
      }),
    )
    .await
  }

  async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
    let target = Target::bucket(bucket);
    with_deadline(
      self.deadline,
      Operation::ListBucketContent,
      target.clone(),
      drain_pages(|page_token| {
        let request = ListObjectsRequest {
          bucket: bucket.to_string(),
          prefix: prefix.map(str::to_string),
          page_token,
          ..Default::default()
        };
        let target = target.clone();
        async move {
          let response =
            self.client.list_objects(&request).await.map_err(gcs_error(Operation::ListBucketContent, target))?;
          let keys = response.items.unwrap_or_default().into_iter().map(|obj| obj.name).collect();
          Ok(Page::new(keys, response.next_page_token))
        }
      }),
    )
    .await
  }

  async fn delete_bucket(&self, bucket: &str) -> Result<()> {
    let target = Target::bucket(bucket);
    with_deadline(self.deadline, Operation::DeleteBucket, target.clone(), async {
      let request = DeleteBucketRequest { bucket: bucket.to_string(), ..Default::default() };
      self.client.delete_bucket(&request).await.map_err(gcs_error(Operation::DeleteBucket, target.clone()))
    })
    .await
  }

  async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
    let target = Target::object(bucket, key);
    tracing::debug!(bucket, key, bytes = data.len(), "uploading GCS object");
    with_deadline(self.deadline, Operation::StoreObject, target.clone(), async {
      let request = UploadObjectRequest { bucket: bucket.to_string(), ..Default::default() };
      let upload_type = UploadType::Simple(Media::new(key.to_string()));
      self
        .client
        .upload_object(&request, data, &upload_type)
        .await
        .map_err(gcs_error(Operation::StoreObject, target.clone()))?;
      Ok(())
    })
    .await
  }

  async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
    let target = Target::object(bucket, key);
    with_deadline(self.deadline, Operation::RetrieveObject, target.clone(), async {
      let request = GetObjectRequest { bucket: bucket.to_string(), object: key.to_string(), ..Default::default() };
      let response = self
        .client
        .download_object(&request, &Range::default())
        .await
        .map_err(gcs_error(Operation::RetrieveObject, target.clone()))?;
      Ok(Bytes::from(response))
    })
    .await
  }

  /// GCS has no bulk delete; keys are deleted one request at a time and every
  /// key is attempted regardless of earlier failures.
  async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport> {
    let mut report = DeleteReport::default();
    for key in unique_keys(keys) {
      let outcome = self.delete_one(bucket, &key).await;
      report.record(key, outcome);
    }
    Ok(report)
  }

  fn provider_name(&self) -> &'static str {
    "Google Cloud Storage"
  }
}

fn gcs_error(operation: Operation, target: Target) -> impl FnOnce(GcsHttpError) -> StorageError {
  move |err| {
    let status = match &err {
      GcsHttpError::Response(response) => Some(response.code),
      _ => None,
    };
    StorageError::from_status(status, operation, target, err.to_string())
  }
}
