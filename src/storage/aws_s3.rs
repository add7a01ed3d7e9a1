use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{
  config::http::HttpResponse,
  error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
  primitives::ByteStream,
  types::{BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier},
  Client,
};
use bytes::Bytes;

use super::{
  credentials::DEFAULT_AWS_REGION,
  pagination::{drain_pages, Page},
  DeleteReport, Storage,
};
use crate::{
  error::{Operation, Result, StorageError, Target},
  util::{unique_keys, with_deadline},
};

/// `DeleteObjects` accepts at most this many keys per request.
const MAX_KEYS_PER_DELETE: usize = 1000;

/// Amazon S3 adapter.
///
/// The SDK client is internally reference counted and safe to share, so one
/// instance can serve concurrent callers.
pub struct AwsS3Storage {
  client: Client,
  region: String,
  deadline: Duration,
}

impl AwsS3Storage {
  pub fn new(config: aws_sdk_s3::Config, deadline: Duration) -> Self {
    let region = config.region().map(|region| region.to_string()).unwrap_or_else(|| DEFAULT_AWS_REGION.to_string());
    tracing::info!("Initializing AWS S3 storage provider with region: {}", region);
    AwsS3Storage { client: Client::from_conf(config), region, deadline }
  }

  pub fn region(&self) -> &str {
    &self.region
  }

  fn creation_config(&self) -> Option<CreateBucketConfiguration> {
    // us-east-1 is the implicit location and rejects an explicit constraint.
    (self.region != DEFAULT_AWS_REGION).then(|| {
      CreateBucketConfiguration::builder()
        .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
        .build()
    })
  }

  async fn delete_chunk(&self, bucket: &str, chunk: &[String]) -> Result<Vec<(String, Option<StorageError>)>> {
    let target = Target::bucket(bucket);
    let objects = chunk
      .iter()
      .map(|key| ObjectIdentifier::builder().key(key).build())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|err| build_error(Operation::DeleteObject, target.clone(), err))?;
    let delete = Delete::builder()
      .set_objects(Some(objects))
      .build()
      .map_err(|err| build_error(Operation::DeleteObject, target.clone(), err))?;

    let output = with_deadline(self.deadline, Operation::DeleteObject, target.clone(), async {
      self
        .client
        .delete_objects()
        .bucket(bucket)
        .delete(delete)
        .send()
        .await
        .map_err(s3_error(Operation::DeleteObject, target.clone()))
    })
    .await?;

    let mut errors = output.errors.unwrap_or_default();
    let outcomes = chunk
      .iter()
      .map(|key| {
        let failure = errors.iter().position(|err| err.key.as_deref() == Some(key.as_str())).map(|index| {
          let err = errors.swap_remove(index);
          let message = err.message.or_else(|| err.code.clone()).unwrap_or_default();
          classify(err.code.as_deref(), None, Operation::DeleteObject, Target::object(bucket, key), message)
        });
        (key.clone(), failure)
      })
      .collect();
    Ok(outcomes)
  }
}

#[async_trait]
impl Storage for AwsS3Storage {
  async fn create_bucket(&self, bucket: &str) -> Result<()> {
    let target = Target::bucket(bucket);
    tracing::debug!(bucket, region = %self.region, "creating S3 bucket");
    with_deadline(self.deadline, Operation::CreateBucket, target.clone(), async {
      self
        .client
        .create_bucket()
        .bucket(bucket)
        .set_create_bucket_configuration(self.creation_config())
        .send()
        .await
        .map_err(s3_error(Operation::CreateBucket, target.clone()))?;
      Ok(())
    })
    .await
    .inspect_err(|err| tracing::warn!(bucket, region = %self.region, "Couldn't create bucket: {}", err))
  }

  async fn list_buckets(&self) -> Result<Vec<String>> {
    let target = Target::account();
    with_deadline(
      self.deadline,
      Operation::ListBuckets,
      target.clone(),
      drain_pages(|token| {
        let request = self.client.list_buckets().set_continuation_token(token);
        let target = target.clone();
        async move {
          let output = request.send().await.map_err(s3_error(Operation::ListBuckets, target))?;
          let names = output.buckets.unwrap_or_default().into_iter().filter_map(|bucket| bucket.name).collect();
          Ok(Page::new(names, output.continuation_token))
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
      drain_pages(|token| {
        let request =
          self.client.list_objects_v2().bucket(bucket).set_prefix(prefix.map(str::to_string)).set_continuation_token(token);
        let target = target.clone();
        async move {
          let output = request.send().await.map_err(s3_error(Operation::ListBucketContent, target))?;
          let keys = output.contents.unwrap_or_default().into_iter().filter_map(|obj| obj.key).collect();
          Ok(Page::new(keys, output.next_continuation_token))
        }
      }),
    )
    .await
  }

  async fn delete_bucket(&self, bucket: &str) -> Result<()> {
    let target = Target::bucket(bucket);
    with_deadline(self.deadline, Operation::DeleteBucket, target.clone(), async {
      self.client.delete_bucket().bucket(bucket).send().await.map_err(s3_error(Operation::DeleteBucket, target.clone()))?;
      Ok(())
    })
    .await
  }

  async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
    let target = Target::object(bucket, key);
    tracing::debug!(bucket, key, bytes = data.len(), "uploading S3 object");
    with_deadline(self.deadline, Operation::StoreObject, target.clone(), async {
      self
        .client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(data))
        .send()
        .await
        .map_err(s3_error(Operation::StoreObject, target.clone()))?;
      Ok(())
    })
    .await
  }

  async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
    let target = Target::object(bucket, key);
    with_deadline(self.deadline, Operation::RetrieveObject, target.clone(), async {
      let response = self
        .client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(s3_error(Operation::RetrieveObject, target.clone()))?;

      let body = response.body.collect().await.map_err(|err| StorageError::Backend {
        operation: Operation::RetrieveObject,
        target: target.clone(),
        message: DisplayErrorContext(&err).to_string(),
      })?;
      Ok(body.into_bytes())
    })
    .await
  }

  /// Issues one `DeleteObjects` request per 1000 keys. S3 reports deleting an
  /// absent key as a success.
  async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteReport> {
    let keys = unique_keys(keys);
    let mut report = DeleteReport::default();
    for chunk in keys.chunks(MAX_KEYS_PER_DELETE) {
      match self.delete_chunk(bucket, chunk).await {
        Ok(outcomes) => {
          for (key, failure) in outcomes {
            report.record(key, failure.map_or(Ok(()), Err));
          }
        }
        // Nothing was deleted yet, so the batch as a whole failed.
        Err(err) if report.deleted.is_empty() && report.failed.is_empty() => return Err(err),
        Err(err) => {
          for key in chunk {
            report.record(key.clone(), Err(err.for_object(bucket, key)));
          }
        }
      }
    }
    Ok(report)
  }

  fn provider_name(&self) -> &'static str {
    "AWS S3"
  }
}

fn s3_error<E>(operation: Operation, target: Target) -> impl FnOnce(SdkError<E, HttpResponse>) -> StorageError
where
  E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
  move |err| {
    let status = err.raw_response().map(|response| response.status().as_u16());
    let code = err.code().map(str::to_string);
    classify(code.as_deref(), status, operation, target, DisplayErrorContext(&err).to_string())
  }
}

fn build_error(operation: Operation, target: Target, err: impl std::error::Error) -> StorageError {
  StorageError::Backend { operation, target, message: format!("invalid request: {err}") }
}

fn classify(
  code: Option<&str>,
  status: Option<u16>,
  operation: Operation,
  target: Target,
  message: String,
) -> StorageError {
  match code {
    Some("NoSuchBucket" | "NoSuchKey" | "NotFound") => StorageError::NotFound { operation, target, message },
    Some("BucketAlreadyExists" | "BucketAlreadyOwnedByYou" | "BucketNotEmpty") => {
      StorageError::Conflict { operation, target, message }
    }
    _ => StorageError::from_status(status, operation, target, message),
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use aws_sdk_s3::config::{retry::RetryConfig, BehaviorVersion, Credentials, Region};
  use mockito::{Matcher, Server, ServerGuard};
  use tracing_subscriber::fmt::MakeWriter;

  use super::*;

  /// Query strings without a `continuation-token` parameter.
  const FIRST_PAGE: &str = "^[^c&][^&]*(&[^c&][^&]*)*$";

  fn offline_storage(region: &'static str) -> AwsS3Storage {
    let config = aws_sdk_s3::Config::builder()
      .behavior_version(BehaviorVersion::latest())
      .region(Region::from_static(region))
      .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "test"))
      .build();
    AwsS3Storage::new(config, Duration::from_secs(5))
  }

  fn mocked_storage(server: &ServerGuard) -> AwsS3Storage {
    let config = aws_sdk_s3::Config::builder()
      .behavior_version(BehaviorVersion::latest())
      .region(Region::from_static("us-east-1"))
      .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "test"))
      .endpoint_url(server.url())
      .force_path_style(true)
      .retry_config(RetryConfig::disabled())
      .build();
    AwsS3Storage::new(config, Duration::from_secs(5))
  }

  fn object_page(keys: &[&str], next_token: Option<&str>) -> String {
    let contents: String = keys.iter().map(|key| format!("<Contents><Key>{key}</Key><Size>1</Size></Contents>")).collect();
    let next = next_token.map(|token| format!("<NextContinuationToken>{token}</NextContinuationToken>")).unwrap_or_default();
    format!(
      r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>bucket</Name><KeyCount>{}</KeyCount><MaxKeys>2</MaxKeys><IsTruncated>{}</IsTruncated>{contents}{next}</ListBucketResult>"#,
      keys.len(),
      next_token.is_some(),
    )
  }

  fn bucket_page(names: &[&str], next_token: Option<&str>) -> String {
    let buckets: String = names
      .iter()
      .map(|name| format!("<Bucket><Name>{name}</Name><CreationDate>2026-01-01T00:00:00.000Z</CreationDate></Bucket>"))
      .collect();
    let next = next_token.map(|token| format!("<ContinuationToken>{token}</ContinuationToken>")).unwrap_or_default();
    format!(
      r#"<?xml version="1.0" encoding="UTF-8"?><ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Owner><ID>owner</ID></Owner><Buckets>{buckets}</Buckets>{next}</ListAllMyBucketsResult>"#
    )
  }

  fn delete_result(deleted: &[&str], errors: &[(&str, &str, &str)]) -> String {
    let deleted: String = deleted.iter().map(|key| format!("<Deleted><Key>{key}</Key></Deleted>")).collect();
    let errors: String = errors
      .iter()
      .map(|(key, code, message)| format!("<Error><Key>{key}</Key><Code>{code}</Code><Message>{message}</Message></Error>"))
      .collect();
    format!(
      r#"<?xml version="1.0" encoding="UTF-8"?><DeleteResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">{deleted}{errors}</DeleteResult>"#
    )
  }

  fn service_error(code: &str, message: &str) -> String {
    format!(
      r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>{code}</Code><Message>{message}</Message><RequestId>req</RequestId></Error>"#
    )
  }

  #[derive(Clone, Default)]
  struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

  impl CapturedLogs {
    fn contents(&self) -> String {
      String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
  }

  impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
      self.clone()
    }
  }

  #[test]
  fn service_codes_map_to_common_kinds() {
    let target = Target::bucket("b");
    assert!(classify(Some("NoSuchBucket"), Some(404), Operation::ListBucketContent, target.clone(), String::new())
      .is_not_found());
    assert!(classify(Some("BucketNotEmpty"), Some(409), Operation::DeleteBucket, target.clone(), String::new())
      .is_conflict());
    assert!(classify(Some("BucketAlreadyOwnedByYou"), None, Operation::CreateBucket, target.clone(), String::new())
      .is_conflict());
    assert!(matches!(
      classify(Some("SlowDown"), Some(503), Operation::StoreObject, target, String::new()),
      StorageError::Backend { .. }
    ));
  }

  #[test]
  fn location_constraint_only_outside_us_east_1() {
    assert!(offline_storage("us-east-1").creation_config().is_none());

    let storage = offline_storage("eu-west-1");
    assert_eq!(storage.region(), "eu-west-1");
    let constraint = storage.creation_config().and_then(|config| config.location_constraint);
    assert_eq!(constraint, Some(BucketLocationConstraint::EuWest1));
  }

  #[tokio::test]
  async fn empty_batch_makes_no_request() {
    let report = offline_storage("us-east-1").delete_objects("bucket", &[]).await.unwrap();
    assert!(report.is_complete());
    assert!(report.deleted.is_empty());
  }

  #[tokio::test]
  async fn object_listing_follows_continuation_tokens() {
    let mut server = Server::new_async().await;
    let first = server
      .mock("GET", "/bucket/")
      .match_query(Matcher::Regex(FIRST_PAGE.to_string()))
      .with_header("content-type", "application/xml")
      .with_body(object_page(&["a.txt", "b.txt"], Some("page-2")))
      .expect(1)
      .create_async()
      .await;
    let second = server
      .mock("GET", "/bucket/")
      .match_query(Matcher::UrlEncoded("continuation-token".into(), "page-2".into()))
      .with_header("content-type", "application/xml")
      .with_body(object_page(&["c.txt"], None))
      .expect(1)
      .create_async()
      .await;

    let keys = mocked_storage(&server).list_bucket_content("bucket").await.unwrap();

    assert_eq!(keys, vec!["a.txt", "b.txt", "c.txt"]);
    first.assert_async().await;
    second.assert_async().await;
  }

  #[tokio::test]
  async fn bucket_listing_follows_continuation_tokens() {
    let mut server = Server::new_async().await;
    let first = server
      .mock("GET", "/")
      .match_query(Matcher::Regex(FIRST_PAGE.to_string()))
      .with_header("content-type", "application/xml")
      .with_body(bucket_page(&["alpha"], Some("page-2")))
      .expect(1)
      .create_async()
      .await;
    let second = server
      .mock("GET", "/")
      .match_query(Matcher::UrlEncoded("continuation-token".into(), "page-2".into()))
      .with_header("content-type", "application/xml")
      .with_body(bucket_page(&["beta", "gamma"], None))
      .expect(1)
      .create_async()
      .await;

    let buckets = mocked_storage(&server).list_buckets().await.unwrap();

    assert_eq!(buckets, vec!["alpha", "beta", "gamma"]);
    first.assert_async().await;
    second.assert_async().await;
  }

  #[tokio::test]
  async fn per_key_errors_are_reported_against_their_keys() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("POST", "/bucket/")
      .match_query(Matcher::Any)
      .with_header("content-type", "application/xml")
      .with_body(delete_result(&["kept.txt"], &[("locked.txt", "AccessDenied", "Access Denied")]))
      .expect(1)
      .create_async()
      .await;

    let keys = vec!["kept.txt".to_string(), "locked.txt".to_string()];
    let report = mocked_storage(&server).delete_objects("bucket", &keys).await.unwrap();

    assert_eq!(report.deleted, vec!["kept.txt"]);
    assert_eq!(report.failed.len(), 1);
    let failure = &report.failed[0];
    assert_eq!(failure.key, "locked.txt");
    match &failure.error {
      StorageError::Backend { target, message, .. } => {
        assert_eq!(target, &Target::object("bucket", "locked.txt"));
        assert_eq!(message, "Access Denied");
      }
      other => panic!("expected a backend error, got {other:?}"),
    }
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn batches_split_at_one_thousand_keys() {
    let mut server = Server::new_async().await;
    let first_chunk = server
      .mock("POST", "/bucket/")
      .match_query(Matcher::Any)
      .match_body(Matcher::Regex("<Key>key-0000</Key>".to_string()))
      .with_header("content-type", "application/xml")
      .with_body(delete_result(&[], &[]))
      .expect(1)
      .create_async()
      .await;
    let second_chunk = server
      .mock("POST", "/bucket/")
      .match_query(Matcher::Any)
      .match_body(Matcher::Regex("<Key>key-1000</Key>".to_string()))
      .with_header("content-type", "application/xml")
      .with_body(delete_result(&["key-1000"], &[]))
      .expect(1)
      .create_async()
      .await;

    let keys: Vec<String> = (0..=MAX_KEYS_PER_DELETE).map(|i| format!("key-{i:04}")).collect();
    let report = mocked_storage(&server).delete_objects("bucket", &keys).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.deleted.len(), 1001);
    first_chunk.assert_async().await;
    second_chunk.assert_async().await;
  }

  #[tokio::test]
  async fn failed_later_chunk_is_reported_per_key() {
    let mut server = Server::new_async().await;
    server
      .mock("POST", "/bucket/")
      .match_query(Matcher::Any)
      .match_body(Matcher::Regex("<Key>key-0000</Key>".to_string()))
      .with_header("content-type", "application/xml")
      .with_body(delete_result(&[], &[]))
      .create_async()
      .await;
    server
      .mock("POST", "/bucket/")
      .match_query(Matcher::Any)
      .match_body(Matcher::Regex("<Key>key-1000</Key>".to_string()))
      .with_status(403)
      .with_header("content-type", "application/xml")
      .with_body(service_error("AccessDenied", "Access Denied"))
      .create_async()
      .await;

    let keys: Vec<String> = (0..=MAX_KEYS_PER_DELETE).map(|i| format!("key-{i:04}")).collect();
    let report = mocked_storage(&server).delete_objects("bucket", &keys).await.unwrap();

    assert_eq!(report.deleted.len(), MAX_KEYS_PER_DELETE);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "key-1000");
    assert!(matches!(
      &report.failed[0].error,
      StorageError::Backend { target, .. } if target == &Target::object("bucket", "key-1000")
    ));
  }

  #[tokio::test]
  async fn failed_first_chunk_fails_the_whole_batch() {
    let mut server = Server::new_async().await;
    server
      .mock("POST", "/missing/")
      .match_query(Matcher::Any)
      .with_status(404)
      .with_header("content-type", "application/xml")
      .with_body(service_error("NoSuchBucket", "The specified bucket does not exist"))
      .create_async()
      .await;

    let err = mocked_storage(&server).delete_objects("missing", &["a.txt".to_string()]).await.unwrap_err();
    assert!(err.is_not_found());
  }

  #[tokio::test]
  async fn non_empty_bucket_delete_is_a_conflict() {
    let mut server = Server::new_async().await;
    server
      .mock("DELETE", "/bucket/")
      .match_query(Matcher::Any)
      .with_status(409)
      .with_header("content-type", "application/xml")
      .with_body(service_error("BucketNotEmpty", "The bucket you tried to delete is not empty"))
      .create_async()
      .await;

    let err = mocked_storage(&server).delete_bucket("bucket").await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
  }

  #[tokio::test]
  async fn failed_create_is_classified_and_logged() {
    let mut server = Server::new_async().await;
    server
      .mock("PUT", "/taken/")
      .match_query(Matcher::Any)
      .with_status(409)
      .with_header("content-type", "application/xml")
      .with_body(service_error("BucketAlreadyExists", "The requested bucket name is not available"))
      .create_async()
      .await;

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
      .with_writer(logs.clone())
      .with_ansi(false)
      .with_max_level(tracing::Level::WARN)
      .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let err = mocked_storage(&server).create_bucket("taken").await.unwrap_err();

    assert!(err.is_conflict());
    let output = logs.contents();
    assert!(output.contains("WARN"), "{output}");
    assert!(output.contains("Couldn't create bucket"), "{output}");
    assert!(output.contains("taken"), "{output}");
    assert!(output.contains("us-east-1"), "{output}");
  }
}
