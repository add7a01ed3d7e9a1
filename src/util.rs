use std::{collections::HashSet, future::Future, time::Duration};

use crate::error::{Operation, Result, StorageError, Target};

/// Runs a remote operation under a fixed deadline. The deadline is the only
/// way an in-flight operation gets cancelled.
pub async fn with_deadline<T, F>(deadline: Duration, operation: Operation, target: Target, fut: F) -> Result<T>
where
  F: Future<Output = Result<T>>,
{
  match tokio::time::timeout(deadline, fut).await {
    Ok(result) => result,
    Err(_) => {
      tracing::warn!(%operation, %target, ?deadline, "operation exceeded its deadline");
      Err(StorageError::Timeout { operation, target, elapsed: deadline })
    }
  }
}

/// Drops repeated keys, keeping the first occurrence order.
pub fn unique_keys(keys: &[String]) -> Vec<String> {
  let mut seen = HashSet::with_capacity(keys.len());
  keys.iter().filter(|key| seen.insert(key.as_str())).cloned().collect()
}
