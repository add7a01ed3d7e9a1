//! Whole-file transfers between the local filesystem and an adapter.
//!
//! Sources are read completely into memory before any remote call is made.
//! Destinations are written to a temporary sibling and renamed into place once
//! the full payload is in hand, so a failed retrieve leaves no file behind.

use std::{
  ffi::OsString,
  path::{Path, PathBuf},
};

use bytes::Bytes;
use tokio::fs;
use uuid::Uuid;

use crate::error::{Result, StorageError};

/// Reads the whole source file. Fails with `Transfer` if it cannot be opened.
pub async fn read_source(path: &Path) -> Result<Bytes> {
  let metadata = fs::metadata(path).await.map_err(|err| StorageError::transfer(path, err))?;
  if !metadata.is_file() {
    return Err(StorageError::transfer(
      path,
      std::io::Error::new(std::io::ErrorKind::InvalidInput, "source is not a regular file"),
    ));
  }
  let data = fs::read(path).await.map_err(|err| StorageError::transfer(path, err))?;
  tracing::debug!(path = %path.display(), bytes = data.len(), "read transfer source");
  Ok(Bytes::from(data))
}

/// Checks that the destination's directory exists, before the remote read starts.
pub async fn check_sink(path: &Path) -> Result<()> {
  let parent = parent_dir(path);
  match fs::metadata(&parent).await {
    Ok(metadata) if metadata.is_dir() => Ok(()),
    Ok(_) => Err(StorageError::transfer(
      path,
      std::io::Error::new(std::io::ErrorKind::NotFound, "destination parent is not a directory"),
    )),
    Err(err) => Err(StorageError::transfer(path, err)),
  }
}

/// Writes the fetched payload, replacing any existing file at `path`.
pub async fn write_sink(path: &Path, data: &[u8]) -> Result<()> {
  let staging = staging_path(path);
  if let Err(err) = fs::write(&staging, data).await {
    let _ = fs::remove_file(&staging).await;
    return Err(StorageError::transfer(path, err));
  }
  if let Err(err) = fs::rename(&staging, path).await {
    let _ = fs::remove_file(&staging).await;
    return Err(StorageError::transfer(path, err));
  }
  tracing::debug!(path = %path.display(), bytes = data.len(), "wrote transfer destination");
  Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  }
}

/// Each call gets its own staging name, so concurrent retrieves into the same
/// destination never share a partial file.
fn staging_path(path: &Path) -> PathBuf {
  let mut name = OsString::from(".");
  name.push(path.file_name().unwrap_or_default());
  name.push(format!(".{}.partial", Uuid::new_v4().simple()));
  parent_dir(path).join(name)
}
