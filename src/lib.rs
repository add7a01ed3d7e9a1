//! One storage interface over Amazon S3, Google Cloud Storage and Azure Blob
//! Storage.
//!
//! Pick a backend with a [`StorageConfig`] and call [`new_storage`]; the
//! returned [`Storage`] hides which provider is behind it.
//!
//! ```no_run
//! use cloud_connect::{new_storage, StorageConfig};
//!
//! # async fn run() -> cloud_connect::Result<()> {
//! let storage = new_storage(&StorageConfig::gcp("my-project").with_location("EUROPE-WEST1")).await?;
//! storage.create_bucket("reports").await?;
//! storage.store_object("reports", "2024/q1.csv", std::path::Path::new("q1.csv")).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod storage;
mod util;

pub use config::{StorageConfig, StorageKind};
pub use error::{Operation, Result, StorageError, Target};
pub use storage::{new_storage, new_storage_with, DeleteFailure, DeleteReport, Storage};
