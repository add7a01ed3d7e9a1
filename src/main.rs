use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cloud_connect::{new_storage, Storage, StorageConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "cloud-connect", about = "Bucket and object operations against S3, GCP or Azure")]
struct Cli {
  #[clap(flatten)]
  config: StorageConfig,
  #[clap(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  CreateBucket {
    bucket: String,
  },
  ListBuckets {
    /// Print the names as a JSON array.
    #[clap(long)]
    json: bool,
  },
  ListObjects {
    bucket: String,
    #[clap(long)]
    prefix: Option<String>,
    #[clap(long)]
    json: bool,
  },
  DeleteBucket {
    bucket: String,
  },
  Put {
    bucket: String,
    key: String,
    source: PathBuf,
  },
  Get {
    bucket: String,
    key: String,
    destination: PathBuf,
  },
  Delete {
    bucket: String,
    #[clap(required = true)]
    keys: Vec<String>,
  },
  /// Runs a full bucket/object lifecycle against a throwaway bucket.
  Demo {
    /// File to upload; defaults to a generated payload.
    #[clap(long)]
    source: Option<PathBuf>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  dotenv::dotenv().ok();
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  let storage = new_storage(&cli.config).await.context("failed to initialize storage provider")?;
  tracing::info!("Using {} storage provider", storage.provider_name());

  match cli.command {
    Command::CreateBucket { bucket } => storage.create_bucket(&bucket).await?,
    Command::ListBuckets { json } => print_names(&storage.list_buckets().await?, json)?,
    Command::ListObjects { bucket, prefix, json } => {
      print_names(&storage.list_objects(&bucket, prefix.as_deref()).await?, json)?
    }
    Command::DeleteBucket { bucket } => storage.delete_bucket(&bucket).await?,
    Command::Put { bucket, key, source } => storage.store_object(&bucket, &key, &source).await?,
    Command::Get { bucket, key, destination } => storage.retrieve_object(&bucket, &key, &destination).await?,
    Command::Delete { bucket, keys } => {
      let report = storage.delete_objects(&bucket, &keys).await?;
      for key in &report.deleted {
        println!("deleted {key}");
      }
      for failure in &report.failed {
        eprintln!("failed {}: {}", failure.key, failure.error);
      }
      if !report.is_complete() {
        bail!("{} of {} deletions failed", report.failed.len(), report.failed.len() + report.deleted.len());
      }
    }
    Command::Demo { source } => demo(storage.as_ref(), source).await?,
  }
  Ok(())
}

fn print_names(names: &[String], json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(names)?);
  } else {
    names.iter().for_each(|name| println!("{name}"));
  }
  Ok(())
}

async fn demo(storage: &dyn Storage, source: Option<PathBuf>) -> Result<()> {
  let bucket = format!("cloud-connect-{}", uuid::Uuid::new_v4());
  let key = "test-object-name";
  let scratch = std::env::temp_dir().join(&bucket);
  tokio::fs::create_dir_all(&scratch).await?;

  let source = match source {
    Some(source) => source,
    None => {
      let generated = scratch.join("upload.txt");
      tokio::fs::write(&generated, format!("uploaded to {bucket}\n")).await?;
      generated
    }
  };

  storage.create_bucket(&bucket).await.with_context(|| format!("Error creating bucket({bucket})"))?;
  tracing::info!("Successfully created bucket {}", bucket);

  if storage.list_buckets().await?.iter().any(|name| name == &bucket) {
    tracing::info!("List contains created bucket");
  }

  storage.store_object(&bucket, key, &source).await.context("Error storing test object")?;
  tracing::info!("Successfully stored test object");

  if storage.list_bucket_content(&bucket).await?.iter().any(|name| name == key) {
    tracing::info!("List contains test object");
  }

  let downloaded = scratch.join("download.bin");
  storage.retrieve_object(&bucket, key, &downloaded).await.context("Error retrieving test object")?;
  if tokio::fs::read(&source).await? != tokio::fs::read(&downloaded).await? {
    bail!("retrieved object differs from {}", source.display());
  }
  tracing::info!("Retrieved object matches the upload");

  storage.delete_objects(&bucket, &[key.to_string()]).await?.into_result().context("Error deleting test object")?;
  tracing::info!("Successfully deleted test object");

  storage.delete_bucket(&bucket).await.with_context(|| format!("Error deleting bucket({bucket})"))?;
  tracing::info!("Successfully deleted bucket");

  tokio::fs::remove_dir_all(&scratch).await?;
  Ok(())
}
