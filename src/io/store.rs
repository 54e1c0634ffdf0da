//! Durable tile tier over object storage.
//!
//! Tiles are stored as raw big-endian ARGB bytes, one object per tile, named
//! `<prefix>/<key>.<extension>`. The store is the sole authority for tile
//! data and only changes through administrative loads.

use crate::config::{RetryConfig as StoreRetryConfig, StoreConfig};
use crate::error::Result;
use crate::index::TileKey;
use anyhow::Context;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, PutPayload, RetryConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

/// Parse an S3 URI into bucket and key components.
///
/// Accepts URIs in the format `s3://bucket/key/path`.
pub fn parse_s3_uri(uri: &str) -> anyhow::Result<(&str, &str)> {
    let without_scheme = uri
        .strip_prefix("s3://")
        .with_context(|| format!("Invalid S3 URI: expected 's3://' prefix in '{}'", uri))?;

    without_scheme
        .split_once('/')
        .with_context(|| format!("Invalid S3 URI: expected 's3://bucket/key' format in '{}'", uri))
}

/// Store configuration for a location given as `s3://bucket/prefix` or a
/// local directory.
pub fn store_config_from_uri(uri: &str, extension: &str) -> anyhow::Result<StoreConfig> {
    let mut config = StoreConfig {
        extension: extension.to_string(),
        ..Default::default()
    };
    if uri.starts_with("s3://") {
        let (bucket, prefix) = parse_s3_uri(uri)?;
        config.bucket = Some(bucket.to_string());
        config.prefix = Some(prefix.trim_end_matches('/').to_string());
    } else {
        config.local_path = Some(uri.to_string());
    }
    Ok(config)
}

/// Authoritative tile storage.
pub trait DurableStore: Send + Sync {
    /// Fetch the bytes stored under `key`; `None` when absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Administrative write.
    fn put(&self, key: &str, value: Bytes) -> impl Future<Output = Result<()>> + Send;
}

/// [`DurableStore`] backed by any `object_store` implementation.
#[derive(Clone)]
pub struct ObjectTileStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    extension: String,
}

impl ObjectTileStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, extension: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            extension: extension.to_string(),
        }
    }

    /// Build from configuration, creating the underlying object store.
    pub fn from_config(config: &StoreConfig, retry: &StoreRetryConfig) -> anyhow::Result<Self> {
        let store = create_tile_store(config, retry)?;
        Ok(Self::new(store, config.key_prefix(), &config.extension))
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Object path of `key`.
    pub fn path(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(format!("{}.{}", key, self.extension))
        } else {
            ObjectPath::from(format!("{}/{}.{}", self.prefix, key, self.extension))
        }
    }
}

impl DurableStore for ObjectTileStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path(key);
        match self.store.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let path = self.path(key);
        self.store.put(&path, PutPayload::from(value)).await?;
        Ok(())
    }
}

/// Client options tuned for many small concurrent tile reads.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(30))
        .with_pool_idle_timeout(Duration::from_secs(90))
        .with_pool_max_idle_per_host(64)
}

/// Transport-level retries, sharing the service's backoff settings.
fn create_retry_config(retry: &StoreRetryConfig) -> RetryConfig {
    RetryConfig {
        max_retries: retry.max_retries,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(retry.max_backoff_ms),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(60),
    }
}

/// Create an S3 client for the tile bucket.
///
/// Credentials are loaded from the environment, AWS config files or the
/// instance profile.
fn create_s3_store(config: &StoreConfig, bucket: &str, retry: &StoreRetryConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating S3 client for bucket: {}", bucket);

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config(retry));

    if let Some(region) = &config.region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &config.endpoint_url {
        builder = builder.with_endpoint(endpoint).with_allow_http(true);
    }

    Ok(Arc::new(builder.build()?))
}

/// Create the object store holding tiles.
/// Uses LocalFileSystem if local_path is set, otherwise S3.
pub fn create_tile_store(config: &StoreConfig, retry: &StoreRetryConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match (&config.local_path, &config.bucket) {
        (Some(local_path), _) => {
            let path = Path::new(local_path);
            if !path.exists() {
                std::fs::create_dir_all(path)?;
            }
            tracing::info!("Creating LocalFileSystem store at: {}", path.display());
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        (_, Some(bucket)) => create_s3_store(config, bucket, retry),
        _ => anyhow::bail!("Invalid config: no tile store location"),
    }
}

/// Regular files directly inside `dir` with the given extension, sorted by name.
pub(crate) fn find_files(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Directory does not exist: {}", dir.display()),
        ));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
        .collect();
    files.sort();
    Ok(files)
}

/// Put every `*.<extension>` tile file in `dir` into `store`.
///
/// The file stem is the tile key; each file's length must match the size the
/// key describes. Files are loaded in reverse name order. Returns the number
/// of tiles stored.
pub async fn load_tile_directory<D: DurableStore>(
    store: &D,
    dir: &Path,
    extension: &str,
) -> anyhow::Result<usize> {
    let files = find_files(dir, extension)?;
    if files.is_empty() {
        anyhow::bail!("{} contains no .{} files", dir.display(), extension);
    }

    for path in files.iter().rev() {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Non UTF-8 file name: {}", path.display()))?;
        let key = TileKey::from_file_name(name)?;

        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if data.len() != key.byte_len() {
            anyhow::bail!(
                "{} holds {} bytes but its key describes {}",
                path.display(),
                data.len(),
                key.byte_len()
            );
        }

        tracing::debug!("Storing {} bytes for {}", data.len(), key);
        store.put(&key.to_string(), Bytes::from(data)).await?;
    }

    tracing::info!("Loaded {} tiles from {}", files.len(), dir.display());
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    fn memory_store() -> ObjectTileStore {
        ObjectTileStore::new(Arc::new(InMemory::new()), "tiles/", "tile")
    }

    #[test]
    fn test_parse_s3_uri() {
        let (bucket, key) = parse_s3_uri("s3://my-bucket/path/to/tiles").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(key, "path/to/tiles");

        let (bucket, key) = parse_s3_uri("s3://bucket/file.txt").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "file.txt");
    }

    #[test]
    fn test_parse_s3_uri_invalid() {
        assert!(parse_s3_uri("bucket/key").is_err());
        assert!(parse_s3_uri("http://bucket/key").is_err());
        assert!(parse_s3_uri("s3://bucket").is_err());
    }

    #[test]
    fn test_store_config_from_uri() {
        let s3 = store_config_from_uri("s3://tiles/basemaps/", "tile").unwrap();
        assert_eq!(s3.bucket.as_deref(), Some("tiles"));
        assert_eq!(s3.key_prefix(), "basemaps");

        let local = store_config_from_uri("/var/tiles", "tile").unwrap();
        assert!(local.is_local());
        assert_eq!(local.key_prefix(), "");
    }

    #[test]
    fn test_object_path() {
        let store = memory_store();
        assert_eq!(store.path("a_1_1_0_0_1_1").as_ref(), "tiles/a_1_1_0_0_1_1.tile");

        let bare = ObjectTileStore::new(Arc::new(InMemory::new()), "", "bin");
        assert_eq!(bare.path("k").as_ref(), "k.bin");
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = memory_store();
        assert!(store.get("absent_1_1_0_0_1_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = memory_store();
        store.put("k", Bytes::from_static(&[1, 2, 3, 4])).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().as_ref(), &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_local_store() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            local_path: Some(dir.path().join("store").display().to_string()),
            extension: "tile".to_string(),
            ..Default::default()
        };
        let store = ObjectTileStore::from_config(&config, &StoreRetryConfig::default()).unwrap();
        store.put("world_2_1_0_0_2_1", Bytes::from(vec![0u8; 8])).await.unwrap();

        assert!(dir.path().join("store/world_2_1_0_0_2_1.tile").exists());
        assert_eq!(store.get("world_2_1_0_0_2_1").await.unwrap().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_load_tile_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("world_4_2_0_0_2_2.tile"), vec![1u8; 16]).unwrap();
        std::fs::write(dir.path().join("world_4_2_2_0_2_2.tile"), vec![2u8; 16]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let store = memory_store();
        let loaded = load_tile_directory(&store, dir.path(), "tile").await.unwrap();
        assert_eq!(loaded, 2);

        let tile = store.get("world_4_2_2_0_2_2").await.unwrap().unwrap();
        assert!(tile.iter().all(|&b| b == 2));
    }

    #[tokio::test]
    async fn test_load_rejects_bad_tiles() {
        let empty = TempDir::new().unwrap();
        assert!(load_tile_directory(&memory_store(), empty.path(), "tile").await.is_err());

        let wrong_size = TempDir::new().unwrap();
        std::fs::write(wrong_size.path().join("world_4_2_0_0_2_2.tile"), vec![0u8; 15]).unwrap();
        assert!(load_tile_directory(&memory_store(), wrong_size.path(), "tile").await.is_err());

        let bad_name = TempDir::new().unwrap();
        std::fs::write(bad_name.path().join("world.tile"), vec![0u8; 4]).unwrap();
        assert!(load_tile_directory(&memory_store(), bad_name.path(), "tile").await.is_err());
    }
}
