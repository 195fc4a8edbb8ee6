use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::Duration,
};

use log::debug;
use object_store::{
    gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder},
    local::LocalFileSystem,
    memory::InMemory,
    prefix::PrefixStore,
    throttle::{ThrottleConfig, ThrottledStore},
};
use parking_lot::Mutex;
use zarrs::storage::{store::AsyncObjectStore, AsyncReadableWritableListableStorage};

use crate::errors::{Error, Result};

/// Remote clients are built once per process and reused; credentials are acquired at first use
/// and never refreshed.
type BucketClients = Mutex<HashMap<String, Arc<AsyncObjectStore<PrefixStore<GoogleCloudStorage>>>>>;

static BUCKET_CLIENTS: OnceLock<BucketClients> = OnceLock::new();

/// A reference to a persisted chunked-array store.
///
/// Created by a write, consumed by an open. Handles are cheap to clone; the in-memory variants
/// share their backing store across clones so that a write through one clone is visible to an
/// open through another.
///
#[derive(Clone)]
pub enum StoreHandle {
    /// A directory on the local filesystem.
    Local(PathBuf),

    /// An in-memory store, for tests and baseline benchmarks.
    Memory(Arc<AsyncObjectStore<InMemory>>),

    /// An in-memory store behind injected latency, the benchmark harness's stand-in for a
    /// remote store under controlled conditions.
    Throttled(Arc<AsyncObjectStore<ThrottledStore<InMemory>>>),

    /// A cloud bucket addressed by a `gs://bucket/prefix` URI.
    Bucket(String),
}

impl StoreHandle {
    pub fn local<P: AsRef<Path>>(path: P) -> Self {
        Self::Local(path.as_ref().to_path_buf())
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(AsyncObjectStore::new(InMemory::new())))
    }

    /// An in-memory store that waits `latency` before serving each get.
    ///
    pub fn throttled_memory(latency: Duration) -> Self {
        let config = ThrottleConfig {
            wait_get_per_call: latency,
            ..ThrottleConfig::default()
        };
        Self::Throttled(Arc::new(AsyncObjectStore::new(ThrottledStore::new(
            InMemory::new(),
            config,
        ))))
    }

    pub fn bucket<S: Into<String>>(uri: S) -> Result<Self> {
        let uri = uri.into();
        if !uri.starts_with("gs://") {
            return Err(Error::Unsupported(format!(
                "bucket URIs must start with gs://, got {uri}"
            )));
        }
        let trimmed = uri.trim_start_matches("gs://");
        if trimmed.split('/').next().unwrap_or_default().is_empty() {
            return Err(Error::Unsupported(format!("no bucket name in {uri}")));
        }

        Ok(Self::Bucket(uri))
    }

    /// Human-readable location of the store, used in error and log messages.
    pub fn location(&self) -> String {
        match self {
            Self::Local(path) => path.display().to_string(),
            Self::Memory(_) => String::from("memory"),
            Self::Throttled(_) => String::from("memory (throttled)"),
            Self::Bucket(uri) => uri.clone(),
        }
    }

    /// Resolve this handle to async zarr storage for reading.
    ///
    /// A local path that does not exist is `NotFound`; nothing is created on disk.
    ///
    pub(crate) fn storage(&self) -> Result<AsyncReadableWritableListableStorage> {
        match self {
            Self::Local(path) => {
                if !path.is_dir() {
                    return Err(Error::NotFound(format!("no store at {}", path.display())));
                }
                let store = LocalFileSystem::new_with_prefix(path)?;
                Ok(Arc::new(AsyncObjectStore::new(store)))
            }
            Self::Memory(store) => Ok(Arc::clone(store) as _),
            Self::Throttled(store) => Ok(Arc::clone(store) as _),
            Self::Bucket(uri) => Ok(bucket_client(uri)? as _),
        }
    }

    /// Resolve this handle to async zarr storage for writing, creating a local directory if
    /// one does not exist yet.
    ///
    pub(crate) fn writable_storage(&self) -> Result<AsyncReadableWritableListableStorage> {
        if let Self::Local(path) = self {
            std::fs::create_dir_all(path)?;
        }

        self.storage()
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreHandle({})", self.location())
    }
}

impl fmt::Display for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location())
    }
}

/// Build or reuse the process-wide client for a bucket URI.
///
/// Credentials come from the environment's default application credentials. A URI that cannot
/// be resolved to an authenticated client surfaces as `AuthenticationError`.
///
fn bucket_client(uri: &str) -> Result<Arc<AsyncObjectStore<PrefixStore<GoogleCloudStorage>>>> {
    let clients = BUCKET_CLIENTS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut clients = clients.lock();
    if let Some(client) = clients.get(uri) {
        return Ok(Arc::clone(client));
    }

    let trimmed = uri.trim_start_matches("gs://");
    let (bucket, prefix) = match trimmed.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix),
        None => (trimmed, ""),
    };
    if bucket.is_empty() {
        return Err(Error::Unsupported(format!("no bucket name in {uri}")));
    }

    debug!("acquiring credentials for bucket {bucket}");
    let store = GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(bucket)
        .build()
        .map_err(|err| Error::AuthenticationError(format!("{uri}: {err}")))?;
    let client = Arc::new(AsyncObjectStore::new(PrefixStore::new(store, prefix)));
    clients.insert(uri.to_string(), Arc::clone(&client));

    Ok(client)
}
