//! JSON file watch-list store.
//!
//! The file holds `{"addresses": ["0x…", …]}` in insertion order. Every write
//! goes to a sibling temp file which is synced and renamed over the original
//! before the write is acknowledged.

use std::path::{Path, PathBuf};

use aegis_common::{StoreError, TrackedAddress, WatchListStore};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    addresses: Vec<String>,
}

pub struct JsonFileWatchList {
    path: PathBuf,
    addresses: Mutex<IndexSet<TrackedAddress>>,
}

impl JsonFileWatchList {
    /// Opens the store at `path`. A missing file is an empty watch-list;
    /// malformed entries are dropped with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let file = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreFile>(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreFile::default(),
            Err(err) => return Err(err.into()),
        };

        let mut addresses = IndexSet::new();
        for raw in &file.addresses {
            match TrackedAddress::parse_input(raw) {
                Ok(address) => {
                    addresses.insert(address);
                }
                Err(err) => warn!(raw = %raw, %err, "dropping malformed stored address"),
            }
        }
        debug!(path = %path.display(), count = addresses.len(), "watch-list loaded");

        Ok(Self {
            path,
            addresses: Mutex::new(addresses),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, addresses: &IndexSet<TrackedAddress>) -> Result<(), StoreError> {
        let file = StoreFile {
            addresses: addresses.iter().map(ToString::to_string).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(&tmp).await?;
        out.write_all(&bytes).await?;
        out.sync_all().await?;
        drop(out);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl WatchListStore for JsonFileWatchList {
    async fn get(&self) -> Result<Vec<TrackedAddress>, StoreError> {
        Ok(self.addresses.lock().await.iter().copied().collect())
    }

    async fn add(&self, address: TrackedAddress) -> Result<bool, StoreError> {
        let mut current = self.addresses.lock().await;
        if current.contains(&address) {
            return Ok(false);
        }
        let mut next = current.clone();
        next.insert(address);
        self.persist(&next).await?;
        *current = next;
        Ok(true)
    }

    async fn remove(&self, address: TrackedAddress) -> Result<bool, StoreError> {
        let mut current = self.addresses.lock().await;
        if !current.contains(&address) {
            return Ok(false);
        }
        let mut next = current.clone();
        next.shift_remove(&address);
        self.persist(&next).await?;
        *current = next;
        Ok(true)
    }
}
