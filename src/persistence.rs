use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::errors::CatalogError;
use crate::state::{BasketMap, MetadataEntry};

/// Where catalog entries live.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// The complete current collection.
    async fn read_all(&self) -> Result<Vec<MetadataEntry>, CatalogError>;

    async fn insert(&self, entry: &MetadataEntry) -> Result<(), CatalogError>;
}

/// Where baskets are persisted between restarts.
#[async_trait]
pub trait BasketRecords: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, Vec<u64>>, CatalogError>;

    /// Replace the stored basket of `session_id`.
    async fn upsert(&self, session_id: &str, kbs: &[u64]) -> Result<(), CatalogError>;
}

//
// ─────────────────────────────────────────────────────────────
//  JSON documents on disk
// ─────────────────────────────────────────────────────────────
//

/// Read a JSON document, or `T::default()` if the file does not exist yet.
async fn read_document<T>(path: &Path) -> Result<T, CatalogError>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path).await {
        Ok(text) if text.trim().is_empty() => Ok(T::default()),
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write a JSON document through a sibling temp file so readers never see
/// a half-written file.
async fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), CatalogError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp = temp_path(path);
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// `<file name>.tmp` beside `path`; documents differing only by extension
/// get distinct temp files.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Catalog entries as a pretty-printed JSON array.
pub struct JsonEntryFile {
    path: PathBuf,
    io: Mutex<()>,
}

impl JsonEntryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }
}

#[async_trait]
impl EntryStore for JsonEntryFile {
    async fn read_all(&self) -> Result<Vec<MetadataEntry>, CatalogError> {
        let _guard = self.io.lock().await;
        read_document(&self.path).await
    }

    async fn insert(&self, entry: &MetadataEntry) -> Result<(), CatalogError> {
        let _guard = self.io.lock().await;
        let mut entries: Vec<MetadataEntry> = read_document(&self.path).await?;
        entries.push(entry.clone());
        write_document(&self.path, &entries).await
    }
}

/// Baskets as a JSON object: `{ "<session id>": [kb, ...] }`.
pub struct JsonBasketFile {
    path: PathBuf,
    io: Mutex<()>,
}

impl JsonBasketFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }
}

#[async_trait]
impl BasketRecords for JsonBasketFile {
    async fn load_all(&self) -> Result<HashMap<String, Vec<u64>>, CatalogError> {
        let _guard = self.io.lock().await;
        read_document(&self.path).await
    }

    async fn upsert(&self, session_id: &str, kbs: &[u64]) -> Result<(), CatalogError> {
        let _guard = self.io.lock().await;
        let mut all: HashMap<String, Vec<u64>> = read_document(&self.path).await?;
        all.insert(session_id.to_string(), kbs.to_vec());
        write_document(&self.path, &all).await
    }
}

//
// ─────────────────────────────────────────────────────────────
//  In-memory stores
// ─────────────────────────────────────────────────────────────
//

#[derive(Default)]
pub struct MemoryEntries {
    entries: RwLock<Vec<MetadataEntry>>,
}

impl MemoryEntries {
    pub fn with_entries(entries: Vec<MetadataEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl EntryStore for MemoryEntries {
    async fn read_all(&self) -> Result<Vec<MetadataEntry>, CatalogError> {
        Ok(self.entries.read().clone())
    }

    async fn insert(&self, entry: &MetadataEntry) -> Result<(), CatalogError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBaskets {
    records: RwLock<HashMap<String, Vec<u64>>>,
}

impl MemoryBaskets {
    pub fn get(&self, session_id: &str) -> Option<Vec<u64>> {
        self.records.read().get(session_id).cloned()
    }
}

#[async_trait]
impl BasketRecords for MemoryBaskets {
    async fn load_all(&self) -> Result<HashMap<String, Vec<u64>>, CatalogError> {
        Ok(self.records.read().clone())
    }

    async fn upsert(&self, session_id: &str, kbs: &[u64]) -> Result<(), CatalogError> {
        self.records
            .write()
            .insert(session_id.to_string(), kbs.to_vec());
        Ok(())
    }
}

//
// ─────────────────────────────────────────────────────────────
//  Primary + backup writer
// ─────────────────────────────────────────────────────────────
//

/// Reads from `primary`; every insert goes to `primary` and then, in the
/// background, to `secondary`. Only a primary failure fails the insert.
pub struct FanOutEntryStore {
    primary: Arc<dyn EntryStore>,
    secondary: Arc<dyn EntryStore>,
}

impl FanOutEntryStore {
    pub fn new(primary: Arc<dyn EntryStore>, secondary: Arc<dyn EntryStore>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl EntryStore for FanOutEntryStore {
    async fn read_all(&self) -> Result<Vec<MetadataEntry>, CatalogError> {
        self.primary.read_all().await
    }

    async fn insert(&self, entry: &MetadataEntry) -> Result<(), CatalogError> {
        self.primary.insert(entry).await?;

        let secondary = self.secondary.clone();
        let entry = entry.clone();
        tokio::spawn(async move {
            if let Err(e) = secondary.insert(&entry).await {
                tracing::warn!("Backup write for KB{} failed: {e}", entry.kb);
            }
        });

        Ok(())
    }
}

//
// ─────────────────────────────────────────────────────────────
//  Basket restore + background writer
// ─────────────────────────────────────────────────────────────
//

/// Load every persisted basket. An unreadable store yields an empty map so
/// the service still starts.
pub async fn load_baskets(records: &dyn BasketRecords) -> BasketMap {
    match records.load_all().await {
        Ok(all) => {
            let map: BasketMap = all
                .into_iter()
                .map(|(sid, kbs)| (sid, kbs.into_iter().collect()))
                .collect();
            tracing::info!("Restored {} baskets", map.len());
            map
        }
        Err(e) => {
            tracing::warn!("Could not restore baskets, starting empty: {e}");
            BasketMap::new()
        }
    }
}

/// Work for [`basket_writer_loop`].
pub enum BasketWrite {
    Upsert { session_id: String, kbs: Vec<u64> },
    /// Acknowledged once every earlier write has been applied.
    Flush(oneshot::Sender<()>),
}

/// Apply basket writes one at a time, in the order they were queued.
/// Failures are logged and the loop carries on.
pub async fn basket_writer_loop(
    records: Arc<dyn BasketRecords>,
    mut rx: mpsc::UnboundedReceiver<BasketWrite>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            BasketWrite::Upsert { session_id, kbs } => {
                if let Err(e) = records.upsert(&session_id, &kbs).await {
                    tracing::warn!("Failed to persist basket {session_id}: {e}");
                }
            }
            BasketWrite::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("Basket writer stopped");
}
