use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::errors::CatalogError;
use crate::persistence::EntryStore;
use crate::services::query_service::{QueryPage, QueryRequest};
use crate::state::entry::{next_kb, MetadataEntry};

/// Fields supplied with an upload, after the file itself has been stored.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub name: String,
    pub original_file_name: String,
    pub description: Option<String>,
    pub tag: Option<String>,
    /// Name the file was stored under (see [`stored_file_name`]).
    pub file_path: String,
    pub upload_time: i64,
}

pub struct CatalogService {
    entries: Arc<dyn EntryStore>,
    /// Serializes KB assignment so two uploads never share a number.
    upload_lock: Mutex<()>,
}

impl CatalogService {
    pub fn new(entries: Arc<dyn EntryStore>) -> Self {
        Self {
            entries,
            upload_lock: Mutex::new(()),
        }
    }

    /// Run a list request against the current collection.
    pub async fn list(&self, request: &QueryRequest) -> Result<QueryPage, CatalogError> {
        let all = self.entries.read_all().await?;
        Ok(request.run(all))
    }

    /// Assign the next KB number and store the entry.
    pub async fn record_upload(&self, upload: NewUpload) -> Result<MetadataEntry, CatalogError> {
        let _guard = self.upload_lock.lock().await;

        let existing = self.entries.read_all().await?;
        let entry = MetadataEntry {
            kb: next_kb(&existing),
            name: upload.name,
            original_file_name: upload.original_file_name,
            description: upload.description.unwrap_or_default(),
            tag: upload.tag.unwrap_or_default(),
            upload_time: upload.upload_time,
            file_path: upload.file_path,
        };

        self.entries.insert(&entry).await?;
        tracing::info!("Recorded KB{} ({})", entry.kb, entry.file_path);
        Ok(entry)
    }

    /// Entries whose KB is in `kbs`, ascending by KB. Unknown KBs are skipped.
    pub async fn entries_for(&self, kbs: &[u64]) -> Result<Vec<MetadataEntry>, CatalogError> {
        let wanted: BTreeSet<u64> = kbs.iter().copied().collect();
        let mut found: Vec<MetadataEntry> = self
            .entries
            .read_all()
            .await?
            .into_iter()
            .filter(|e| wanted.contains(&e.kb))
            .collect();
        found.sort_by_key(|e| e.kb);
        Ok(found)
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `<millis>-<name>`, keeping only the final path component of the client
/// name and replacing anything outside `[A-Za-z0-9._-]` with `_`.
pub fn stored_file_name(original: &str, millis: i64) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean.trim_matches('.').is_empty() {
        clean = "file".to_string();
    }

    format!("{millis}-{clean}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryEntries;
    use crate::services::query_service::{Direction, SortKey};

    fn upload(name: &str, millis: i64) -> NewUpload {
        NewUpload {
            name: name.into(),
            original_file_name: format!("{name}.msu"),
            description: None,
            tag: Some("security".into()),
            file_path: stored_file_name(&format!("{name}.msu"), millis),
            upload_time: millis,
        }
    }

    #[tokio::test]
    async fn first_upload_gets_first_kb_then_increments() {
        let catalog = CatalogService::new(Arc::new(MemoryEntries::default()));

        let a = catalog.record_upload(upload("a", 1000)).await.unwrap();
        let b = catalog.record_upload(upload("b", 2000)).await.unwrap();

        assert_eq!(a.kb, 100001);
        assert_eq!(b.kb, 100002);
        assert_eq!(a.description, "");
        assert_eq!(a.tag, "security");
    }

    #[tokio::test]
    async fn next_kb_follows_maximum_not_insertion_order() {
        let seeded = vec![
            MetadataEntry {
                kb: 100050,
                name: "late".into(),
                original_file_name: "late.cab".into(),
                description: String::new(),
                tag: String::new(),
                upload_time: 1,
                file_path: "1-late.cab".into(),
            },
            MetadataEntry {
                kb: 100010,
                name: "early".into(),
                original_file_name: "early.cab".into(),
                description: String::new(),
                tag: String::new(),
                upload_time: 2,
                file_path: "2-early.cab".into(),
            },
        ];
        let catalog = CatalogService::new(Arc::new(MemoryEntries::with_entries(seeded)));

        let entry = catalog.record_upload(upload("c", 3)).await.unwrap();
        assert_eq!(entry.kb, 100051);
    }

    #[tokio::test]
    async fn concurrent_uploads_get_distinct_kbs() {
        let catalog = Arc::new(CatalogService::new(Arc::new(MemoryEntries::default())));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let catalog = catalog.clone();
                tokio::spawn(async move { catalog.record_upload(upload("x", i)).await.unwrap().kb })
            })
            .collect();

        let mut kbs = Vec::new();
        for t in tasks {
            kbs.push(t.await.unwrap());
        }
        kbs.sort_unstable();
        kbs.dedup();
        assert_eq!(kbs.len(), 16);
    }

    #[tokio::test]
    async fn list_runs_query_over_store() {
        let catalog = CatalogService::new(Arc::new(MemoryEntries::default()));
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            catalog.record_upload(upload(name, i as i64)).await.unwrap();
        }

        let request = QueryRequest {
            sorts: vec![SortKey::new("kb", Direction::Descending)],
            page_size: Some(2),
            ..Default::default()
        };
        let page = catalog.list(&request).await.unwrap();

        assert_eq!(page.total_pages, 2);
        assert_eq!(page.data[0].kb, 100003);
    }

    #[tokio::test]
    async fn entries_for_skips_unknown_kbs() {
        let catalog = CatalogService::new(Arc::new(MemoryEntries::default()));
        catalog.record_upload(upload("a", 1)).await.unwrap();
        catalog.record_upload(upload("b", 2)).await.unwrap();

        let found = catalog.entries_for(&[100002, 999, 100001]).await.unwrap();
        let kbs: Vec<u64> = found.iter().map(|e| e.kb).collect();
        assert_eq!(kbs, vec![100001, 100002]);
    }

    #[test]
    fn stored_names_are_prefixed_and_flattened() {
        assert_eq!(stored_file_name("KB5034441.msu", 42), "42-KB5034441.msu");
        assert_eq!(stored_file_name("../../etc/passwd", 1), "1-passwd");
        assert_eq!(stored_file_name("C:\\tmp\\my update.cab", 7), "7-my_update.cab");
        assert_eq!(stored_file_name("..", 3), "3-file");
    }
}
