use serde::{Deserialize, Serialize};

/// KB number given to the first upload of an empty catalog.
pub const FIRST_KB: u64 = 100001;

/// One uploaded file as listed in the catalog.
///
/// `upload_time` is milliseconds since the Unix epoch. `file_path` is the
/// stored file name under the upload directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub kb: u64,
    pub name: String,
    pub original_file_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tag: String,
    pub upload_time: i64,
    pub file_path: String,
}

/// The KB number for the next upload: one past the current maximum.
pub fn next_kb(entries: &[MetadataEntry]) -> u64 {
    entries
        .iter()
        .map(|e| e.kb)
        .max()
        .map_or(FIRST_KB, |max| max + 1)
}
