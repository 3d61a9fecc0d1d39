use serde::Deserialize;
use std::{env, fs, path::Path};

use crate::errors::CatalogError;
use crate::services::notify_service::NotifyScope;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// HTTP port to listen on.
    pub port: u16,

    /// Log level for tracing (e.g. "info", "debug").
    pub log_level: String,

    pub server_version: String,

    /// Primary metadata document (JSON array of entries).
    pub metadata_path: String,

    /// Secondary metadata copy written after every upload.
    ///
    /// If `None`, uploads are only written to `metadata_path`.
    #[serde(default)]
    pub backup_path: Option<String>,

    /// Persisted baskets (JSON object keyed by session id).
    pub basket_path: String,

    /// Directory uploaded files are stored in and served from.
    pub upload_dir: String,

    /// Largest accepted upload body, in MiB.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,

    pub upload_user: String,
    pub upload_pass: String,

    /// Who receives basket change events.
    #[serde(default)]
    pub notify_scope: NotifyScope,
}

fn default_max_upload_mb() -> usize {
    512
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, CatalogError> {
        let file = fs::read_to_string(path)
            .map_err(|e| CatalogError::Config(format!("cannot read {}: {e}", path.display())))?;

        Self::from_json(&file)
    }

    /// Parse a config document, then apply `UPLOAD_USER` / `UPLOAD_PASS`.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let mut cfg = serde_json::from_str::<AppConfig>(text)
            .map_err(|e| CatalogError::Config(format!("invalid config.json: {e}")))?;

        if let Ok(user) = env::var("UPLOAD_USER") {
            cfg.upload_user = user;
        }
        if let Ok(pass) = env::var("UPLOAD_PASS") {
            cfg.upload_pass = pass;
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "port": 3000,
        "log_level": "debug",
        "server_version": "1.2.3",
        "metadata_path": "m.json",
        "basket_path": "b.json",
        "upload_dir": "uploads",
        "upload_user": "admin",
        "upload_pass": "secret"
    }"#;

    #[test]
    fn optional_fields_default() {
        let cfg = AppConfig::from_json(SAMPLE).unwrap();
        assert_eq!(cfg.port, 3000);
        assert!(cfg.backup_path.is_none());
        assert_eq!(cfg.max_upload_mb, 512);
        assert_eq!(cfg.notify_scope, NotifyScope::Session);
    }

    #[test]
    fn global_scope_is_parsed() {
        let text = SAMPLE.replace("\"port\": 3000,", "\"port\": 3000, \"notify_scope\": \"global\",");
        let cfg = AppConfig::from_json(&text).unwrap();
        assert_eq!(cfg.notify_scope, NotifyScope::Global);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let err = AppConfig::from_json("{ \"port\": \"nope\" }").unwrap_err();
        assert!(matches!(err, CatalogError::Config(_)));
    }
}
