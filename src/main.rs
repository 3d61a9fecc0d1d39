/*****************************************************************************************
 *
 *  Update Catalog – KB listing, session baskets and uploads
 *  --------------------------------------------------------
 *
 *  Metadata in a primary JSON document with an optional backup copy,
 *  baskets restored from disk before serving.
 *
 *****************************************************************************************/

use std::path::PathBuf;
use std::sync::Arc;

use axum::serve;
use tokio::net::TcpListener;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

use update_catalog::app;
use update_catalog::config::AppConfig;
use update_catalog::persistence::{
    load_baskets, BasketRecords, EntryStore, FanOutEntryStore, JsonBasketFile, JsonEntryFile,
};
use update_catalog::services::basket_service::BasketStore;
use update_catalog::services::catalog_service::CatalogService;
use update_catalog::services::notify_service::BasketNotifier;
use update_catalog::state::AppState;

#[tokio::main]
async fn main() {
    //
    // ────────────────────────────────────────────────────────
    //  Locate config.json (EXE folder or project root)
    // ────────────────────────────────────────────────────────
    //
    let exe_path = std::env::current_exe().expect("Cannot get executable path");
    let exe_dir = exe_path.parent().expect("Cannot get executable directory");

    let mut config_path: PathBuf = exe_dir.join("config.json");

    if !config_path.exists() {
        let fallback = exe_dir.join("..").join("config.json");
        if fallback.exists() {
            config_path = fallback;
        } else {
            panic!(
                "config.json not found in:\n  {}\n  {}\nCopy config.json to one of these paths.",
                exe_dir.join("config.json").display(),
                fallback.display()
            );
        }
    }

    //
    // ────────────────────────────────────────────────────────
    //  Load configuration
    // ────────────────────────────────────────────────────────
    //
    let cfg = AppConfig::load_from_file(&config_path).unwrap_or_else(|e| panic!("{e}"));

    //
    // ────────────────────────────────────────────────────────
    //  Configure logging
    // ────────────────────────────────────────────────────────
    //
    let level = match cfg.log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info"  => LevelFilter::INFO,
        "warn"  => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    tracing::info!("Starting update catalog…");
    tracing::info!("Loaded config.json from {}", config_path.display());
    tracing::info!(
        "Metadata: {} (backup: {}), baskets: {}, uploads: {}, notify scope: {:?}",
        cfg.metadata_path,
        cfg.backup_path.as_deref().unwrap_or("none"),
        cfg.basket_path,
        cfg.upload_dir,
        cfg.notify_scope
    );

    //
    // ────────────────────────────────────────────────────────
    //  Metadata store (primary + optional backup)
    // ────────────────────────────────────────────────────────
    //
    let primary: Arc<dyn EntryStore> = Arc::new(JsonEntryFile::new(&cfg.metadata_path));
    let entries: Arc<dyn EntryStore> = match &cfg.backup_path {
        Some(backup) => Arc::new(FanOutEntryStore::new(
            primary,
            Arc::new(JsonEntryFile::new(backup)),
        )),
        None => primary,
    };

    if let Err(e) = tokio::fs::create_dir_all(&cfg.upload_dir).await {
        tracing::warn!("Cannot create upload directory {}: {e}", cfg.upload_dir);
    }

    //
    // ────────────────────────────────────────────────────────
    //  Restore baskets, then start the basket writer
    // ────────────────────────────────────────────────────────
    //
    let records: Arc<dyn BasketRecords> = Arc::new(JsonBasketFile::new(&cfg.basket_path));
    let restored = load_baskets(records.as_ref()).await;
    let notifier = Arc::new(BasketNotifier::new(cfg.notify_scope));
    let baskets = BasketStore::start(records, restored, notifier);

    //
    // ────────────────────────────────────────────────────────
    //  Build Axum app
    // ────────────────────────────────────────────────────────
    //
    let port = cfg.port;
    let state = AppState::new(CatalogService::new(entries), baskets.clone(), cfg);
    let app = app::build_app(state);

    //
    // ────────────────────────────────────────────────────────
    //  Bind server and start listening
    // ────────────────────────────────────────────────────────
    //
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    tracing::info!("Listening on http://{}", addr);

    serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await
        .expect("Server error");

    // Connections are drained; persist whatever they queued.
    baskets.flush().await;
    tracing::info!("Baskets saved. Goodbye.");
}

//
// ─────────────────────────────────────────────────────────────
//  Graceful shutdown handler
// ─────────────────────────────────────────────────────────────
//
async fn shutdown() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");

    tracing::warn!("CTRL+C received, draining connections…");
}
