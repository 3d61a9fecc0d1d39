use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::basket_service::BasketStore;
use crate::services::catalog_service::CatalogService;

/// Everything a request handler needs, passed through axum state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogService>,
    pub baskets: BasketStore,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(catalog: CatalogService, baskets: BasketStore, config: AppConfig) -> Self {
        Self {
            catalog: Arc::new(catalog),
            baskets,
            config: Arc::new(config),
        }
    }
}
