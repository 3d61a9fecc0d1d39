pub mod basket_service;
pub mod catalog_service;
pub mod notify_service;
pub mod query_service;
