pub mod basket_routes;
pub mod catalog_routes;
pub mod system_routes;
