pub mod app;
pub mod basket;
pub mod entry;

pub use app::AppState;
pub use basket::{Basket, BasketMap};
pub use entry::MetadataEntry;
