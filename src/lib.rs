//! Update catalog service: a filterable, sortable KB listing, per-session
//! download baskets and password-protected uploads.

pub mod app;
pub mod auth;
pub mod config;
pub mod errors;
pub mod persistence;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
