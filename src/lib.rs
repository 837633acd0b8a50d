//! customs-tracker - container tracking and customs declaration backend
//!
//! - `api`: the `POST /api/store` endpoint over the document store
//! - `client`: the same store over HTTP, plus paged list queries
//! - `store`: in-memory tracking list with subscriptions and derived views
//! - `services`: sync, import, attachments, dashboard and quick links

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod models;
pub mod query;
pub mod services;
pub mod store;
