pub mod config;
pub mod documents;
pub mod export;
pub mod health;
pub mod models;
pub mod query;
pub mod sessions;
