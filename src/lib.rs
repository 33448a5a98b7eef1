// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod monitor;
pub mod trade;

// Re-export commonly used types
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
