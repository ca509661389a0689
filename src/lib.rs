pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod monitor;
pub mod ui;

pub use error::{Result, StockWatchError};
