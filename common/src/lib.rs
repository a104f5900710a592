//! Ambient configuration and logging shared by the attendance client crates.

pub mod config;
pub mod logger;

pub use config::AppConfig;
pub use logger::init_logging;
