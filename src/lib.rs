pub mod config;
pub mod core;
pub mod server;

// Re-export main components for easy access
pub use config::Config;
pub use self::core::*;
pub use server::GantryServer;
