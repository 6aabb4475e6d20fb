pub mod config;
pub mod db;
pub mod logger;
pub mod oauth;
pub mod plugins;

pub use config::*;
pub use logger::*;
