// proxy module - datasource reverse proxy service

pub mod config;
pub mod server;

pub mod auth; // Credential application
pub mod director; // Outgoing request rewriting
pub mod ds_proxy;
pub mod handlers; // API endpoint handlers
pub mod interpolate;
pub mod middleware; // Axum middleware
pub mod outgoing;
pub mod route;
pub mod token_cache;
pub mod token_source;
pub mod transport;
pub mod upstream; // Token endpoint client

pub use config::ProxyConfig;
pub use ds_proxy::{DataSourceProxy, ProxyServices};
pub use server::AxumServer;
