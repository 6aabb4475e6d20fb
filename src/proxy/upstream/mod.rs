// Upstream module - outbound token endpoint calls

pub mod client;

pub use client::{TokenClient, UpstreamClient};
