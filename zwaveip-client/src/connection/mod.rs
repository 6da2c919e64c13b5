//! Connection management module

pub mod builder;
pub mod client;
pub mod config;

pub use builder::ClientBuilder;
pub use client::ZipClient;
pub use config::{resolve, ClientConfig};
pub use zwaveip_transport::Security;
