//! Client facade for meshrpc.
//!
//! A [`Client`] binds a chain's registry, a [`ClientConfig`] and the
//! caller's collaborators. It can hand out request trees for the caller to
//! drive, or drive them itself on the calling thread:
//!
//! ```ignore
//! let store = RegistryStore::new();
//! let config = ClientConfig::from_toml(&std::fs::read_to_string("client.toml")?)?;
//! let collaborators = Collaborators::new().with_transport(Arc::new(HttpTransport::default()));
//! let client = Client::new(&store, config, collaborators, Arc::new(SystemClock))?;
//!
//! let block = client.call("eth_blockNumber", json!([]))?;
//! ```
//!
//! Clients created from the same [`RegistryStore`](meshrpc_registry::RegistryStore)
//! share one registry per chain, so reputation learned by one is used by all.

mod client;
mod config;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, NodeConfig, NodeRegistryConfig};
