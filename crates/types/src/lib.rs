//! Core types for the meshrpc client engine.
//!
//! This crate provides the value types shared by every other crate:
//!
//! - **Identities**: [`Address`], [`RegistryId`], [`ChainId`]
//! - **Registry records**: [`Node`], [`NodeWeight`], [`NodeProps`]
//! - **Selection input**: [`NodeFilter`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod address;
mod filter;
mod identifiers;
mod node;
mod props;
pub mod serde_helpers;

pub use address::{Address, HexError, RegistryId};
pub use filter::NodeFilter;
pub use identifiers::ChainId;
pub use node::{Node, NodeWeight};
pub use props::NodeProps;

/// Seconds in a day.
pub const DAY_SECS: u64 = 24 * 3600;
