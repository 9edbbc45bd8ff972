//! Deterministic simulation of meshrpc clients.
//!
//! A [`SimulatedNetwork`] stands in for the transport: it hosts a mix of
//! honest, lying, offline and stale-reporting nodes and answers every batch
//! in process. A [`SimulationRunner`] drives several clients that share one
//! registry against it under a manual clock. Given the same seed, a run
//! produces identical [`SimulationStats`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               SimulationRunner               │
//! │                                              │
//! │   Client 0 ─┐                                │
//! │   Client 1 ─┼─► shared Registry ◄─ cache     │
//! │   Client n ─┘        │                       │
//! │                      ▼                       │
//! │   SimulatedNetwork (Transport)               │
//! │     honest │ lying │ offline │ stale         │
//! └──────────────────────────────────────────────┘
//! ```

mod network;
mod node;
mod runner;

pub use network::{
    canonical_result, CanonicalVerifier, NetworkConfig, NetworkCounters, SimulatedNetwork,
};
pub use node::{Behavior, NodeMix, SimNode, SIM_DEPOSIT};
pub use runner::{SimulationConfig, SimulationRunner, SimulationStats};

/// Position of a node in the simulated network.
pub type NodeIndex = u32;
