//! # In-Memory Cache Store
//!
//! [`CacheStore`] backed by a process-local map, for tests, the simulator
//! and embedders that do not need snapshots to survive a restart.
//!
//! Uses `im::OrdMap` so [`MemoryCacheStore::snapshot`] is an O(1)
//! structural-sharing clone. Simulations snapshot the store between runs to
//! replay a run from the same cached node lists.

mod store;

pub use store::{CacheSnapshot, MemoryCacheStore};
