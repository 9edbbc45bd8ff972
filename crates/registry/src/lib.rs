//! Node registry and selection for meshrpc.
//!
//! # Components
//!
//! - [`Registry`]: per-chain node and weight tables, blacklist, side tables
//! - [`RegistryStore`] / [`RegistryLease`]: shared, reference-counted registries
//! - [`Registry::pick`]: reputation-weighted sampling without replacement
//! - [`staleness`]: when and how a node-list refresh is scheduled and applied
//! - [`reputation`]: response-time accounting and offline reports
//! - [`cache`]: binary snapshot for the cache store
//!
//! All operations are synchronous and take the current time as an argument.
//! Randomness is injected, so seeded generators give reproducible picks.

pub mod cache;
mod nodelist;
mod registry;
pub mod reputation;
mod selector;
pub mod staleness;
mod store;

pub use cache::{CacheError, CACHE_VERSION};
pub use nodelist::{NodeList, NodeListEntry, NodeListError};
pub use registry::{NodeLocator, OfflineReport, Registry, RegistryError};
pub use reputation::OfflineOutcome;
pub use selector::{
    is_eligible, reputation_factor, selection_weight, Selection, SelectionConfig, SelectionError,
    SelectedNode,
};
pub use staleness::{
    update_wait_time, PendingUpdate, StalenessConfig, UpdateApplied, UpdateFailure,
};
pub use store::{RegistryHandle, RegistryLease, RegistryStore};

use meshrpc_core::{EngineError, ErrorKind};

impl From<SelectionError> for EngineError {
    fn from(e: SelectionError) -> Self {
        let kind = match e {
            SelectionError::NoEligibleNodes { .. } => ErrorKind::NoEligibleNodes,
            SelectionError::ZeroCount => ErrorKind::InvalidInput,
        };
        EngineError::new(kind, e.to_string())
    }
}

impl From<NodeListError> for EngineError {
    fn from(e: NodeListError) -> Self {
        EngineError::remote(e.to_string())
    }
}

impl From<CacheError> for EngineError {
    fn from(e: CacheError) -> Self {
        let kind = match e {
            CacheError::Version { .. } => ErrorKind::VersionMismatch,
            _ => ErrorKind::InvalidInput,
        };
        EngineError::new(kind, e.to_string())
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        EngineError::remote(e.to_string())
    }
}
