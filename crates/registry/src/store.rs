//! Process-wide table of shared registries.
//!
//! A [`RegistryStore`] is constructed explicitly and handed to every client
//! that should share registries; there is no hidden global. Clients hold a
//! [`RegistryLease`], which keeps the registry's reference count up and
//! releases it on drop.
//!
//! # Locking
//!
//! - The table lock guards lookups and reference counts only.
//! - Each registry has its own reentrant lock. It is taken for the duration
//!   of a [`RegistryHandle::with`] / [`RegistryHandle::with_mut`] closure and
//!   never across I/O, because closures cannot await anything.

use crate::registry::Registry;
use meshrpc_types::ChainId;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// A registry behind its own reentrant lock.
///
/// Reads nest: a [`with`](Self::with) closure may read the same registry
/// again, through this handle or another lease on it. A closure passed to
/// either method must never call [`with_mut`](Self::with_mut) on the same
/// registry; the inner `RefCell` panics on the overlapping borrow.
pub struct RegistryHandle {
    chain_id: ChainId,
    inner: ReentrantMutex<RefCell<Registry>>,
}

impl RegistryHandle {
    fn new(registry: Registry) -> Self {
        Self {
            chain_id: registry.chain_id(),
            inner: ReentrantMutex::new(RefCell::new(registry)),
        }
    }

    /// Chain of the registry.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Read under the registry lock.
    pub fn with<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        let guard = self.inner.lock();
        let registry = guard.borrow();
        f(&registry)
    }

    /// Mutate under the registry lock. `f` must not touch this registry.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let guard = self.inner.lock();
        let mut registry = guard.borrow_mut();
        f(&mut registry)
    }

    /// Clone the current contents.
    pub fn snapshot(&self) -> Registry {
        self.with(Registry::clone)
    }
}

impl fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

struct Entry {
    handle: Arc<RegistryHandle>,
    refs: usize,
}

#[derive(Default)]
struct Table {
    entries: Mutex<HashMap<ChainId, Entry>>,
}

impl Table {
    fn release(&self, chain_id: ChainId, handle: &Arc<RegistryHandle>) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&chain_id) else {
            return;
        };
        // a newer registry for the same chain may have replaced ours
        if !Arc::ptr_eq(&entry.handle, handle) {
            return;
        }
        entry.refs -= 1;
        if entry.refs == 0 {
            entries.remove(&chain_id);
            debug!(%chain_id, "Released last reference to registry");
        }
    }
}

/// Shared registries keyed by chain id, with reference counts.
#[derive(Clone, Default)]
pub struct RegistryStore {
    table: Arc<Table>,
}

impl RegistryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt the shared registry for `chain_id`, creating it if absent.
    pub fn get_or_create(&self, chain_id: ChainId) -> RegistryLease {
        let mut entries = self.table.entries.lock();
        let entry = entries.entry(chain_id).or_insert_with(|| {
            debug!(%chain_id, "Creating registry");
            Entry {
                handle: Arc::new(RegistryHandle::new(Registry::new(chain_id))),
                refs: 0,
            }
        });
        entry.refs += 1;
        RegistryLease {
            handle: Arc::clone(&entry.handle),
            owner: Some(Arc::downgrade(&self.table)),
        }
    }

    /// Current reference count of the shared registry for `chain_id`.
    pub fn ref_count(&self, chain_id: ChainId) -> usize {
        self.table
            .entries
            .lock()
            .get(&chain_id)
            .map_or(0, |e| e.refs)
    }

    /// Number of live shared registries.
    pub fn len(&self) -> usize {
        self.table.entries.lock().len()
    }

    /// True if no shared registry is alive.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RegistryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryStore")
            .field("registries", &self.len())
            .finish()
    }
}

/// A counted reference to a registry.
///
/// Dropping the lease is the release operation.
pub struct RegistryLease {
    handle: Arc<RegistryHandle>,
    /// Table holding the shared entry. `None` for private registries.
    owner: Option<Weak<Table>>,
}

impl RegistryLease {
    /// Wrap a registry no other client can see.
    pub fn private(registry: Registry) -> Self {
        Self {
            handle: Arc::new(RegistryHandle::new(registry)),
            owner: None,
        }
    }

    /// The registry handle.
    pub fn handle(&self) -> &RegistryHandle {
        &self.handle
    }

    /// True if other clients may share this registry.
    pub fn is_shared(&self) -> bool {
        self.owner.is_some()
    }

    /// Copy-on-write for configuration overrides.
    ///
    /// A shared registry is cloned into a private one and the shared
    /// reference is released; a private registry is returned as is.
    pub fn detach_private_copy(self) -> Self {
        if !self.is_shared() {
            return self;
        }
        let copy = self.handle.with(Registry::detached_copy);
        debug!(chain_id = %copy.chain_id(), "Detached private registry copy");
        // dropping self releases the shared reference
        Self::private(copy)
    }
}

impl std::ops::Deref for RegistryLease {
    type Target = RegistryHandle;

    fn deref(&self) -> &RegistryHandle {
        &self.handle
    }
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        if let Some(table) = self.owner.take().and_then(|w| w.upgrade()) {
            table.release(self.handle.chain_id(), &self.handle);
        }
    }
}

impl fmt::Debug for RegistryLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryLease")
            .field("chain_id", &self.handle.chain_id())
            .field("shared", &self.is_shared())
            .finish()
    }
}
