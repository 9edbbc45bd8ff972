//! Resumable request execution.
//!
//! A caller's JSON-RPC call becomes a [`RequestTree`]: a root context plus
//! every sub-request verifiers and node-list refreshes needed along the way.
//! The tree never performs I/O. [`RequestTree::step`] advances it and hands
//! back [`Action`](meshrpc_core::Action)s; the caller performs them and
//! feeds results in with [`RequestTree::add_response`] or
//! [`RequestTree::add_signature`].
//!
//! # Lifecycle of a context
//!
//! ```text
//! WaitingToSend ──select nodes──► WaitingForResponse ──judge──► Success
//!       ▲                                  │
//!       └──────── retry on fresh nodes ◄───┴──── attempts exhausted ──► Error
//! ```
//!
//! Verifiers may ask for auxiliary calls or signatures. Identical asks from
//! anywhere in the tree share one context, and a context never waits on
//! itself or on anything that waits on it.
//!
//! # Example
//!
//! ```ignore
//! let mut tree = RequestTree::parse(r#"{"method":"eth_blockNumber","params":[]}"#)?;
//! loop {
//!     let mut env = StepEnv { registry: &handle, collaborators: &c, config: &cfg, rng: &mut rng, now };
//!     match tree.step(&mut env)? {
//!         StepOutcome::Done => break,
//!         StepOutcome::Waiting(actions) => perform(&mut tree, actions),
//!     }
//! }
//! let block = tree.result(0)?;
//! ```

#![warn(missing_docs)]

mod config;
mod context;
mod deps;
mod execute;
mod nodelist_update;
mod payload;
mod tree;
mod verify;

pub use config::{EngineConfig, Verification};
pub use context::{ContextKind, ContextState, RequestContext};
pub use execute::{StepEnv, StepOutcome};
pub use nodelist_update::UPDATE_ERROR_PREFIX;
pub use tree::{RequestTree, ROOT};
pub use verify::GIVE_UP_PREFIX;
