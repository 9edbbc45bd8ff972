//! Core contracts for the meshrpc client engine.
//!
//! This crate provides the pieces every layer agrees on:
//!
//! - [`EngineError`] / [`ErrorKind`]: the failure taxonomy and its numeric codes
//! - [`Transport`], [`Verifier`], [`Signer`], [`CacheStore`]: collaborator contracts
//! - [`Collaborators`]: a typed registry of collaborator implementations
//! - [`RpcRequest`], [`ResponseMeta`], [`TransportResponse`]: JSON-RPC shapes
//! - [`Action`]: I/O requested by a step
//! - [`Clock`]: time source
//!
//! # Architecture
//!
//! ```text
//! caller ──► step(tree) ──► Vec<Action> ──► caller performs I/O ──► add_response ──► step(tree)
//! ```
//!
//! The engine is:
//! - **Synchronous**: No async, no .await
//! - **Cooperative**: suspends only when it needs transport or signer results
//! - **I/O free**: the caller owns threads, sockets and timeouts

mod action;
mod clock;
mod collaborators;
mod error;
mod rpc;

pub use action::{Action, ContextId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    CacheStore, CollaboratorError, Collaborators, Dependencies, Dependency, DigestKind, Signer,
    Transport, Verdict, VerifyContext, Verifier,
};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use rpc::{
    is_user_error, rpc_error_message, RequestKey, ResponseMeta, RpcRequest, TransportResponse,
    NODELIST_METHOD,
};
