//! Broadcast dispatch: the batched retry executor and the dual-backend
//! coordinator built on it.

pub mod coordinator;
pub mod dispatcher;

pub use {
    coordinator::{BroadcastCoordinator, BroadcastRequest, DEFAULT_PLACEHOLDER},
    dispatcher::{BatchDispatcher, DEFAULT_RETRY_BASE, RetryPolicy},
};
